// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Handshake orderings: host-first, peer-first, and simultaneous start all
// converge to one connected pair with exactly one channel creation.
//
// Both ends run in this process. Outgoing signals go through a loopback
// notifier into the other end's queue instead of kill(2); the queues are
// drained into Bridge::handle_event exactly the way SignalHub::poll is in
// production. Both ends share this process's pid, so the simultaneous
// tie-break exercises the equal-pid rule (Host wins).

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use audiolink::{
    platform_validator, AudioChannel, Bridge, BridgeConfig, BridgeError, HandshakeState,
    IdentityBoard, Notifier, PeerValidator, Role, SignalEvent,
};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

type Inbox = Arc<Mutex<VecDeque<SignalEvent>>>;

/// Delivers events into the other end's queue instead of raising signals.
struct Loopback {
    peer_inbox: Inbox,
}

impl Notifier for Loopback {
    fn notify(&self, _pid: i32, event: SignalEvent) -> io::Result<()> {
        self.peer_inbox.lock().unwrap().push_back(event);
        Ok(())
    }
}

struct RejectAll;

impl PeerValidator for RejectAll {
    fn validate(&self, _pid: i32, _expected_fragment: &str) -> bool {
        false
    }
}

fn own_exe_fragment() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .expect("current_exe")
}

struct Rig {
    cfg_host: BridgeConfig,
    host_inbox: Inbox,
    peer_inbox: Inbox,
    host: Bridge,
    peer: Bridge,
}

fn rig(prefix: &str) -> Rig {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id();
    let tag = format!("{prefix}_{pid}_{n}");
    let expected = own_exe_fragment();

    let mk_cfg = |role| BridgeConfig {
        role,
        identity_name: format!("{tag}_pids"),
        channel_name: format!("{tag}_chan"),
        param_sem_name: format!("{tag}_param"),
        buffer_sem_stem: format!("{tag}_buf"),
        expected_peer: expected.clone(),
        rendezvous_signo: libc::SIGUSR1,
        ready_signo: libc::SIGUSR2,
    };
    let cfg_host = mk_cfg(Role::Host);
    let cfg_peer = mk_cfg(Role::Peer);

    IdentityBoard::clear_storage(&cfg_host.identity_name);
    AudioChannel::clear_storage(
        &cfg_host.channel_name,
        &cfg_host.param_sem_name,
        &cfg_host.buffer_sem_stem,
    );

    let host_inbox: Inbox = Arc::new(Mutex::new(VecDeque::new()));
    let peer_inbox: Inbox = Arc::new(Mutex::new(VecDeque::new()));

    let host = Bridge::new(
        cfg_host.clone(),
        Box::new(platform_validator()),
        Box::new(Loopback {
            peer_inbox: Arc::clone(&peer_inbox),
        }),
    );
    let peer = Bridge::new(
        cfg_peer,
        Box::new(platform_validator()),
        Box::new(Loopback {
            peer_inbox: Arc::clone(&host_inbox),
        }),
    );

    Rig {
        cfg_host,
        host_inbox,
        peer_inbox,
        host,
        peer,
    }
}

fn drain(bridge: &mut Bridge, inbox: &Inbox) -> audiolink::Result<()> {
    loop {
        let ev = inbox.lock().unwrap().pop_front();
        match ev {
            Some(ev) => bridge.handle_event(ev)?,
            None => return Ok(()),
        }
    }
}

fn assert_connected_pair(r: &Rig) {
    assert_eq!(r.host.state(), HandshakeState::Connected);
    assert_eq!(r.peer.state(), HandshakeState::Connected);
    assert!(r.host.is_connected() && r.peer.is_connected());

    // Identity segment is gone; the channel segment is present and fully
    // initialised.
    assert!(!IdentityBoard::exists(&r.cfg_host.identity_name));
    assert!(AudioChannel::exists(&r.cfg_host.channel_name));

    let host_ch = r.host.channel().expect("host channel");
    let peer_ch = r.peer.channel().expect("peer channel");
    assert!(host_ch.handshake_done());
    assert!(peer_ch.handshake_done());
    // Equal secrets prove both ends observe the same single creation.
    assert_eq!(host_ch.secret(), peer_ch.secret());
}

// The full walk from the host-first ordering: host publishes and waits,
// peer publishes and signals, host validates/creates/acks, peer maps.
#[test]
fn host_first_ordering_connects() {
    let mut r = rig("hs_host_first");

    r.host.start().expect("host start");
    assert_eq!(r.host.state(), HandshakeState::IdentityPublished);
    assert!(IdentityBoard::exists(&r.cfg_host.identity_name));
    assert!(r.peer_inbox.lock().unwrap().is_empty());

    r.peer.start().expect("peer start");
    assert_eq!(r.peer.state(), HandshakeState::PeerSignalSent);

    drain(&mut r.host, &r.host_inbox).expect("host drain");
    assert_eq!(r.host.state(), HandshakeState::Connected);
    assert!(!IdentityBoard::exists(&r.cfg_host.identity_name));

    drain(&mut r.peer, &r.peer_inbox).expect("peer drain");
    assert_connected_pair(&r);
}

#[test]
fn peer_first_ordering_connects() {
    let mut r = rig("hs_peer_first");

    r.peer.start().expect("peer start");
    assert_eq!(r.peer.state(), HandshakeState::IdentityPublished);

    r.host.start().expect("host start");
    assert_eq!(r.host.state(), HandshakeState::PeerSignalSent);

    drain(&mut r.peer, &r.peer_inbox).expect("peer drain");
    assert_eq!(r.peer.state(), HandshakeState::Connected);

    drain(&mut r.host, &r.host_inbox).expect("host drain");
    assert_connected_pair(&r);
}

// Both sides observe each other's identity before either handles a
// rendezvous, so both send one. Pids are equal here, so the role rule
// picks the host as creator; the peer ignores its incoming rendezvous and
// completes on the acknowledgment.
#[test]
fn simultaneous_start_converges_to_one_channel() {
    let mut r = rig("hs_simul");

    // Pre-publish the peer identity so the host's start sees it, without
    // the peer having handled anything yet.
    let pre = IdentityBoard::publish(&r.cfg_host.identity_name, Role::Peer).expect("pre-publish");
    drop(pre);

    r.host.start().expect("host start");
    r.peer.start().expect("peer start");
    assert_eq!(r.host.state(), HandshakeState::PeerSignalSent);
    assert_eq!(r.peer.state(), HandshakeState::PeerSignalSent);

    drain(&mut r.peer, &r.peer_inbox).expect("peer drain");
    // Peer lost the tie: still waiting, nothing created by it.
    assert_eq!(r.peer.state(), HandshakeState::PeerSignalSent);

    drain(&mut r.host, &r.host_inbox).expect("host drain");
    assert_eq!(r.host.state(), HandshakeState::Connected);

    drain(&mut r.peer, &r.peer_inbox).expect("peer drain 2");
    assert_connected_pair(&r);
}

#[test]
fn duplicate_delivery_after_connect_is_noop() {
    let mut r = rig("hs_dup");

    r.host.start().expect("host start");
    r.peer.start().expect("peer start");
    drain(&mut r.host, &r.host_inbox).expect("host drain");
    drain(&mut r.peer, &r.peer_inbox).expect("peer drain");
    assert_connected_pair(&r);

    let secret_before = r.host.channel().unwrap().secret().to_vec();

    // Late, duplicated, out-of-order deliveries to both ends.
    for bridge in [&mut r.host, &mut r.peer] {
        bridge.handle_event(SignalEvent::Rendezvous).expect("dup rendezvous");
        bridge.handle_event(SignalEvent::ChannelReady).expect("dup ack");
        bridge.handle_event(SignalEvent::Rendezvous).expect("dup rendezvous 2");
    }

    assert_connected_pair(&r);
    assert_eq!(r.host.channel().unwrap().secret(), &secret_before[..]);
    assert!(!IdentityBoard::exists(&r.cfg_host.identity_name));
}

#[test]
fn start_on_connected_bridge_is_noop() {
    let mut r = rig("hs_restart");

    r.host.start().expect("host start");
    r.peer.start().expect("peer start");
    drain(&mut r.host, &r.host_inbox).expect("host drain");
    drain(&mut r.peer, &r.peer_inbox).expect("peer drain");
    assert_connected_pair(&r);

    let secret_before = r.host.channel().unwrap().secret().to_vec();

    // Must not republish identity over the live connection or disturb the
    // channel; reconnection goes through disconnect() first.
    r.host.start().expect("redundant start");
    assert_eq!(r.host.state(), HandshakeState::Connected);
    assert!(r.host.is_connected());
    assert!(!IdentityBoard::exists(&r.cfg_host.identity_name));
    assert!(r.host_inbox.lock().unwrap().is_empty());
    assert!(r.peer_inbox.lock().unwrap().is_empty());
    assert_eq!(r.host.channel().unwrap().secret(), &secret_before[..]);
}

#[test]
fn validation_failure_creates_no_channel() {
    let mut r = rig("hs_reject");

    r.peer.start().expect("peer start");

    // Replace the host with one that rejects every peer.
    let mut host = Bridge::new(
        r.cfg_host.clone(),
        Box::new(RejectAll),
        Box::new(Loopback {
            peer_inbox: Arc::clone(&r.peer_inbox),
        }),
    );

    let err = host.start().unwrap_err();
    assert!(matches!(err, BridgeError::PeerValidationFailed { .. }));
    // Handshake does not proceed, but the machine is not closed: a
    // legitimate peer may still complete it later.
    assert_eq!(host.state(), HandshakeState::IdentityPublished);
    assert!(!AudioChannel::exists(&r.cfg_host.channel_name));

    IdentityBoard::clear_storage(&r.cfg_host.identity_name);
}

#[test]
fn rendezvous_without_identity_closes() {
    let mut r = rig("hs_no_identity");

    let err = r.host.handle_event(SignalEvent::Rendezvous).unwrap_err();
    assert!(matches!(err, BridgeError::HandshakeFailed { .. }));
    assert_eq!(r.host.state(), HandshakeState::Closed);
    assert!(!AudioChannel::exists(&r.cfg_host.channel_name));
}

#[test]
fn disconnect_tears_down_channel() {
    let mut r = rig("hs_disconnect");

    r.host.start().expect("host start");
    r.peer.start().expect("peer start");
    drain(&mut r.host, &r.host_inbox).expect("host drain");
    drain(&mut r.peer, &r.peer_inbox).expect("peer drain");
    assert_connected_pair(&r);

    r.host.disconnect();
    assert_eq!(r.host.state(), HandshakeState::Closed);
    assert!(!r.host.is_connected());
    assert!(!AudioChannel::exists(&r.cfg_host.channel_name));

    // The peer's mapping is still readable until it tears down too.
    assert!(r.peer.channel().unwrap().handshake_done());
    r.peer.disconnect();
}

#[test]
fn connected_channel_carries_audio() {
    let mut r = rig("hs_audio");

    r.host.start().expect("host start");
    r.peer.start().expect("peer start");
    drain(&mut r.host, &r.host_inbox).expect("host drain");
    drain(&mut r.peer, &r.peer_inbox).expect("peer drain");
    assert_connected_pair(&r);

    let producer = r.peer.channel().expect("peer channel");
    let consumer = r.host.channel().expect("host channel");

    producer.open_writer();
    producer.negotiate_block_size(128).expect("negotiate");
    assert_eq!(
        consumer
            .wait_block_size(std::time::Duration::from_secs(2))
            .expect("wait"),
        Some(128)
    );

    let left = vec![0.25f32; 128];
    let right = vec![-0.25f32; 128];
    producer.write_block(&left, &right).expect("write");

    let mut out_l = vec![0.0f32; 128];
    let mut out_r = vec![0.0f32; 128];
    let n = consumer.read_block(&mut out_l, &mut out_r).expect("read");
    assert_eq!(n, 128);
    assert_eq!(out_l, left);
    assert_eq!(out_r, right);

    producer.close_writer();
}
