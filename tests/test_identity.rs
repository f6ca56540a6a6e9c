// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Identity exchange tests: single-writer-per-field discipline, reuse of an
// existing segment, and explicit unlink.

use std::sync::atomic::{AtomicUsize, Ordering};

use audiolink::{IdentityBoard, Role};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{}_{n}", std::process::id())
}

#[test]
fn publish_creates_segment() {
    let name = unique_name("id_create");
    IdentityBoard::clear_storage(&name);

    let board = IdentityBoard::publish(&name, Role::Host).expect("publish");
    assert!(IdentityBoard::exists(&name));
    assert_eq!(board.local_pid(), std::process::id() as i32);

    board.unlink();
}

#[test]
fn peer_unset_until_published() {
    let name = unique_name("id_unset");
    IdentityBoard::clear_storage(&name);

    let host = IdentityBoard::publish(&name, Role::Host).expect("publish host");
    assert_eq!(host.peer_pid(), None);

    let peer = IdentityBoard::publish(&name, Role::Peer).expect("publish peer");
    assert_eq!(host.peer_pid(), Some(std::process::id() as i32));
    assert_eq!(peer.peer_pid(), Some(std::process::id() as i32));

    host.unlink();
}

#[test]
fn republish_does_not_clobber_peer_slot() {
    let name = unique_name("id_reuse");
    IdentityBoard::clear_storage(&name);

    let peer = IdentityBoard::publish(&name, Role::Peer).expect("publish peer");
    // Host publishing over the existing segment must leave the peer slot
    // intact.
    let host = IdentityBoard::publish(&name, Role::Host).expect("publish host");
    assert_eq!(host.peer_pid(), Some(std::process::id() as i32));
    assert_eq!(peer.peer_pid(), Some(std::process::id() as i32));

    // A second host publish (restarted attempt) also leaves it intact.
    let host2 = IdentityBoard::publish(&name, Role::Host).expect("republish host");
    assert_eq!(host2.peer_pid(), Some(std::process::id() as i32));

    host.unlink();
}

#[test]
fn unlink_removes_segment() {
    let name = unique_name("id_unlink");
    IdentityBoard::clear_storage(&name);

    let board = IdentityBoard::publish(&name, Role::Host).expect("publish");
    assert!(IdentityBoard::exists(&name));

    board.unlink();
    assert!(!IdentityBoard::exists(&name));

    // The mapping remains readable after unlink, and unlinking again does
    // not error.
    assert_eq!(board.local_pid(), std::process::id() as i32);
    board.unlink();
}
