// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The handshake coordinator: sequences identity publication, peer
// validation, channel creation, and rendezvous signalling so that the two
// processes converge on a single connected channel no matter which side
// starts first — or whether both start at once.
//
// All bridge state lives in the Bridge value; nothing here is a global.
// Incoming signals arrive as SignalEvents drained from a SignalHub by the
// owning process's normal control flow (Bridge::pump), never handled
// inside a signal handler.

use crate::channel::AudioChannel;
use crate::error::{BridgeError, Result};
use crate::identity::{IdentityBoard, Role};
use crate::signals::{Notifier, SignalEvent, SignalHub};
use crate::validate::PeerValidator;

/// Default well-known names and signal numbers for a production bridge.
pub const DEFAULT_IDENTITY_NAME: &str = "audiolink_pids";
pub const DEFAULT_CHANNEL_NAME: &str = "audiolink_chan";
pub const DEFAULT_PARAM_SEM_NAME: &str = "audiolink_param";
pub const DEFAULT_BUFFER_SEM_STEM: &str = "audiolink_buf";

/// Bridge configuration: region names, semaphore stems, signal numbers,
/// and the expected peer name fragment. Both processes must agree on the
/// names and signals; they differ only in role and expected fragment.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub role: Role,
    pub identity_name: String,
    pub channel_name: String,
    pub param_sem_name: String,
    pub buffer_sem_stem: String,
    /// Substring expected in the peer's command line / executable path.
    pub expected_peer: String,
    pub rendezvous_signo: i32,
    pub ready_signo: i32,
}

impl BridgeConfig {
    /// Production defaults for the given role and expected peer fragment.
    pub fn new(role: Role, expected_peer: &str) -> Self {
        Self {
            role,
            identity_name: DEFAULT_IDENTITY_NAME.to_owned(),
            channel_name: DEFAULT_CHANNEL_NAME.to_owned(),
            param_sem_name: DEFAULT_PARAM_SEM_NAME.to_owned(),
            buffer_sem_stem: DEFAULT_BUFFER_SEM_STEM.to_owned(),
            expected_peer: expected_peer.to_owned(),
            rendezvous_signo: libc::SIGUSR1,
            ready_signo: libc::SIGUSR2,
        }
    }
}

/// Per-process handshake state. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    IdentityPublished,
    PeerSignalSent,
    PeerValidated,
    ChannelCreated,
    SecretExchanged,
    Connected,
    Closed,
}

/// The bridge context: owns the identity board, the channel (once
/// created or mapped), and the handshake state machine.
pub struct Bridge {
    cfg: BridgeConfig,
    validator: Box<dyn PeerValidator>,
    notifier: Box<dyn Notifier>,
    identity: Option<IdentityBoard>,
    channel: Option<AudioChannel>,
    state: HandshakeState,
    connected: bool,
    peer_pid: i32,
}

impl Bridge {
    pub fn new(
        cfg: BridgeConfig,
        validator: Box<dyn PeerValidator>,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        Self {
            cfg,
            validator,
            notifier,
            identity: None,
            channel: None,
            state: HandshakeState::Idle,
            connected: false,
            peer_pid: 0,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// The connected channel, once the handshake has completed.
    pub fn channel(&self) -> Option<&AudioChannel> {
        self.channel.as_ref()
    }

    /// The validated peer pid, once known.
    pub fn peer_pid(&self) -> Option<i32> {
        match self.peer_pid {
            0 => None,
            pid => Some(pid),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.cfg
    }

    fn local_pid(&self) -> i32 {
        std::process::id() as i32
    }

    /// Begin (or restart) a connection attempt: publish our identity and,
    /// if the peer is already present and validates, send it the
    /// rendezvous signal. Otherwise stay at `IdentityPublished` and wait
    /// to be signalled.
    ///
    /// A `SegmentUnavailable` here is non-fatal: state stays `Idle` and
    /// the caller may retry the whole attempt.
    ///
    /// Calling this on a connected bridge is a no-op; reconnection goes
    /// through [`Bridge::disconnect`] first.
    pub fn start(&mut self) -> Result<()> {
        if self.connected {
            tracing::debug!("start on a connected bridge ignored");
            return Ok(());
        }

        let board = IdentityBoard::publish(&self.cfg.identity_name, self.cfg.role)?;
        self.identity = Some(board);
        self.state = HandshakeState::IdentityPublished;

        let peer = match self.identity.as_ref().and_then(|b| b.peer_pid()) {
            Some(pid) => pid,
            None => {
                tracing::info!("no peer identity yet; waiting to be signalled");
                return Ok(());
            }
        };

        if !self.validator.validate(peer, &self.cfg.expected_peer) {
            tracing::warn!(peer, expected = %self.cfg.expected_peer, "peer identity failed validation");
            return Err(BridgeError::PeerValidationFailed {
                pid: peer,
                expected: self.cfg.expected_peer.clone(),
            });
        }

        self.notifier
            .notify(peer, SignalEvent::Rendezvous)
            .map_err(|e| self.fail("rendezvous-send", e.to_string()))?;
        self.peer_pid = peer;
        self.state = HandshakeState::PeerSignalSent;
        tracing::info!(peer, "peer validated, rendezvous sent");
        Ok(())
    }

    /// Drain pending signal events from `hub` through the state machine.
    /// Returns whether the bridge is connected afterwards.
    pub fn pump(&mut self, hub: &SignalHub) -> Result<bool> {
        while let Some(ev) = hub.poll() {
            self.handle_event(ev)?;
        }
        Ok(self.connected)
    }

    /// Feed one rendezvous event through the state machine.
    ///
    /// Both arms check the connected flag first: duplicate or out-of-order
    /// delivery after `Connected` must never re-create or re-destroy
    /// shared state.
    pub fn handle_event(&mut self, event: SignalEvent) -> Result<()> {
        match event {
            SignalEvent::Rendezvous => self.on_rendezvous(),
            SignalEvent::ChannelReady => self.on_channel_ready(),
        }
    }

    fn on_rendezvous(&mut self) -> Result<()> {
        if self.connected {
            tracing::debug!("rendezvous after connect ignored");
            return Ok(());
        }

        let peer = match self.identity.as_ref().and_then(|b| b.peer_pid()) {
            Some(pid) => pid,
            None => {
                return Err(self.fail("rendezvous", "signalled with no peer identity published".into()));
            }
        };

        // Simultaneous start: both sides published, both signalled. The
        // lower pid creates the channel; equal pids (both ends in one
        // process) break on role, Host wins. The loser ignores this
        // rendezvous and waits for the channel-ready acknowledgment.
        if self.state == HandshakeState::PeerSignalSent && !self.wins_tie(peer) {
            tracing::info!(peer, "simultaneous rendezvous, peer is channel creator; waiting for ack");
            return Ok(());
        }

        if !self.validator.validate(peer, &self.cfg.expected_peer) {
            tracing::warn!(peer, expected = %self.cfg.expected_peer, "rendezvous from invalid peer ignored");
            return Err(BridgeError::PeerValidationFailed {
                pid: peer,
                expected: self.cfg.expected_peer.clone(),
            });
        }
        self.peer_pid = peer;
        self.state = HandshakeState::PeerValidated;

        let channel = AudioChannel::create(
            &self.cfg.channel_name,
            &self.cfg.param_sem_name,
            &self.cfg.buffer_sem_stem,
        )
        .map_err(|e| self.fail("channel-create", e.to_string()))?;
        self.state = HandshakeState::ChannelCreated;

        // The fresh secret and semaphore names were written before
        // handshake_done was published, so the ack receiver may map and
        // read immediately.
        self.state = HandshakeState::SecretExchanged;

        self.notifier
            .notify(peer, SignalEvent::ChannelReady)
            .map_err(|e| self.fail("ack-send", e.to_string()))?;

        if let Some(board) = self.identity.take() {
            board.unlink();
        }

        self.channel = Some(channel);
        self.connected = true;
        self.state = HandshakeState::Connected;
        tracing::info!(peer, "handshake complete (channel creator)");
        Ok(())
    }

    fn on_channel_ready(&mut self) -> Result<()> {
        if self.connected {
            tracing::debug!("channel-ready after connect ignored");
            return Ok(());
        }

        let channel = AudioChannel::open(&self.cfg.channel_name)
            .map_err(|e| self.fail("channel-map", e.to_string()))?;

        // The creator already unlinked the identity segment; dropping the
        // board just unmaps our view. Unlinking again is harmless.
        if let Some(board) = self.identity.take() {
            board.unlink();
        }

        self.channel = Some(channel);
        self.connected = true;
        self.state = HandshakeState::Connected;
        tracing::info!("handshake complete (channel mapped)");
        Ok(())
    }

    fn wins_tie(&self, peer: i32) -> bool {
        let local = self.local_pid();
        if local != peer {
            return local < peer;
        }
        self.cfg.role == Role::Host
    }

    fn fail(&mut self, phase: &'static str, reason: String) -> BridgeError {
        tracing::warn!(phase, %reason, "handshake failed");
        self.state = HandshakeState::Closed;
        BridgeError::HandshakeFailed { phase, reason }
    }

    /// Tear the connection down: close the writer flag, unlink the channel
    /// and any leftover identity segment, and move to `Closed`. The bridge
    /// may be restarted with [`Bridge::start`] afterwards.
    pub fn disconnect(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.close_writer();
            channel.unlink();
        }
        if let Some(board) = self.identity.take() {
            board.unlink();
        }
        self.connected = false;
        self.peer_pid = 0;
        self.state = HandshakeState::Closed;
        tracing::info!("bridge disconnected");
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        // Unlink-on-exit is the coordinator's responsibility; only the
        // side that owns the channel segment removes it.
        if self.channel.is_some() {
            self.disconnect();
        }
    }
}
