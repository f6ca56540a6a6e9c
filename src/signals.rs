// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Rendezvous signal plumbing.
//
// Handlers run preemptively and may interrupt arbitrary work, so they do
// nothing but set a static flag; shared-memory creation and teardown are
// deferred to the next pass of the owning process's control flow, which
// drains the flags through SignalHub::poll. Outgoing delivery goes through
// the Notifier seam so tests can run a whole handshake in one process
// without raising real signals.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

/// An asynchronous rendezvous notification from the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// "My identity is published — validate me and create the channel."
    Rendezvous,
    /// "The channel is created and initialised — map it."
    ChannelReady,
}

static RENDEZVOUS_PENDING: AtomicBool = AtomicBool::new(false);
static READY_PENDING: AtomicBool = AtomicBool::new(false);

// Async-signal-safe: a single relaxed store, nothing else.
extern "C" fn on_rendezvous(_signo: libc::c_int) {
    RENDEZVOUS_PENDING.store(true, Ordering::Relaxed);
}

extern "C" fn on_channel_ready(_signo: libc::c_int) {
    READY_PENDING.store(true, Ordering::Relaxed);
}

fn install_handler(signo: i32, handler: extern "C" fn(libc::c_int)) -> io::Result<()> {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = handler as usize;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut sa.sa_mask);
        if libc::sigaction(signo, &sa, std::ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Receiver side of the rendezvous signals.
///
/// Installation is process-wide (signal dispositions are), so only one hub
/// per process makes sense; creating a second with the same signal numbers
/// is harmless.
pub struct SignalHub {
    _priv: (),
}

impl SignalHub {
    /// Register flag-only handlers for the two bridge signals.
    pub fn install(rendezvous_signo: i32, ready_signo: i32) -> io::Result<Self> {
        install_handler(rendezvous_signo, on_rendezvous)?;
        install_handler(ready_signo, on_channel_ready)?;
        tracing::debug!(rendezvous_signo, ready_signo, "signal handlers installed");
        Ok(Self { _priv: () })
    }

    /// Take one pending event, rendezvous first. Each delivery is consumed
    /// exactly once; duplicate signals before a poll collapse into one
    /// event, which the coordinator's idempotency rule absorbs anyway.
    pub fn poll(&self) -> Option<SignalEvent> {
        if RENDEZVOUS_PENDING.swap(false, Ordering::Relaxed) {
            return Some(SignalEvent::Rendezvous);
        }
        if READY_PENDING.swap(false, Ordering::Relaxed) {
            return Some(SignalEvent::ChannelReady);
        }
        None
    }
}

/// Outgoing notification capability.
pub trait Notifier {
    fn notify(&self, pid: i32, event: SignalEvent) -> io::Result<()>;
}

/// Production notifier: delivers events as user signals via kill(2).
#[derive(Debug, Clone, Copy)]
pub struct ProcessNotifier {
    rendezvous_signo: i32,
    ready_signo: i32,
}

impl ProcessNotifier {
    pub fn new(rendezvous_signo: i32, ready_signo: i32) -> Self {
        Self {
            rendezvous_signo,
            ready_signo,
        }
    }
}

impl Notifier for ProcessNotifier {
    fn notify(&self, pid: i32, event: SignalEvent) -> io::Result<()> {
        let signo = match event {
            SignalEvent::Rendezvous => self.rendezvous_signo,
            SignalEvent::ChannelReady => self.ready_signo,
        };
        let ret = unsafe { libc::kill(pid as libc::pid_t, signo) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
