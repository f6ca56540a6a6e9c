// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Identity exchange: a small ephemeral segment that publishes each side's
// pid before any other shared state exists. Whichever process starts first
// creates it; the other reuses it. Each side writes only its own slot, so
// no lock is needed. The handshake coordinator unlinks the segment once
// the connection is established.

use std::sync::atomic::{AtomicI32, Ordering};

use crate::error::{BridgeError, Result};
use crate::{ShmHandle, ShmOpenMode};

/// Which end of the bridge this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The audio-production application.
    Host,
    /// The external synthesis/processing process.
    Peer,
}

impl Role {
    pub fn other(self) -> Role {
        match self {
            Role::Host => Role::Peer,
            Role::Peer => Role::Host,
        }
    }
}

/// Wire layout of the identity segment. One slot per role; 0 means unset.
#[repr(C)]
struct IdentitySlots {
    host_pid: AtomicI32,
    peer_pid: AtomicI32,
}

const _: () = assert!(std::mem::size_of::<IdentitySlots>() == 8);

/// Mapped view of the identity exchange segment.
pub struct IdentityBoard {
    shm: ShmHandle,
    role: Role,
}

impl IdentityBoard {
    /// Create-or-open the well-known segment and write the caller's pid
    /// into its role slot. The peer's slot is never touched, so publishing
    /// over an existing segment does not clobber an already-present peer.
    pub fn publish(name: &str, role: Role) -> Result<Self> {
        let shm = ShmHandle::acquire(
            name,
            std::mem::size_of::<IdentitySlots>(),
            ShmOpenMode::CreateOrOpen,
        )
        .map_err(|e| BridgeError::segment(name, e))?;

        let board = Self { shm, role };
        let own = std::process::id() as i32;
        board.own_slot().store(own, Ordering::Release);
        tracing::debug!(name, ?role, pid = own, "published identity");
        Ok(board)
    }

    fn slots(&self) -> &IdentitySlots {
        // The segment is created at exactly size_of::<IdentitySlots>() and
        // ftruncate zero-fills it, so all-zero is a valid initial state.
        unsafe { &*(self.shm.as_ptr() as *const IdentitySlots) }
    }

    fn own_slot(&self) -> &AtomicI32 {
        match self.role {
            Role::Host => &self.slots().host_pid,
            Role::Peer => &self.slots().peer_pid,
        }
    }

    fn peer_slot(&self) -> &AtomicI32 {
        match self.role {
            Role::Host => &self.slots().peer_pid,
            Role::Peer => &self.slots().host_pid,
        }
    }

    /// The pid this process published.
    pub fn local_pid(&self) -> i32 {
        self.own_slot().load(Ordering::Acquire)
    }

    /// The peer's published pid, or `None` if the peer has not published.
    pub fn peer_pid(&self) -> Option<i32> {
        match self.peer_slot().load(Ordering::Acquire) {
            0 => None,
            pid => Some(pid),
        }
    }

    /// Remove the backing segment. The mapping stays valid until this
    /// board is dropped; a missing segment is not an error.
    pub fn unlink(&self) {
        self.shm.unlink();
    }

    /// Whether the identity segment currently exists system-wide.
    pub fn exists(name: &str) -> bool {
        ShmHandle::exists(name)
    }

    /// Unlink a named identity segment without an open board.
    pub fn clear_storage(name: &str) {
        ShmHandle::unlink_by_name(name);
    }
}
