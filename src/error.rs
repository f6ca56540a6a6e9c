// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Bridge error taxonomy. Every failure here is local to the bridge: the
// host application logs it and runs without the external peer connected.

use std::io;

use thiserror::Error;

/// Errors reported by the bridge subsystem.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A shared region could not be created, opened, sized, or mapped.
    /// Non-fatal: the caller may retry or abort the connection attempt.
    #[error("shared segment '{name}' unavailable: {source}")]
    SegmentUnavailable {
        name: String,
        #[source]
        source: io::Error,
    },

    /// The published peer identifier does not resolve to a live process
    /// matching the expected name fragment. No channel is created.
    #[error("peer pid {pid} failed validation against '{expected}'")]
    PeerValidationFailed { pid: i32, expected: String },

    /// A handshake transition failed; the state machine is now `Closed`.
    #[error("handshake failed during {phase}: {reason}")]
    HandshakeFailed { phase: &'static str, reason: String },

    /// Block-size negotiation rejected: the request exceeds the fixed
    /// per-channel buffer capacity.
    #[error("block size {requested} exceeds buffer capacity {capacity}")]
    BlockSizeExceedsCapacity { requested: usize, capacity: usize },
}

impl BridgeError {
    pub(crate) fn segment(name: &str, source: io::Error) -> Self {
        Self::SegmentUnavailable {
            name: name.to_owned(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
