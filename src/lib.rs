// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// audiolink: shared-memory rendezvous and audio-exchange bridge between a
// DAW host process and an external synthesis peer. Process discovery,
// weak peer validation, a signal-driven handshake, and a long-lived
// audio/configuration channel — POSIX shm and user signals only.

pub mod shm_name;

mod platform;

mod shm;
pub use shm::{ShmHandle, ShmOpenMode};

mod semaphore;
pub use semaphore::IpcSemaphore;

pub mod error;
pub use error::{BridgeError, Result};

mod identity;
pub use identity::{IdentityBoard, Role};

mod validate;
pub use validate::{platform_validator, PeerValidator, PlatformValidator};

mod signals;
pub use signals::{Notifier, ProcessNotifier, SignalEvent, SignalHub};

mod channel;
pub use channel::{
    AudioChannel, BUFFER_CAPACITY, LAYOUT_VERSION, SECRET_CAPACITY, SECRET_LEN, SEM_NAME_CAPACITY,
};

mod handshake;
pub use handshake::{
    Bridge, BridgeConfig, HandshakeState, DEFAULT_BUFFER_SEM_STEM, DEFAULT_CHANNEL_NAME,
    DEFAULT_IDENTITY_NAME, DEFAULT_PARAM_SEM_NAME,
};
