// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Peer validation: does a claimed pid denote a live process whose command
// line / executable path contains an expected fragment?
//
// This is deliberately weak. It rejects stale or recycled pids before we
// signal them; it does not authenticate a hostile process.

/// Capability for checking a published peer pid against an expected
/// process name fragment. One implementation per target OS; tests may
/// substitute their own.
pub trait PeerValidator {
    /// `true` iff `pid` is a live process whose command line or executable
    /// path contains `expected_fragment`. Any lookup failure (pid gone,
    /// introspection unavailable, no match) is `false`, never an error.
    fn validate(&self, pid: i32, expected_fragment: &str) -> bool;
}

/// The host OS's process-introspection-backed validator.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformValidator;

#[cfg(target_os = "linux")]
impl PeerValidator for PlatformValidator {
    fn validate(&self, pid: i32, expected_fragment: &str) -> bool {
        if pid <= 0 {
            return false;
        }
        let raw = match std::fs::read(format!("/proc/{pid}/cmdline")) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        // argv entries are NUL-separated; match against the whole blob.
        let cmdline = String::from_utf8_lossy(&raw);
        cmdline.contains(expected_fragment)
    }
}

#[cfg(target_os = "macos")]
impl PeerValidator for PlatformValidator {
    fn validate(&self, pid: i32, expected_fragment: &str) -> bool {
        use libproc::libproc::proc_pid::pidpath;

        if pid <= 0 {
            return false;
        }
        match pidpath(pid) {
            Ok(path) => path.contains(expected_fragment),
            Err(_) => false,
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
impl PeerValidator for PlatformValidator {
    fn validate(&self, _pid: i32, _expected_fragment: &str) -> bool {
        false
    }
}

/// Validator for the build target.
pub fn platform_validator() -> PlatformValidator {
    PlatformValidator
}
