// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named POSIX semaphore (sem_open/sem_wait/sem_post).
//
// Used by the audio channel for the parameter-published notification and
// the per-block free/filled handoff pair. Names go through make_shm_name
// so both processes agree on the platform form.

use std::ffi::CString;
use std::io;
use std::time::{Duration, Instant};

use crate::shm_name;

/// A named, inter-process counting semaphore.
///
/// Dropping the handle closes it in this process only; the kernel object
/// persists until [`IpcSemaphore::clear_storage`] unlinks it.
pub struct IpcSemaphore {
    sem: *mut libc::sem_t,
    name: String,
}

unsafe impl Send for IpcSemaphore {}
unsafe impl Sync for IpcSemaphore {}

impl IpcSemaphore {
    /// Open (or create) a named semaphore with `initial` count.
    ///
    /// An existing semaphore is reused with its current count; `initial`
    /// only applies on creation.
    pub fn open(name: &str, initial: u32) -> io::Result<Self> {
        let posix_name = shm_name::make_shm_name(name);
        let c_name = CString::new(posix_name.as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT,
                0o666 as libc::c_uint,
                initial as libc::c_uint,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            sem,
            name: posix_name,
        })
    }

    /// Block until the count is positive, then decrement it.
    /// Retries on EINTR.
    pub fn wait(&self) -> io::Result<()> {
        loop {
            let ret = unsafe { libc::sem_wait(self.sem) };
            if ret == 0 {
                return Ok(());
            }
            let e = io::Error::last_os_error();
            if e.raw_os_error() != Some(libc::EINTR) {
                return Err(e);
            }
        }
    }

    /// Decrement the count if positive, without blocking.
    /// Returns `Ok(false)` if the count was zero.
    pub fn try_wait(&self) -> io::Result<bool> {
        let ret = unsafe { libc::sem_trywait(self.sem) };
        if ret == 0 {
            return Ok(true);
        }
        match io::Error::last_os_error() {
            e if e.raw_os_error() == Some(libc::EAGAIN) => Ok(false),
            e if e.raw_os_error() == Some(libc::EINTR) => Ok(false),
            e => Err(e),
        }
    }

    /// Wait with a timeout. Returns `Ok(true)` if acquired, `Ok(false)` on
    /// timeout.
    ///
    /// macOS lacks sem_timedwait, so this is emulated with try_wait polling
    /// on all platforms; the bridge only uses it on non-realtime paths.
    pub fn wait_timeout(&self, timeout: Duration) -> io::Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_wait()? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_micros(200));
        }
    }

    /// Increment the count, waking one waiter.
    pub fn post(&self) -> io::Result<()> {
        let ret = unsafe { libc::sem_post(self.sem) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// The platform name used to open the semaphore.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unlink a named semaphore. Missing objects are ignored.
    pub fn clear_storage(name: &str) {
        let posix_name = shm_name::make_shm_name(name);
        if let Ok(c_name) = CString::new(posix_name.as_bytes()) {
            unsafe { libc::sem_unlink(c_name.as_ptr()) };
        }
    }
}

impl Drop for IpcSemaphore {
    fn drop(&mut self) {
        unsafe { libc::sem_close(self.sem) };
    }
}
