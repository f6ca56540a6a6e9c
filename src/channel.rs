// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The long-lived audio channel segment.
//
// Created exactly once by whichever side wins the handshake; both
// processes then hold a mapped view for the connection lifetime. The
// layout is raw shared memory, not a serialized message: field order,
// sizes, and padding are load-bearing, hence the leading version stamp
// and the compile-time size assertion.
//
// Buffer handoff: the stored buffer-semaphore name is a stem from which a
// free/filled pair is derived, giving a single-producer single-consumer
// per-block exchange. The producer waits `free`, fills L/R, posts
// `filled`; the consumer does the reverse. The parameter semaphore is
// posted once the consumer-side block size has been negotiated.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rand::RngCore;

use crate::error::{BridgeError, Result};
use crate::semaphore::IpcSemaphore;
use crate::{ShmHandle, ShmOpenMode};

/// Fixed per-channel sample capacity (frames). Negotiated block sizes may
/// not exceed this.
pub const BUFFER_CAPACITY: usize = 4096;

/// Capacity of the secret field. The generated secret is shorter.
pub const SECRET_CAPACITY: usize = 64;

/// Bytes of fresh random secret written on creation.
pub const SECRET_LEN: usize = 32;

/// Capacity of each stored semaphore-name field.
pub const SEM_NAME_CAPACITY: usize = 64;

/// Wire-layout version stamp. Bump on any change to field order, size, or
/// padding; `open` rejects a mismatch.
pub const LAYOUT_VERSION: u32 = 1;

#[repr(C)]
struct ChannelLayout {
    layout_version: u32,
    secret: [u8; SECRET_CAPACITY],
    secret_len: u8,
    _pad0: [u8; 3],
    handshake_done: AtomicU32,
    param_sem_name: [u8; SEM_NAME_CAPACITY],
    param_sem_len: u8,
    _pad1: [u8; 3],
    buffer_sem_stem: [u8; SEM_NAME_CAPACITY],
    buffer_sem_len: u8,
    _pad2: [u8; 3],
    writer_open: AtomicU32,
    block_size: AtomicU32,
    left: [f32; BUFFER_CAPACITY],
    right: [f32; BUFFER_CAPACITY],
}

const _: () = assert!(std::mem::size_of::<ChannelLayout>() == 220 + 2 * 4 * BUFFER_CAPACITY);
const _: () = assert!(std::mem::align_of::<ChannelLayout>() == 4);

fn pack_name(field: &mut [u8; SEM_NAME_CAPACITY], len: &mut u8, name: &str) -> io::Result<()> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > SEM_NAME_CAPACITY {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("semaphore name '{name}' does not fit the wire field"),
        ));
    }
    field[..bytes.len()].copy_from_slice(bytes);
    *len = bytes.len() as u8;
    Ok(())
}

fn unpack_name(field: &[u8; SEM_NAME_CAPACITY], len: u8) -> io::Result<String> {
    let n = len as usize;
    if n == 0 || n > SEM_NAME_CAPACITY {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "bad semaphore name length in channel segment",
        ));
    }
    String::from_utf8(field[..n].to_vec())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Mapped view of the audio channel plus its pacing semaphores.
pub struct AudioChannel {
    shm: ShmHandle,
    param_sem: IpcSemaphore,
    free_sem: IpcSemaphore,
    filled_sem: IpcSemaphore,
    name: String,
    param_sem_name: String,
    buffer_sem_stem: String,
}

impl AudioChannel {
    /// Create the channel segment exclusively, initialise it with a fresh
    /// random secret and the semaphore names, create the pacing
    /// semaphores, and mark `handshake_done`.
    ///
    /// Called by the handshake winner only, after peer validation and
    /// before the channel-ready acknowledgment is sent — which is what
    /// lets the other side map and read immediately on receipt.
    pub fn create(name: &str, param_sem_name: &str, buffer_sem_stem: &str) -> Result<Self> {
        // A previous connection may have died without cleanup.
        ShmHandle::unlink_by_name(name);
        IpcSemaphore::clear_storage(param_sem_name);
        IpcSemaphore::clear_storage(&format!("{buffer_sem_stem}.free"));
        IpcSemaphore::clear_storage(&format!("{buffer_sem_stem}.filled"));

        let shm = ShmHandle::acquire(name, std::mem::size_of::<ChannelLayout>(), ShmOpenMode::Create)
            .map_err(|e| BridgeError::segment(name, e))?;

        let layout = shm.as_mut_ptr() as *mut ChannelLayout;
        // A half-initialised segment must not stay linked: unlink before
        // surfacing any failure past this point.
        if let Err(e) = unsafe { Self::init_layout(layout, param_sem_name, buffer_sem_stem) } {
            shm.unlink();
            return Err(BridgeError::segment(name, e));
        }

        let (param_sem, free_sem, filled_sem) =
            match Self::open_pacing(param_sem_name, buffer_sem_stem) {
                Ok(sems) => sems,
                Err(e) => {
                    shm.unlink();
                    IpcSemaphore::clear_storage(param_sem_name);
                    IpcSemaphore::clear_storage(&format!("{buffer_sem_stem}.free"));
                    IpcSemaphore::clear_storage(&format!("{buffer_sem_stem}.filled"));
                    return Err(e);
                }
            };

        // Published last: a mapper that sees handshake_done sees a fully
        // initialised segment.
        unsafe { (*layout).handshake_done.store(1, Ordering::Release) };

        tracing::info!(name, "audio channel created");
        Ok(Self {
            shm,
            param_sem,
            free_sem,
            filled_sem,
            name: name.to_owned(),
            param_sem_name: param_sem_name.to_owned(),
            buffer_sem_stem: buffer_sem_stem.to_owned(),
        })
    }

    /// Map an already-created channel segment and open its semaphores by
    /// the names stored in the segment.
    pub fn open(name: &str) -> Result<Self> {
        let shm = ShmHandle::acquire(name, std::mem::size_of::<ChannelLayout>(), ShmOpenMode::Open)
            .map_err(|e| BridgeError::segment(name, e))?;

        let layout = shm.as_ptr() as *const ChannelLayout;
        let version = unsafe { (*layout).layout_version };
        if version != LAYOUT_VERSION {
            return Err(BridgeError::segment(
                name,
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("channel layout version {version}, expected {LAYOUT_VERSION}"),
                ),
            ));
        }

        let (param_sem_name, buffer_sem_stem) = unsafe {
            (
                unpack_name(&(*layout).param_sem_name, (*layout).param_sem_len)
                    .map_err(|e| BridgeError::segment(name, e))?,
                unpack_name(&(*layout).buffer_sem_stem, (*layout).buffer_sem_len)
                    .map_err(|e| BridgeError::segment(name, e))?,
            )
        };

        let (param_sem, free_sem, filled_sem) =
            Self::open_pacing(&param_sem_name, &buffer_sem_stem)?;

        tracing::info!(name, "audio channel mapped");
        Ok(Self {
            shm,
            param_sem,
            free_sem,
            filled_sem,
            name: name.to_owned(),
            param_sem_name,
            buffer_sem_stem,
        })
    }

    /// Zero the segment and write every wire field except `handshake_done`.
    ///
    /// # Safety
    /// `layout` must point at a writable mapping of at least one
    /// `ChannelLayout`.
    unsafe fn init_layout(
        layout: *mut ChannelLayout,
        param_sem_name: &str,
        buffer_sem_stem: &str,
    ) -> io::Result<()> {
        std::ptr::write_bytes(layout, 0, 1);
        (*layout).layout_version = LAYOUT_VERSION;

        let mut secret = [0u8; SECRET_LEN];
        rand::thread_rng().fill_bytes(&mut secret);
        (&mut (*layout).secret)[..SECRET_LEN].copy_from_slice(&secret);
        (*layout).secret_len = SECRET_LEN as u8;

        pack_name(
            &mut (*layout).param_sem_name,
            &mut (*layout).param_sem_len,
            param_sem_name,
        )?;
        pack_name(
            &mut (*layout).buffer_sem_stem,
            &mut (*layout).buffer_sem_len,
            buffer_sem_stem,
        )?;
        Ok(())
    }

    /// Open the parameter semaphore and the free/filled pair derived from
    /// the buffer stem. Initial values are only applied by whichever side
    /// creates the semaphores first.
    fn open_pacing(
        param_sem_name: &str,
        buffer_sem_stem: &str,
    ) -> Result<(IpcSemaphore, IpcSemaphore, IpcSemaphore)> {
        let param_sem = IpcSemaphore::open(param_sem_name, 0)
            .map_err(|e| BridgeError::segment(param_sem_name, e))?;
        let free_name = format!("{buffer_sem_stem}.free");
        let filled_name = format!("{buffer_sem_stem}.filled");
        let free_sem =
            IpcSemaphore::open(&free_name, 1).map_err(|e| BridgeError::segment(&free_name, e))?;
        let filled_sem = IpcSemaphore::open(&filled_name, 0)
            .map_err(|e| BridgeError::segment(&filled_name, e))?;
        Ok((param_sem, free_sem, filled_sem))
    }

    fn layout(&self) -> *mut ChannelLayout {
        self.shm.as_mut_ptr() as *mut ChannelLayout
    }

    /// The connection secret. A placeholder wire field: generated fresh
    /// per connection but never compared by the receiving side.
    pub fn secret(&self) -> &[u8] {
        unsafe {
            let layout = self.layout();
            let n = ((*layout).secret_len as usize).min(SECRET_CAPACITY);
            &(&(*layout).secret)[..n]
        }
    }

    pub fn handshake_done(&self) -> bool {
        unsafe { (*self.layout()).handshake_done.load(Ordering::Acquire) != 0 }
    }

    // --- writer flag ---

    pub fn open_writer(&self) {
        unsafe { (*self.layout()).writer_open.store(1, Ordering::Release) };
    }

    pub fn close_writer(&self) {
        unsafe { (*self.layout()).writer_open.store(0, Ordering::Release) };
    }

    /// Buffer contents are meaningful only while this is true, and only up
    /// to the negotiated block size.
    pub fn is_writer_open(&self) -> bool {
        unsafe { (*self.layout()).writer_open.load(Ordering::Acquire) != 0 }
    }

    // --- block size negotiation ---

    /// Record the producer's block size and post the parameter semaphore.
    /// Fails iff `frames` exceeds the fixed buffer capacity.
    pub fn negotiate_block_size(&self, frames: usize) -> Result<()> {
        if frames > BUFFER_CAPACITY {
            return Err(BridgeError::BlockSizeExceedsCapacity {
                requested: frames,
                capacity: BUFFER_CAPACITY,
            });
        }
        unsafe { (*self.layout()).block_size.store(frames as u32, Ordering::Release) };
        self.param_sem
            .post()
            .map_err(|e| BridgeError::segment(&self.param_sem_name, e))?;
        tracing::debug!(frames, "block size negotiated");
        Ok(())
    }

    /// Currently negotiated block size in frames (0 until negotiated).
    pub fn block_size(&self) -> usize {
        unsafe { (*self.layout()).block_size.load(Ordering::Acquire) as usize }
    }

    /// Consumer side: wait until the producer has published its block
    /// size. `Ok(None)` on timeout.
    pub fn wait_block_size(&self, timeout: Duration) -> io::Result<Option<usize>> {
        if !self.param_sem.wait_timeout(timeout)? {
            return Ok(None);
        }
        Ok(Some(self.block_size()))
    }

    // --- per-block handoff ---

    /// The stored block size, clamped to the fixed buffer capacity and
    /// checked against the caller's buffers. The check happens before any
    /// semaphore wait, so a rejected call neither consumes nor produces a
    /// block. The clamp keeps a corrupted stored size from driving copies
    /// past the mapping.
    fn checked_block_size(&self, left_len: usize, right_len: usize) -> io::Result<usize> {
        let n = self.block_size().min(BUFFER_CAPACITY);
        if left_len < n || right_len < n {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("block is {n} frames but caller buffers hold {left_len}/{right_len}"),
            ));
        }
        Ok(n)
    }

    /// Producer: wait for the buffers to be free, copy one block in, and
    /// hand it to the consumer. Fails without touching the channel if
    /// `left` or `right` is shorter than the negotiated block size.
    pub fn write_block(&self, left: &[f32], right: &[f32]) -> io::Result<()> {
        let n = self.checked_block_size(left.len(), right.len())?;
        self.free_sem.wait()?;
        unsafe {
            let layout = self.layout();
            std::ptr::copy_nonoverlapping(left.as_ptr(), (*layout).left.as_mut_ptr(), n);
            std::ptr::copy_nonoverlapping(right.as_ptr(), (*layout).right.as_mut_ptr(), n);
        }
        self.filled_sem.post()
    }

    /// Consumer: wait for a filled block, copy it out, and release the
    /// buffers back to the producer. Returns the frames copied. Fails
    /// without consuming a block if the caller's buffers are too short.
    pub fn read_block(&self, left: &mut [f32], right: &mut [f32]) -> io::Result<usize> {
        let n = self.checked_block_size(left.len(), right.len())?;
        self.filled_sem.wait()?;
        self.copy_out(left, right, n);
        self.free_sem.post()?;
        Ok(n)
    }

    /// Like [`read_block`], but gives up after `timeout` so a consumer can
    /// notice a closed writer. `Ok(None)` on timeout.
    ///
    /// [`read_block`]: AudioChannel::read_block
    pub fn read_block_timeout(
        &self,
        left: &mut [f32],
        right: &mut [f32],
        timeout: Duration,
    ) -> io::Result<Option<usize>> {
        let n = self.checked_block_size(left.len(), right.len())?;
        if !self.filled_sem.wait_timeout(timeout)? {
            return Ok(None);
        }
        self.copy_out(left, right, n);
        self.free_sem.post()?;
        Ok(Some(n))
    }

    fn copy_out(&self, left: &mut [f32], right: &mut [f32], n: usize) {
        unsafe {
            let layout = self.layout();
            std::ptr::copy_nonoverlapping((*layout).left.as_ptr(), left.as_mut_ptr(), n);
            std::ptr::copy_nonoverlapping((*layout).right.as_ptr(), right.as_mut_ptr(), n);
        }
    }

    // --- lifecycle ---

    /// The channel segment's logical name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove the segment and its semaphores. Existing mappings stay valid
    /// until dropped; a vanished object is not an error.
    pub fn unlink(&self) {
        self.shm.unlink();
        IpcSemaphore::clear_storage(&self.param_sem_name);
        IpcSemaphore::clear_storage(&format!("{}.free", self.buffer_sem_stem));
        IpcSemaphore::clear_storage(&format!("{}.filled", self.buffer_sem_stem));
        tracing::info!(name = %self.name, "audio channel unlinked");
    }

    /// Whether a channel segment with this name currently exists.
    pub fn exists(name: &str) -> bool {
        ShmHandle::exists(name)
    }

    /// Remove a channel's backing objects without an open handle.
    pub fn clear_storage(name: &str, param_sem_name: &str, buffer_sem_stem: &str) {
        ShmHandle::unlink_by_name(name);
        IpcSemaphore::clear_storage(param_sem_name);
        IpcSemaphore::clear_storage(&format!("{buffer_sem_stem}.free"));
        IpcSemaphore::clear_storage(&format!("{buffer_sem_stem}.filled"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_names(prefix: &str) -> (String, String, String) {
        let pid = std::process::id();
        let names = (
            format!("{prefix}_c_{pid}"),
            format!("{prefix}_p_{pid}"),
            format!("{prefix}_b_{pid}"),
        );
        AudioChannel::clear_storage(&names.0, &names.1, &names.2);
        names
    }

    // The stored size is shared state another mapping can scribble over;
    // copies must never run past BUFFER_CAPACITY even when it does.
    #[test]
    fn oversized_stored_block_size_is_clamped() {
        let (chan_name, param, stem) = unique_names("ch_clamp");
        let chan = AudioChannel::create(&chan_name, &param, &stem).expect("create");

        unsafe { (*chan.layout()).block_size.store(u32::MAX, Ordering::Release) };
        assert_eq!(chan.block_size(), u32::MAX as usize);

        let left = vec![0.5f32; BUFFER_CAPACITY];
        let right = vec![-0.5f32; BUFFER_CAPACITY];
        chan.write_block(&left, &right).expect("write clamped");

        let mut out_l = vec![0.0f32; BUFFER_CAPACITY];
        let mut out_r = vec![0.0f32; BUFFER_CAPACITY];
        let n = chan.read_block(&mut out_l, &mut out_r).expect("read clamped");
        assert_eq!(n, BUFFER_CAPACITY);
        assert_eq!(out_l[BUFFER_CAPACITY - 1], 0.5);

        chan.unlink();
    }
}
