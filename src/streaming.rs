// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Direct-from-disk streaming: the shared per-voice stream state, the SPSC
//! ring buffer, and the background disk reader that keeps the rings full.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

pub mod ring_buffer;
pub mod streamer;

pub use ring_buffer::RingBuffer;
pub use streamer::DiskStreamer;

/// Ring buffer size in frames (~743ms at 44.1kHz).
pub const RING_FRAMES: usize = 32768;

/// A voice requests more data when its ring falls below this (~185ms at 44.1kHz).
pub const LOW_WATERMARK_FRAMES: usize = 8192;

/// Batch size for disk reads (~93ms at 44.1kHz).
pub const DISK_READ_FRAMES: usize = 4096;

/// Size of the voice pool.
pub const MAX_VOICES: usize = 64;

/// Disk thread polling interval.
pub const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Length of the linear fade applied when the audio thread overtakes the
/// disk thread, so an underrun never clicks.
pub const UNDERRUN_FADE_FRAMES: u32 = 64;

/// Bytes of each sample kept resident in RAM (f32 samples, all channels).
pub const PRELOAD_BYTES: usize = 65536;

/// Identifies a sample descriptor without holding a reference to it: the
/// catalog generation it belongs to plus its index within that catalog.
/// The disk thread resolves handles against its own catalog snapshot, so a
/// stale handle (from before an instrument reload) simply fails to resolve
/// instead of dangling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleHandle {
    pub generation: u32,
    pub index: u32,
}

impl SampleHandle {
    const NONE_BITS: u64 = u64::MAX;

    pub fn pack(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    pub fn unpack(bits: u64) -> Option<Self> {
        if bits == Self::NONE_BITS {
            return None;
        }
        Some(Self {
            generation: (bits >> 32) as u32,
            index: bits as u32,
        })
    }
}

/// The disk-thread-facing half of a voice: the ring buffer plus the atomic
/// flags and positions both threads coordinate through.
///
/// The audio thread owns all transitions of `active`; everything it writes
/// during voice start is published by the final release store of
/// `active = true`, so a disk thread that observes `active` also observes
/// the sample handle and file position that go with it.
pub struct StreamState {
    ring: RingBuffer,
    active: AtomicBool,
    needs_data: AtomicBool,
    end_of_file: AtomicBool,
    read_error: AtomicBool,
    /// Next source frame the disk thread should read.
    file_read_pos: AtomicI64,
    /// Packed `SampleHandle`, or `SampleHandle::NONE_BITS` while idle.
    sample_handle: AtomicU64,
}

impl StreamState {
    pub fn new() -> Self {
        Self {
            ring: RingBuffer::new(),
            active: AtomicBool::new(false),
            needs_data: AtomicBool::new(false),
            end_of_file: AtomicBool::new(false),
            read_error: AtomicBool::new(false),
            file_read_pos: AtomicI64::new(0),
            sample_handle: AtomicU64::new(SampleHandle::NONE_BITS),
        }
    }

    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Publishes the voice as active. Must be the last store of voice start.
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub fn needs_more_data(&self) -> bool {
        self.needs_data.load(Ordering::Acquire)
    }

    pub fn set_needs_data(&self) {
        self.needs_data.store(true, Ordering::Release);
    }

    pub fn clear_needs_data(&self) {
        self.needs_data.store(false, Ordering::Release);
    }

    pub fn at_end_of_file(&self) -> bool {
        self.end_of_file.load(Ordering::Acquire)
    }

    pub fn set_end_of_file(&self, eof: bool) {
        self.end_of_file.store(eof, Ordering::Release);
    }

    pub fn has_read_error(&self) -> bool {
        self.read_error.load(Ordering::Acquire)
    }

    pub fn set_read_error(&self, error: bool) {
        self.read_error.store(error, Ordering::Release);
    }

    pub fn file_read_pos(&self) -> i64 {
        self.file_read_pos.load(Ordering::Acquire)
    }

    pub fn set_file_read_pos(&self, pos: i64) {
        self.file_read_pos.store(pos, Ordering::Release);
    }

    pub fn sample_handle(&self) -> Option<SampleHandle> {
        SampleHandle::unpack(self.sample_handle.load(Ordering::Acquire))
    }

    pub fn set_sample_handle(&self, handle: Option<SampleHandle>) {
        let bits = handle.map_or(SampleHandle::NONE_BITS, SampleHandle::pack);
        self.sample_handle.store(bits, Ordering::Release);
    }
}

impl Default for StreamState {
    fn default() -> Self {
        Self::new()
    }
}
