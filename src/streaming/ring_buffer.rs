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
// SPSC ring buffer carrying stereo audio between the disk thread (producer)
// and the audio thread (consumer). Positions are monotonically increasing
// frame counters; the physical index is `position % RING_FRAMES`. The
// producer publishes data with a release store on `write_pos` and the
// consumer publishes consumption with a release store on `read_pos`, so the
// storage itself needs no synchronization: each side only touches the region
// the position invariant (0 <= write_pos - read_pos <= RING_FRAMES) assigns
// to it.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI64, Ordering};

use super::RING_FRAMES;

/// Number of channels carried by every ring buffer. Mono sources are
/// duplicated into both channels by the producer.
pub const RING_CHANNELS: usize = 2;

/// A bounded single-producer/single-consumer buffer of planar stereo frames.
///
/// The buffer is never cleared when frames are consumed; correctness comes
/// entirely from the two positions.
pub struct RingBuffer {
    /// Planar storage, `RING_CHANNELS * RING_FRAMES` long. Channel `c`
    /// occupies `[c * RING_FRAMES, (c + 1) * RING_FRAMES)`.
    data: UnsafeCell<Box<[f32]>>,
    /// Total frames ever written. Advanced only by the producer.
    write_pos: AtomicI64,
    /// Total frames ever consumed. Advanced only by the consumer.
    read_pos: AtomicI64,
}

// SAFETY: the storage is partitioned between exactly one producer and one
// consumer by the position counters. The producer writes only frames in
// [write_pos, read_pos + RING_FRAMES) and the consumer reads only frames in
// [read_pos, write_pos); each side learns the other's position through an
// acquire load that pairs with the release store made after the matching
// data access, so the regions never overlap and all reads see fully written
// frames.
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    pub fn new() -> Self {
        Self {
            data: UnsafeCell::new(vec![0.0; RING_CHANNELS * RING_FRAMES].into_boxed_slice()),
            write_pos: AtomicI64::new(0),
            read_pos: AtomicI64::new(0),
        }
    }

    /// Capacity in frames.
    pub fn capacity(&self) -> usize {
        RING_FRAMES
    }

    /// The producer's position: total frames written so far.
    pub fn write_pos(&self) -> i64 {
        self.write_pos.load(Ordering::Acquire)
    }

    /// The consumer's position: total frames released so far.
    pub fn read_pos(&self) -> i64 {
        self.read_pos.load(Ordering::Acquire)
    }

    /// Frames available to the consumer (`write_pos - read_pos`).
    pub fn samples_available(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        (write - read).max(0) as usize
    }

    /// Frames the producer may still write without overtaking the consumer.
    pub fn space_available(&self) -> usize {
        RING_FRAMES - self.samples_available()
    }

    /// Resets both positions to zero. Only valid while no producer is
    /// running for this buffer (the owning voice is inactive).
    pub fn reset(&self) {
        self.read_pos.store(0, Ordering::Release);
        self.write_pos.store(0, Ordering::Release);
    }

    /// Producer side: copies `frames` planar frames into the buffer starting
    /// at the current write position, wrapping at the capacity, then
    /// publishes the new write position with release ordering.
    ///
    /// The caller must ensure `frames <= space_available()`. Mono sources
    /// pass the same slice for both channels.
    pub fn write_frames(&self, left: &[f32], right: &[f32], frames: usize) {
        debug_assert!(frames <= self.space_available());
        debug_assert!(left.len() >= frames && right.len() >= frames);

        let write = self.write_pos.load(Ordering::Relaxed);
        let start = (write as usize) % RING_FRAMES;
        let first = frames.min(RING_FRAMES - start);

        // SAFETY: this region is exclusively the producer's; see the Sync
        // rationale above. Raw pointers avoid materializing a &mut over
        // storage the consumer is concurrently reading elsewhere in.
        unsafe {
            let base = (*self.data.get()).as_mut_ptr();
            for (channel, source) in [left, right].into_iter().enumerate() {
                let channel_base = base.add(channel * RING_FRAMES);
                std::ptr::copy_nonoverlapping(source.as_ptr(), channel_base.add(start), first);
                if frames > first {
                    std::ptr::copy_nonoverlapping(
                        source[first..].as_ptr(),
                        channel_base,
                        frames - first,
                    );
                }
            }
        }

        self.write_pos.store(write + frames as i64, Ordering::Release);
    }

    /// Consumer side: reads one sample at an absolute frame position,
    /// wrapped into the ring. The frame must lie in `[read_pos, write_pos)`.
    pub fn read_sample(&self, channel: usize, frame: i64) -> f32 {
        debug_assert!(channel < RING_CHANNELS);
        debug_assert!(frame >= 0);
        let index = channel * RING_FRAMES + (frame as usize) % RING_FRAMES;

        // SAFETY: frames below write_pos were published by the producer's
        // release store, which the consumer observed via an acquire load.
        unsafe { *(*self.data.get()).as_ptr().add(index) }
    }

    /// Consumer side: publishes that all frames before `pos` have been
    /// consumed and their storage may be overwritten.
    pub fn publish_read_pos(&self, pos: i64) {
        debug_assert!(pos >= self.read_pos.load(Ordering::Relaxed));
        self.read_pos.store(pos, Ordering::Release);
    }
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new()
    }
}
