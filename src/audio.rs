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

//! Random-access audio file decoding.
//!
//! The disk streamer and the preload loader both read through the
//! [`AudioDecoder`] trait: a seekable, planar, f32 view of an audio file.
//! WAV files get a dedicated hound-backed decoder; everything else goes
//! through symphonia.

use std::path::Path;

pub mod error;
pub mod media;
pub mod output;
pub mod wav;

pub use error::DecoderError;

/// A seekable decoder for a single audio file.
///
/// `read` fills planar f32 channel buffers from an arbitrary source frame,
/// which is what both the preload loader (one big read from frame 0) and
/// the disk streamer (sequential chunked reads from the preload boundary
/// onward) need.
pub trait AudioDecoder: Send {
    /// Number of channels in the file.
    fn channels(&self) -> u16;

    /// Sample rate of the file in Hz.
    fn sample_rate(&self) -> u32;

    /// Total length of the file in frames.
    fn length_frames(&self) -> i64;

    /// Reads up to `num_frames` frames starting at source frame
    /// `source_start` into `dest[channel][dest_start..]`, one buffer per
    /// channel. Returns the number of frames actually delivered, which is
    /// less than `num_frames` only at end of file. `dest` must contain at
    /// least `channels()` buffers, each with room for
    /// `dest_start + num_frames` samples.
    fn read(
        &mut self,
        dest: &mut [Vec<f32>],
        dest_start: usize,
        num_frames: usize,
        source_start: i64,
    ) -> Result<usize, DecoderError>;
}

/// Opens a decoder for the given file, picking the implementation by
/// extension: `.wav` files use the hound fast path, everything else is
/// probed by symphonia.
pub fn open_decoder<P: AsRef<Path>>(path: P) -> Result<Box<dyn AudioDecoder>, DecoderError> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("wav") | Some("wave") => Ok(Box::new(wav::WavDecoder::open(path)?)),
        _ => Ok(Box::new(media::MediaDecoder::open(path)?)),
    }
}
