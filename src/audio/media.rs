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
use std::fs::File;
use std::path::Path;
use std::time::Duration;

use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;
use symphonia::default::{get_codecs, get_probe};

use super::error::DecoderError;
use super::AudioDecoder;

/// A seekable decoder for compressed audio formats (FLAC, MP3, OGG, ...)
/// backed by symphonia. Decoded packets are buffered planar so sequential
/// reads never re-decode, and an out-of-order read seeks and resynchronizes.
pub struct MediaDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    channels: u16,
    sample_rate: u32,
    total_frames: i64,
    /// Source frame the next sequential `read` would start at.
    position: i64,
    /// Planar samples decoded from the most recent packet.
    pending: Vec<Vec<f32>>,
    /// Frames of `pending` already delivered (or skipped by a seek).
    pending_offset: usize,
}

impl MediaDecoder {
    /// Opens and probes an audio file.
    ///
    /// The file must declare its total length up front; disk streaming needs
    /// to know where the sample ends before it gets there. WAV and FLAC
    /// always do, and in practice so do the MP3/OGG files samplers ship.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DecoderError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            DecoderError::IoError(std::io::Error::new(
                e.kind(),
                format!("{}: {}", path.display(), e),
            ))
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(extension);
        }

        let meta_opts: MetadataOptions = Default::default();
        let fmt_opts: FormatOptions = Default::default();
        let probed = get_probe()
            .format(&hint, mss, &fmt_opts, &meta_opts)
            .map_err(|e| DecoderError::Unsupported(format!("{}: {}", path.display(), e)))?;

        let format = probed.format;
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| {
                DecoderError::Unsupported(format!("{}: no audio track", path.display()))
            })?;

        let track_id = track.id;
        let params = &track.codec_params;
        let sample_rate = params.sample_rate.ok_or_else(|| {
            DecoderError::Unsupported(format!("{}: sample rate not specified", path.display()))
        })?;
        let total_frames = params.n_frames.ok_or_else(|| {
            DecoderError::Unsupported(format!("{}: length not specified", path.display()))
        })? as i64;
        let channels = params.channels.map(|c| c.count() as u16).unwrap_or(0);

        let decoder = get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| DecoderError::Unsupported(format!("{}: {}", path.display(), e)))?;

        let mut source = Self {
            format,
            decoder,
            track_id,
            channels,
            sample_rate,
            total_frames,
            position: 0,
            pending: Vec::new(),
            pending_offset: 0,
        };

        // Some containers don't declare a channel count; derive it from the
        // first decoded packet, which then doubles as read-ahead for the
        // initial preload read.
        if source.channels == 0 {
            if !source.decode_next_packet()? {
                return Err(DecoderError::Unsupported(format!(
                    "{}: channels not specified",
                    path.display()
                )));
            }
            source.channels = source.pending.len() as u16;
        }

        Ok(source)
    }

    fn pending_frames(&self) -> usize {
        self.pending.first().map_or(0, |plane| plane.len())
    }

    /// Decodes packets until one for our track yields audio. Returns false
    /// at end of stream.
    fn decode_next_packet(&mut self) -> Result<bool, DecoderError> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(false);
                }
                // Some decoders report EOF as a decode error.
                Err(SymphoniaError::DecodeError(_)) => return Ok(false),
                Err(e) => return Err(DecoderError::AudioError(e)),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    match self.decoder.decode(&packet) {
                        Ok(decoded) => decoded,
                        Err(e) => return Err(DecoderError::AudioError(e)),
                    }
                }
                Err(e) => return Err(DecoderError::AudioError(e)),
            };

            if decoded.frames() == 0 {
                continue;
            }
            copy_planar(&decoded, &mut self.pending);
            self.pending_offset = 0;
            return Ok(true);
        }
    }

    /// Repositions the stream so the next delivered frame is `target`.
    fn seek_to(&mut self, target: i64) -> Result<(), DecoderError> {
        let time = Time::from(Duration::from_secs_f64(
            target as f64 / self.sample_rate as f64,
        ));
        let seeked = self.format.seek(
            SeekMode::Accurate,
            SeekTo::Time {
                time,
                track_id: Some(self.track_id),
            },
        )?;
        self.decoder.reset();
        for plane in &mut self.pending {
            plane.clear();
        }
        self.pending_offset = 0;

        // Accurate seeking still lands on a packet boundary at or before the
        // target; decode forward and discard the difference.
        let mut pos = seeked.actual_ts as i64;
        while pos < target {
            if !self.decode_next_packet()? {
                break;
            }
            let frames = self.pending_frames();
            let skip = frames.min((target - pos) as usize);
            self.pending_offset = skip;
            pos += skip as i64;
        }

        self.position = target;
        Ok(())
    }
}

impl AudioDecoder for MediaDecoder {
    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn length_frames(&self) -> i64 {
        self.total_frames
    }

    fn read(
        &mut self,
        dest: &mut [Vec<f32>],
        dest_start: usize,
        num_frames: usize,
        source_start: i64,
    ) -> Result<usize, DecoderError> {
        if source_start >= self.total_frames {
            return Ok(0);
        }
        if source_start != self.position {
            self.seek_to(source_start)?;
        }

        let channels = (self.channels as usize).min(dest.len());
        let mut written = 0usize;

        while written < num_frames {
            let available = self.pending_frames() - self.pending_offset;
            if available == 0 {
                if !self.decode_next_packet()? {
                    break;
                }
                continue;
            }

            let take = available.min(num_frames - written);
            for (channel, out) in dest.iter_mut().enumerate().take(channels) {
                let plane = &self.pending[channel];
                out[dest_start + written..dest_start + written + take]
                    .copy_from_slice(&plane[self.pending_offset..self.pending_offset + take]);
            }
            self.pending_offset += take;
            written += take;
        }

        self.position = source_start + written as i64;
        Ok(written)
    }
}

/// Converts a decoded buffer of any sample format into planar f32 planes,
/// reusing the destination's allocations.
fn copy_planar(decoded: &AudioBufferRef, pending: &mut Vec<Vec<f32>>) {
    let channels = decoded.spec().channels.count();
    pending.resize_with(channels, Vec::new);

    match decoded {
        AudioBufferRef::F32(buf) => copy_planes(buf, pending, |s| s),
        AudioBufferRef::F64(buf) => copy_planes(buf, pending, |s| s as f32),
        AudioBufferRef::S8(buf) => copy_planes(buf, pending, |s| s as f32 / (1i64 << 7) as f32),
        AudioBufferRef::S16(buf) => copy_planes(buf, pending, |s| s as f32 / (1i64 << 15) as f32),
        AudioBufferRef::S24(buf) => {
            copy_planes(buf, pending, |s| s.inner() as f32 / (1i64 << 23) as f32)
        }
        AudioBufferRef::S32(buf) => copy_planes(buf, pending, |s| s as f32 / (1i64 << 31) as f32),
        AudioBufferRef::U8(buf) => {
            copy_planes(buf, pending, |s| (s as f32 / u8::MAX as f32) * 2.0 - 1.0)
        }
        AudioBufferRef::U16(buf) => {
            copy_planes(buf, pending, |s| (s as f32 / u16::MAX as f32) * 2.0 - 1.0)
        }
        AudioBufferRef::U24(buf) => copy_planes(buf, pending, |s| {
            (s.inner() as f32 / ((1u32 << 24) - 1) as f32) * 2.0 - 1.0
        }),
        AudioBufferRef::U32(buf) => {
            copy_planes(buf, pending, |s| (s as f32 / u32::MAX as f32) * 2.0 - 1.0)
        }
    }
}

fn copy_planes<T, F>(buf: &AudioBuffer<T>, pending: &mut [Vec<f32>], convert: F)
where
    T: symphonia::core::sample::Sample,
    F: Fn(T) -> f32,
{
    let planes = buf.planes();
    for (channel, plane) in planes.planes().iter().enumerate().take(pending.len()) {
        let out = &mut pending[channel];
        out.clear();
        out.extend(plane.iter().map(|&sample| convert(sample)));
    }
}
