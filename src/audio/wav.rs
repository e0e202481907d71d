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
use std::io::BufReader;
use std::path::Path;

use hound::WavReader;

use super::error::DecoderError;
use super::AudioDecoder;

/// A seekable WAV decoder backed by hound. This is the fast path for the
/// format samplers overwhelmingly ship in; no probing or packet framing.
pub struct WavDecoder {
    reader: WavReader<BufReader<File>>,
    channels: u16,
    sample_rate: u32,
    total_frames: i64,
    bits_per_sample: u16,
    float_format: bool,
    /// Source frame the next sequential read would start at.
    position: i64,
}

impl WavDecoder {
    /// Opens a WAV file for random-access decoding.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DecoderError> {
        let path = path.as_ref();
        let reader = WavReader::open(path).map_err(|e| match e {
            hound::Error::IoError(io) => DecoderError::IoError(std::io::Error::new(
                io.kind(),
                format!("{}: {}", path.display(), io),
            )),
            other => DecoderError::WavError(other),
        })?;
        let spec = reader.spec();
        let total_frames = i64::from(reader.duration());

        Ok(Self {
            reader,
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            total_frames,
            bits_per_sample: spec.bits_per_sample,
            float_format: spec.sample_format == hound::SampleFormat::Float,
            position: 0,
        })
    }
}

impl AudioDecoder for WavDecoder {
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
        let channels = self.channels as usize;
        if source_start >= self.total_frames {
            return Ok(0);
        }

        if source_start != self.position {
            self.reader.seek(source_start as u32)?;
            self.position = source_start;
        }

        let frames_left = (self.total_frames - source_start) as usize;
        let frames_to_read = num_frames.min(frames_left);
        let samples_to_read = frames_to_read * channels;
        let mut samples_read = 0usize;

        if self.float_format {
            for result in self.reader.samples::<f32>().take(samples_to_read) {
                let sample = result?;
                dest[samples_read % channels][dest_start + samples_read / channels] = sample;
                samples_read += 1;
            }
        } else {
            // Scale integer samples to [-1.0, 1.0) by the declared bit depth.
            let scale = 1.0 / (1i64 << (self.bits_per_sample - 1)) as f32;
            for result in self.reader.samples::<i32>().take(samples_to_read) {
                let sample = result?;
                dest[samples_read % channels][dest_start + samples_read / channels] =
                    sample as f32 * scale;
                samples_read += 1;
            }
        }

        let frames_read = samples_read / channels;
        self.position = source_start + frames_read as i64;
        Ok(frames_read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{write_wav_f32, write_wav_i16};

    fn planar_dest(channels: usize, frames: usize) -> Vec<Vec<f32>> {
        vec![vec![0.0; frames]; channels]
    }

    #[test]
    fn test_read_float_mono() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("mono.wav");
        let samples: Vec<f32> = (0..500).map(|i| (i as f32) / 500.0).collect();
        write_wav_f32(&path, &[samples.clone()], 44100).unwrap();

        let mut decoder = WavDecoder::open(&path).unwrap();
        assert_eq!(decoder.channels(), 1);
        assert_eq!(decoder.length_frames(), 500);

        let mut dest = planar_dest(1, 500);
        let read = decoder.read(&mut dest, 0, 500, 0).unwrap();
        assert_eq!(read, 500);
        assert_eq!(dest[0], samples);
    }

    #[test]
    fn test_read_stereo_deinterleaves() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("stereo.wav");
        let left: Vec<f32> = (0..100).map(|i| i as f32 / 100.0).collect();
        let right: Vec<f32> = (0..100).map(|i| -(i as f32) / 100.0).collect();
        write_wav_f32(&path, &[left.clone(), right.clone()], 48000).unwrap();

        let mut decoder = WavDecoder::open(&path).unwrap();
        assert_eq!(decoder.channels(), 2);
        assert_eq!(decoder.sample_rate(), 48000);

        let mut dest = planar_dest(2, 100);
        let read = decoder.read(&mut dest, 0, 100, 0).unwrap();
        assert_eq!(read, 100);
        assert_eq!(dest[0], left);
        assert_eq!(dest[1], right);
    }

    #[test]
    fn test_seek_and_sequential_reads() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("seek.wav");
        let samples: Vec<f32> = (0..1000).map(|i| i as f32).collect();
        write_wav_f32(&path, &[samples], 44100).unwrap();

        let mut decoder = WavDecoder::open(&path).unwrap();
        let mut dest = planar_dest(1, 10);

        // Jump into the middle, then read sequentially across the boundary.
        let read = decoder.read(&mut dest, 0, 10, 600).unwrap();
        assert_eq!(read, 10);
        assert_eq!(dest[0][0], 600.0);
        let read = decoder.read(&mut dest, 0, 10, 610).unwrap();
        assert_eq!(read, 10);
        assert_eq!(dest[0][0], 610.0);

        // Jump backwards.
        let read = decoder.read(&mut dest, 0, 10, 5).unwrap();
        assert_eq!(read, 10);
        assert_eq!(dest[0][0], 5.0);
    }

    #[test]
    fn test_short_read_at_end_of_file() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("short.wav");
        let samples: Vec<f32> = (0..50).map(|i| i as f32).collect();
        write_wav_f32(&path, &[samples], 44100).unwrap();

        let mut decoder = WavDecoder::open(&path).unwrap();
        let mut dest = planar_dest(1, 100);
        let read = decoder.read(&mut dest, 0, 100, 40).unwrap();
        assert_eq!(read, 10);
        assert_eq!(dest[0][9], 49.0);

        let read = decoder.read(&mut dest, 0, 100, 50).unwrap();
        assert_eq!(read, 0);
    }

    #[test]
    fn test_int_samples_are_scaled() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("int.wav");
        write_wav_i16(&path, &[vec![i16::MAX, 0, i16::MIN]], 44100).unwrap();

        let mut decoder = WavDecoder::open(&path).unwrap();
        let mut dest = planar_dest(1, 3);
        let read = decoder.read(&mut dest, 0, 3, 0).unwrap();
        assert_eq!(read, 3);
        assert!((dest[0][0] - (i16::MAX as f32 / 32768.0)).abs() < 1e-6);
        assert_eq!(dest[0][1], 0.0);
        assert_eq!(dest[0][2], -1.0);
    }

    #[test]
    fn test_dest_start_offset() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("offset.wav");
        let samples: Vec<f32> = vec![0.25, 0.5, 0.75];
        write_wav_f32(&path, &[samples], 44100).unwrap();

        let mut decoder = WavDecoder::open(&path).unwrap();
        let mut dest = planar_dest(1, 10);
        let read = decoder.read(&mut dest, 4, 3, 0).unwrap();
        assert_eq!(read, 3);
        assert_eq!(&dest[0][4..7], &[0.25, 0.5, 0.75]);
        assert_eq!(dest[0][0], 0.0);
    }
}
