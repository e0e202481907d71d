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

//! A single polyphonic voice.
//!
//! The voice renders on the audio thread: it interpolates the source at the
//! note's pitch ratio, applies velocity and the ADSR envelope, and adds
//! into the output block. Small samples read straight from the preload
//! buffer; streaming samples read from the voice's ring buffer, which the
//! disk thread refills through the shared [`StreamState`]. If the read
//! position ever catches the write position, the voice fades itself out
//! over a few dozen frames instead of clicking or stalling.

use std::sync::Arc;

use crate::engine::envelope::{Adsr, AdsrParams};
use crate::instrument::PreloadedSample;
use crate::streaming::{
    SampleHandle, StreamState, LOW_WATERMARK_FRAMES, UNDERRUN_FADE_FRAMES,
};

/// Frequency of a MIDI note in Hz (A4 = 440).
pub(crate) fn midi_note_to_hz(note: u8) -> f64 {
    440.0 * 2f64.powf((note as f64 - 69.0) / 12.0)
}

pub struct Voice {
    /// Disk-thread-facing state; shared with the streamer.
    stream: Arc<StreamState>,
    envelope: Adsr,
    /// The sample being played. The Arc keeps the descriptor alive even if
    /// the catalog is replaced while the voice is still sounding.
    sample: Option<Arc<PreloadedSample>>,
    playing_note: i8,
    velocity: f32,
    pitch_ratio: f64,
    /// Fractional frame position in the source file.
    source_position: f64,
    sustained_by_pedal: bool,
    underrunning: bool,
    underrun_fade_pos: u32,
}

impl Voice {
    pub fn new(stream: Arc<StreamState>) -> Self {
        Self {
            stream,
            envelope: Adsr::new(),
            sample: None,
            playing_note: -1,
            velocity: 0.0,
            pitch_ratio: 1.0,
            source_position: 0.0,
            sustained_by_pedal: false,
            underrunning: false,
            underrun_fade_pos: 0,
        }
    }

    pub fn prepare(&mut self, sample_rate: f64) {
        self.envelope.set_sample_rate(sample_rate);
    }

    pub fn set_adsr_parameters(&mut self, params: AdsrParams) {
        self.envelope.set_parameters(params);
    }

    pub fn stream(&self) -> &Arc<StreamState> {
        &self.stream
    }

    pub fn is_active(&self) -> bool {
        self.stream.is_active()
    }

    /// The note this voice is playing, or -1 when idle.
    pub fn playing_note(&self) -> i8 {
        self.playing_note
    }

    pub fn is_sustained_by_pedal(&self) -> bool {
        self.sustained_by_pedal
    }

    pub fn current_sample(&self) -> Option<&Arc<PreloadedSample>> {
        self.sample.as_ref()
    }

    /// Starts the voice on a sample. The voice must be idle.
    ///
    /// Everything is set up before the final `set_active(true)`: its release
    /// ordering is what publishes the sample handle, positions, and flags to
    /// the disk thread.
    pub fn start(
        &mut self,
        sample: Arc<PreloadedSample>,
        handle: SampleHandle,
        note: u8,
        velocity: f32,
        host_sample_rate: f64,
    ) {
        debug_assert!(!self.stream.is_active());

        let frequency_of_note = midi_note_to_hz(note);
        let frequency_of_root = midi_note_to_hz(sample.root_note);
        self.pitch_ratio =
            frequency_of_note / frequency_of_root * (sample.source_sample_rate / host_sample_rate);

        self.playing_note = note as i8;
        self.velocity = velocity;
        self.source_position = 0.0;
        self.sustained_by_pedal = false;
        self.underrunning = false;
        self.underrun_fade_pos = 0;

        // Seed the ring buffer with the preload so playback starts with
        // zero latency; the disk thread picks up from the preload boundary.
        let ring = self.stream.ring();
        ring.reset();
        let frames = sample.preload_frames().min(ring.capacity());
        let left = &sample.preload[0][..frames];
        let right = if sample.channels >= 2 {
            &sample.preload[1][..frames]
        } else {
            left
        };
        ring.write_frames(left, right, frames);

        self.stream.set_file_read_pos(frames as i64);
        self.stream.set_end_of_file(false);
        self.stream.set_read_error(false);
        self.stream.set_sample_handle(Some(handle));

        self.envelope.note_on();

        if sample.needs_streaming() {
            self.stream.set_needs_data();
        } else {
            self.stream.clear_needs_data();
        }
        self.sample = Some(sample);

        self.stream.set_active(true);
    }

    /// Stops the voice, either letting the envelope release or cutting it
    /// immediately (used by voice stealing).
    pub fn stop(&mut self, allow_tail_off: bool) {
        if allow_tail_off {
            self.envelope.note_off();
        } else {
            self.reset();
        }
    }

    /// The key was released; hold the note if the sustain pedal is down.
    pub fn note_released_with_pedal(&mut self, pedal_down: bool) {
        if pedal_down {
            self.sustained_by_pedal = true;
        } else {
            self.envelope.note_off();
        }
    }

    /// Pedal state change. Releasing the pedal releases a held note.
    pub fn set_sustain_pedal(&mut self, is_down: bool) {
        if !is_down && self.sustained_by_pedal {
            self.sustained_by_pedal = false;
            self.envelope.note_off();
        }
    }

    /// Returns the voice to the idle state. `active` is cleared last, with
    /// release ordering, so the slot only looks free once its state is.
    pub fn reset(&mut self) {
        self.envelope.reset();
        self.playing_note = -1;
        self.velocity = 0.0;
        self.pitch_ratio = 1.0;
        self.source_position = 0.0;
        self.sustained_by_pedal = false;
        self.underrunning = false;
        self.underrun_fade_pos = 0;
        self.sample = None;

        self.stream.clear_needs_data();
        self.stream.set_end_of_file(false);
        self.stream.set_read_error(false);
        self.stream.set_file_read_pos(0);
        self.stream.set_sample_handle(None);
        self.stream.set_active(false);
    }

    /// Renders one block, adding into `left`/`right`.
    pub fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        if !self.stream.is_active() {
            return;
        }
        let sample = match self.sample.as_ref() {
            Some(sample) => sample.clone(),
            None => return,
        };

        let total_frames = sample.total_frames;
        let is_streaming = sample.needs_streaming();
        let stream = self.stream.clone();

        // Snapshot the producer's position once per block; anything it
        // writes mid-block is picked up next block.
        let write_snapshot = stream.ring().write_pos();
        let num_frames = left.len().min(right.len());
        let right_channel = (sample.channels as usize - 1).min(1);

        for frame in 0..num_frames {
            if self.source_position >= total_frames as f64 {
                self.reset();
                return;
            }

            let envelope_value = self.envelope.next_sample();
            if !self.envelope.is_active() {
                self.reset();
                return;
            }

            if is_streaming && !self.underrunning {
                let available = write_snapshot - self.source_position as i64;
                if available <= 2 && !stream.at_end_of_file() {
                    self.underrunning = true;
                    self.underrun_fade_pos = 0;
                }
            }

            let mut underrun_fade = 1.0f32;
            if self.underrunning {
                underrun_fade =
                    1.0 - self.underrun_fade_pos as f32 / UNDERRUN_FADE_FRAMES as f32;
                if underrun_fade <= 0.0 {
                    self.reset();
                    return;
                }
                self.underrun_fade_pos += 1;
            }

            let pos0 = self.source_position as i64;
            let pos1 = (pos0 + 1).min(total_frames - 1);
            let frac = (self.source_position - pos0 as f64) as f32;
            let gain = self.velocity * envelope_value * underrun_fade;

            let (sample0_l, sample1_l, sample0_r, sample1_r) = if is_streaming {
                let ring = stream.ring();
                (
                    ring.read_sample(0, pos0),
                    ring.read_sample(0, pos1),
                    ring.read_sample(right_channel, pos0),
                    ring.read_sample(right_channel, pos1),
                )
            } else {
                (
                    sample.preload[0][pos0 as usize],
                    sample.preload[0][pos1 as usize],
                    sample.preload[right_channel][pos0 as usize],
                    sample.preload[right_channel][pos1 as usize],
                )
            };

            left[frame] += (sample0_l + frac * (sample1_l - sample0_l)) * gain;
            right[frame] += (sample0_r + frac * (sample1_r - sample0_r)) * gain;

            self.source_position += self.pitch_ratio;
        }

        if is_streaming && stream.is_active() {
            // Release consumed frames to the producer, then ask for more if
            // the buffer is running low. Clamped so the position invariant
            // holds even while an underrun fade overshoots the write head.
            let ring = stream.ring();
            let new_read_pos = (self.source_position as i64).min(ring.write_pos());
            ring.publish_read_pos(new_read_pos);

            if !stream.at_end_of_file()
                && !stream.has_read_error()
                && ring.samples_available() < LOW_WATERMARK_FRAMES
            {
                self.stream.set_needs_data();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::test_sample;

    fn idle_voice() -> Voice {
        let mut voice = Voice::new(Arc::new(StreamState::new()));
        voice.prepare(44100.0);
        voice
    }

    fn handle() -> SampleHandle {
        SampleHandle {
            generation: 1,
            index: 0,
        }
    }

    /// Mirror of the envelope a fresh voice applies, for expected values.
    fn reference_envelope() -> Adsr {
        let mut env = Adsr::new();
        env.set_sample_rate(44100.0);
        env
    }

    #[test]
    fn test_midi_note_frequencies() {
        assert!((midi_note_to_hz(69) - 440.0).abs() < 1e-9);
        assert!((midi_note_to_hz(57) - 220.0).abs() < 1e-9);
        assert!((midi_note_to_hz(60) - 261.6255653).abs() < 1e-3);
    }

    #[test]
    fn test_tiny_sample_plays_preload_and_deactivates() {
        // Scenario: 100-frame mono sample at the host rate, played at its
        // root note with full velocity.
        let data: Vec<f32> = (0..100).map(|i| ((i % 17) as f32 - 8.0) / 8.0).collect();
        let sample = Arc::new(test_sample("tiny", 100, 1, vec![data.clone()]));
        assert!(!sample.needs_streaming());

        let mut voice = idle_voice();
        voice.start(sample, handle(), 60, 1.0, 44100.0);
        assert!(voice.is_active());
        assert_eq!(voice.playing_note(), 60);

        let mut left = vec![0.0f32; 200];
        let mut right = vec![0.0f32; 200];
        voice.render(&mut left, &mut right);

        let mut env = reference_envelope();
        env.note_on();
        for i in 0..100 {
            let expected = data[i] * env.next_sample();
            assert!(
                (left[i] - expected).abs() < 1e-6,
                "frame {}: {} != {}",
                i,
                left[i],
                expected
            );
            assert_eq!(left[i], right[i]);
        }
        for i in 100..200 {
            assert_eq!(left[i], 0.0);
            assert_eq!(right[i], 0.0);
        }
        assert!(!voice.is_active());
    }

    #[test]
    fn test_octave_up_plays_every_other_frame() {
        let data: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let sample = Arc::new(test_sample("tiny", 100, 1, vec![data.clone()]));

        let mut voice = idle_voice();
        voice.start(sample, handle(), 72, 1.0, 44100.0);

        let mut left = vec![0.0f32; 100];
        let mut right = vec![0.0f32; 100];
        voice.render(&mut left, &mut right);

        let mut env = reference_envelope();
        env.note_on();
        for i in 0..50 {
            let expected = data[2 * i] * env.next_sample();
            assert!(
                (left[i] - expected).abs() < 1e-4,
                "frame {}: {} != {}",
                i,
                left[i],
                expected
            );
        }
        // ~50 frames exhaust the source at pitch ratio 2.
        assert!(!voice.is_active());
        for i in 51..100 {
            assert_eq!(left[i], 0.0);
        }
    }

    #[test]
    fn test_start_stop_restores_fresh_state() {
        let sample = Arc::new(test_sample("tiny", 100, 1, vec![vec![0.5; 100]]));

        let mut voice = idle_voice();
        voice.start(sample, handle(), 64, 0.8, 44100.0);
        let mut left = vec![0.0f32; 16];
        let mut right = vec![0.0f32; 16];
        voice.render(&mut left, &mut right);

        voice.stop(false);

        assert!(!voice.is_active());
        assert_eq!(voice.playing_note(), -1);
        assert!(voice.current_sample().is_none());
        assert!(!voice.is_sustained_by_pedal());
        assert_eq!(voice.velocity, 0.0);
        assert_eq!(voice.pitch_ratio, 1.0);
        assert_eq!(voice.source_position, 0.0);
        assert!(!voice.stream.needs_more_data());
        assert!(!voice.stream.at_end_of_file());
        assert!(!voice.stream.has_read_error());
        assert_eq!(voice.stream.file_read_pos(), 0);
        assert_eq!(voice.stream.sample_handle(), None);
    }

    #[test]
    fn test_streaming_voice_without_disk_thread_fades_out() {
        // Scenario: stereo sample longer than its preload, with the disk
        // thread never running. The voice plays cleanly through the preload
        // then fades to silence over the underrun fade length.
        let preload_frames = 8192;
        let total_frames = 10000i64;
        let plane: Vec<f32> = vec![0.25; preload_frames];
        let sample = Arc::new(test_sample(
            "streamed",
            total_frames,
            2,
            vec![plane.clone(), plane],
        ));
        assert!(sample.needs_streaming());

        let mut voice = idle_voice();
        voice.start(sample, handle(), 60, 1.0, 44100.0);
        // A streaming start always requests data immediately.
        assert!(voice.stream.needs_more_data());
        assert_eq!(voice.stream.file_read_pos(), preload_frames as i64);

        let mut rendered = 0usize;
        let mut left = vec![0.0f32; 512];
        let mut right = vec![0.0f32; 512];
        while voice.is_active() && rendered < 20000 {
            left.fill(0.0);
            right.fill(0.0);
            voice.render(&mut left, &mut right);
            rendered += 512;
        }

        assert!(!voice.is_active());
        // Silence must be reached by preload end plus the fade length.
        let limit = preload_frames + UNDERRUN_FADE_FRAMES as usize + 512;
        assert!(rendered <= limit, "still audible after {} frames", rendered);
    }

    #[test]
    fn test_extreme_pitch_ratios_stay_in_bounds() {
        let data: Vec<f32> = (0..64).map(|i| (i as f32).sin()).collect();

        for note in [48u8, 60, 72, 84] {
            let sample = Arc::new(test_sample("tiny", 64, 1, vec![data.clone()]));
            let mut voice = idle_voice();
            voice.start(sample, handle(), note, 1.0, 44100.0);

            let mut left = vec![0.0f32; 256];
            let mut right = vec![0.0f32; 256];
            // Render until the source is exhausted; must never panic or
            // read out of bounds, and must end inactive.
            for _ in 0..10 {
                voice.render(&mut left, &mut right);
                if !voice.is_active() {
                    break;
                }
            }
            assert!(!voice.is_active(), "note {} never finished", note);
        }
    }

    #[test]
    fn test_pedal_holds_release_until_pedal_up() {
        let sample = Arc::new(test_sample("tiny", 44100, 1, vec![vec![0.1; 16384]]));
        let mut voice = idle_voice();
        voice.start(sample, handle(), 60, 1.0, 44100.0);

        voice.note_released_with_pedal(true);
        assert!(voice.is_sustained_by_pedal());
        assert!(voice.is_active());

        // A pedal press (down) while held changes nothing.
        voice.set_sustain_pedal(true);
        assert!(voice.is_sustained_by_pedal());

        voice.set_sustain_pedal(false);
        assert!(!voice.is_sustained_by_pedal());
        // The envelope is now releasing; run it out.
        let mut left = vec![0.0f32; 512];
        let mut right = vec![0.0f32; 512];
        for _ in 0..100 {
            left.fill(0.0);
            right.fill(0.0);
            voice.render(&mut left, &mut right);
            if !voice.is_active() {
                break;
            }
        }
        assert!(!voice.is_active());
    }
}
