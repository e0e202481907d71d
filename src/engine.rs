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

//! The sampler engine: voice pool, zone dispatch, and the host-facing
//! block interface.
//!
//! `process` is the audio-thread entry point. It snapshots the parameter
//! plane, applies the block's note events (note-on/note-off/sustain pedal),
//! renders every active voice into the output, and applies the master gain.
//! It does no I/O, takes no locks, and allocates nothing.

use std::error::Error;
use std::io;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::instrument::SampleCatalog;
use crate::streaming::streamer::CatalogSlot;
use crate::streaming::{DiskStreamer, SampleHandle, StreamState, MAX_VOICES};

pub mod envelope;
pub mod params;
pub mod voice;

pub use envelope::AdsrParams;
pub use params::{ParamSnapshot, SamplerParams};
pub use voice::Voice;

/// MIDI controller number for the sustain pedal.
pub const SUSTAIN_PEDAL_CC: u8 = 64;

/// Pedal values at or above this count as "down".
const SUSTAIN_PEDAL_THRESHOLD: u8 = 64;

/// What happened, without its timing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventKind {
    NoteOn {
        note: u8,
        /// Velocity in [0, 1].
        velocity: f32,
    },
    NoteOff {
        note: u8,
    },
    ControlChange {
        controller: u8,
        value: u8,
    },
}

/// A host event with its frame offset inside the current block.
///
/// Events are currently applied at the start of the block; the offset is
/// carried so dispatch could later split blocks for sample-accurate timing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    pub offset: u32,
    pub kind: EventKind,
}

impl Event {
    pub fn note_on(offset: u32, note: u8, velocity: f32) -> Self {
        Self {
            offset,
            kind: EventKind::NoteOn { note, velocity },
        }
    }

    pub fn note_off(offset: u32, note: u8) -> Self {
        Self {
            offset,
            kind: EventKind::NoteOff { note },
        }
    }

    pub fn control_change(offset: u32, controller: u8, value: u8) -> Self {
        Self {
            offset,
            kind: EventKind::ControlChange { controller, value },
        }
    }
}

/// The polyphonic sampler engine.
pub struct Sampler {
    params: Arc<SamplerParams>,
    voices: Vec<Voice>,
    /// The audio thread's catalog. Swapped only between blocks: the host
    /// serializes `process` and `load_instrument`, which `&mut self`
    /// enforces here.
    catalog: Arc<SampleCatalog>,
    /// The disk thread's view of the catalog.
    catalog_slot: CatalogSlot,
    streamer: Option<DiskStreamer>,
    /// Per-note round-robin counters, reset on instrument load.
    round_robin: [u32; 128],
    /// Reused zone-match buffer so note-on never allocates.
    match_scratch: Vec<u32>,
    sustain_pedal: bool,
    host_sample_rate: f64,
}

impl Sampler {
    pub fn new() -> Self {
        let catalog = Arc::new(SampleCatalog::empty());
        let voices = (0..MAX_VOICES)
            .map(|_| Voice::new(Arc::new(StreamState::new())))
            .collect();

        Self {
            params: Arc::new(SamplerParams::new()),
            voices,
            catalog_slot: Arc::new(RwLock::new(catalog.clone())),
            catalog,
            streamer: None,
            round_robin: [0; 128],
            match_scratch: Vec::new(),
            sustain_pedal: false,
            host_sample_rate: 44100.0,
        }
    }

    /// The shared parameter plane, for the host/UI thread.
    pub fn params(&self) -> Arc<SamplerParams> {
        self.params.clone()
    }

    pub fn catalog(&self) -> &SampleCatalog {
        &self.catalog
    }

    /// Starts the disk reader thread. Without it, streaming samples play
    /// their preload and then fade out.
    pub fn start_streaming(&mut self) -> io::Result<()> {
        if self.streamer.is_none() {
            let states = self
                .voices
                .iter()
                .map(|voice| voice.stream().clone())
                .collect();
            self.streamer = Some(DiskStreamer::start(states, self.catalog_slot.clone())?);
        }
        Ok(())
    }

    /// Stops the disk reader thread and closes its decoders.
    pub fn stop_streaming(&mut self) {
        if let Some(mut streamer) = self.streamer.take() {
            streamer.stop();
        }
    }

    /// Tells the engine the host's sample rate before processing begins.
    pub fn prepare(&mut self, sample_rate: f64, _max_block_frames: u32) {
        self.host_sample_rate = sample_rate;
        for voice in &mut self.voices {
            voice.prepare(sample_rate);
        }
        debug!(sample_rate, "Engine prepared");
    }

    /// Loads an instrument manifest, replacing the current catalog.
    ///
    /// On error the current catalog (and any playing voices) are left
    /// untouched. Must not race `process`; the host calls this with the
    /// audio callback suspended, which `&mut self` enforces in-process.
    pub fn load_instrument(&mut self, manifest_path: &Path) -> Result<(), Box<dyn Error>> {
        let generation = self.catalog.generation().wrapping_add(1);
        let catalog = Arc::new(crate::instrument::load_instrument(manifest_path, generation)?);
        self.install(catalog);
        Ok(())
    }

    /// Drops the current instrument. In-flight voices keep their sample
    /// descriptors alive until they finish.
    pub fn unload_instrument(&mut self) {
        // The empty catalog still advances the generation so stale handles
        // can't resolve against it.
        let generation = self.catalog.generation().wrapping_add(1);
        self.install(Arc::new(SampleCatalog::empty_with_generation(generation)));
        info!("Instrument unloaded");
    }

    fn install(&mut self, catalog: Arc<SampleCatalog>) {
        self.match_scratch = Vec::with_capacity(catalog.len());
        self.catalog = catalog.clone();
        *self.catalog_slot.write() = catalog;
        self.round_robin = [0; 128];
        if let Some(streamer) = &self.streamer {
            streamer.wake();
        }
    }

    /// Renders one block into `left`/`right` (overwriting them), applying
    /// the block's events first.
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32], events: &[Event]) {
        left.fill(0.0);
        right.fill(0.0);

        let snapshot = self.params.snapshot();
        for voice in &mut self.voices {
            voice.set_adsr_parameters(snapshot.adsr);
        }

        for event in events {
            self.handle_event(event.kind, snapshot.polyphony);
        }

        for voice in &mut self.voices {
            if voice.is_active() {
                voice.render(left, right);
            }
        }

        for sample in left.iter_mut() {
            *sample *= snapshot.gain;
        }
        for sample in right.iter_mut() {
            *sample *= snapshot.gain;
        }
    }

    fn handle_event(&mut self, kind: EventKind, polyphony: usize) {
        match kind {
            EventKind::NoteOn { note, velocity } => self.note_on(note, velocity, polyphony),
            EventKind::NoteOff { note } => self.note_off(note),
            EventKind::ControlChange { controller, value }
                if controller == SUSTAIN_PEDAL_CC =>
            {
                self.set_sustain_pedal(value >= SUSTAIN_PEDAL_THRESHOLD);
            }
            // Other controllers are not interpreted by the engine.
            EventKind::ControlChange { .. } => {}
        }
    }

    fn note_on(&mut self, note: u8, velocity: f32, polyphony: usize) {
        if note > 127 {
            return;
        }
        let int_velocity = (velocity * 127.0).round().clamp(0.0, 127.0) as u8;

        self.match_scratch.clear();
        for (index, sample) in self.catalog.samples().iter().enumerate() {
            if sample.matches(note, int_velocity) {
                self.match_scratch.push(index as u32);
            }
        }
        if self.match_scratch.is_empty() {
            // No zone covers this note/velocity; not an error.
            return;
        }

        // Round-robin between the matching layers, one step per note-on.
        let counter = self.round_robin[note as usize];
        let index = self.match_scratch[counter as usize % self.match_scratch.len()];
        self.round_robin[note as usize] = counter.wrapping_add(1);

        let sample = match self.catalog.get(index) {
            Some(sample) => sample.clone(),
            None => return,
        };
        let handle = SampleHandle {
            generation: self.catalog.generation(),
            index,
        };

        // First idle slot within the polyphony limit, else steal slot 0.
        let limit = polyphony.min(self.voices.len());
        let slot = match (0..limit).find(|&i| !self.voices[i].is_active()) {
            Some(slot) => slot,
            None => {
                self.voices[0].stop(false);
                0
            }
        };
        self.voices[slot].start(sample, handle, note, velocity, self.host_sample_rate);
    }

    fn note_off(&mut self, note: u8) {
        let pedal_down = self.sustain_pedal;
        for voice in &mut self.voices {
            if voice.is_active() && voice.playing_note() == note as i8 {
                voice.note_released_with_pedal(pedal_down);
            }
        }
    }

    fn set_sustain_pedal(&mut self, is_down: bool) {
        let was_down = self.sustain_pedal;
        self.sustain_pedal = is_down;
        if was_down && !is_down {
            for voice in &mut self.voices {
                voice.set_sustain_pedal(false);
            }
        }
    }

    /// Number of currently sounding voices.
    pub fn active_voice_count(&self) -> usize {
        self.voices.iter().filter(|v| v.is_active()).count()
    }

    /// True while any active voice is waiting on the disk thread. Offline
    /// (faster-than-realtime) callers use this to pace themselves.
    pub fn streaming_backlog(&self) -> bool {
        self.voices
            .iter()
            .any(|v| v.is_active() && v.stream().needs_more_data())
    }

    #[cfg(test)]
    pub(crate) fn voice(&self, index: usize) -> &Voice {
        &self.voices[index]
    }

    #[cfg(test)]
    pub(crate) fn install_catalog(&mut self, catalog: SampleCatalog) {
        self.install(Arc::new(catalog));
    }

    #[cfg(test)]
    pub(crate) fn round_robin_counter(&self, note: u8) -> u32 {
        self.round_robin[note as usize]
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.stop_streaming();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{test_sample, PreloadedSample};
    use crate::testutil::{write_manifest, write_wav_f32};

    const BLOCK: usize = 512;

    fn engine() -> Sampler {
        let mut engine = Sampler::new();
        engine.prepare(44100.0, BLOCK as u32);
        engine
    }

    fn catalog_of(generation: u32, samples: Vec<PreloadedSample>) -> SampleCatalog {
        SampleCatalog::new(
            generation,
            "test".into(),
            String::new(),
            "/test/instrument.sss".into(),
            samples.into_iter().map(Arc::new).collect(),
        )
    }

    /// A zone restricted to a single note.
    fn zone_for_note(name: &str, note: u8) -> PreloadedSample {
        let mut sample = test_sample(name, 4000, 1, vec![vec![0.1; 4000]]);
        sample.lo_note = note;
        sample.hi_note = note;
        sample.root_note = note;
        sample
    }

    fn process_events(engine: &mut Sampler, events: &[Event]) {
        let mut left = vec![0.0f32; BLOCK];
        let mut right = vec![0.0f32; BLOCK];
        engine.process(&mut left, &mut right, events);
    }

    fn render_frames(engine: &mut Sampler, frames: usize) {
        let mut left = vec![0.0f32; BLOCK];
        let mut right = vec![0.0f32; BLOCK];
        let mut remaining = frames;
        while remaining > 0 {
            let n = remaining.min(BLOCK);
            engine.process(&mut left[..n], &mut right[..n], &[]);
            remaining -= n;
        }
    }

    #[test]
    fn test_round_robin_cycles_through_matching_zones() {
        let mut engine = engine();
        engine.install_catalog(catalog_of(
            1,
            vec![
                test_sample("a", 4000, 1, vec![vec![0.1; 4000]]),
                test_sample("b", 4000, 1, vec![vec![0.2; 4000]]),
                test_sample("c", 4000, 1, vec![vec![0.3; 4000]]),
            ],
        ));

        for _ in 0..7 {
            process_events(&mut engine, &[Event::note_on(0, 60, 100.0 / 127.0)]);
        }

        // Seven note-ons over three layers: a b c a b c a, in voice order.
        let expected = ["a", "b", "c", "a", "b", "c", "a"];
        for (slot, name) in expected.iter().enumerate() {
            assert_eq!(
                engine.voice(slot).current_sample().unwrap().name.as_str(),
                *name,
                "slot {}",
                slot
            );
        }
        assert_eq!(engine.round_robin_counter(60), 7);

        // Reloading the instrument resets the rotation.
        engine.install_catalog(catalog_of(
            2,
            vec![
                test_sample("a", 4000, 1, vec![vec![0.1; 4000]]),
                test_sample("b", 4000, 1, vec![vec![0.2; 4000]]),
                test_sample("c", 4000, 1, vec![vec![0.3; 4000]]),
            ],
        ));
        assert_eq!(engine.round_robin_counter(60), 0);
        process_events(&mut engine, &[Event::note_on(0, 60, 100.0 / 127.0)]);
        assert_eq!(
            engine.voice(7).current_sample().unwrap().name.as_str(),
            "a"
        );
    }

    #[test]
    fn test_round_robin_counters_are_per_note() {
        let mut engine = engine();
        engine.install_catalog(catalog_of(
            1,
            vec![zone_for_note("sixty", 60), zone_for_note("seventy", 70)],
        ));

        process_events(&mut engine, &[Event::note_on(0, 60, 0.8)]);
        process_events(&mut engine, &[Event::note_on(0, 70, 0.8)]);
        process_events(&mut engine, &[Event::note_on(0, 60, 0.8)]);
        assert_eq!(engine.round_robin_counter(60), 2);
        assert_eq!(engine.round_robin_counter(70), 1);

        // A zone miss advances nothing and starts nothing.
        let active_before = engine.active_voice_count();
        process_events(&mut engine, &[Event::note_on(0, 61, 0.8)]);
        assert_eq!(engine.round_robin_counter(61), 0);
        assert_eq!(engine.active_voice_count(), active_before);
    }

    #[test]
    fn test_velocity_selects_the_matching_layer() {
        let mut soft = test_sample("soft", 4000, 1, vec![vec![0.1; 4000]]);
        soft.hi_vel = 64;
        let mut loud = test_sample("loud", 4000, 1, vec![vec![0.9; 4000]]);
        loud.lo_vel = 65;

        let mut engine = engine();
        engine.install_catalog(catalog_of(1, vec![soft, loud]));

        // 0.5 * 127 rounds to 64: still the soft layer.
        process_events(&mut engine, &[Event::note_on(0, 60, 0.5)]);
        assert_eq!(
            engine.voice(0).current_sample().unwrap().name.as_str(),
            "soft"
        );

        // 0.52 * 127 rounds to 66: the loud layer.
        process_events(&mut engine, &[Event::note_on(0, 60, 0.52)]);
        assert_eq!(
            engine.voice(1).current_sample().unwrap().name.as_str(),
            "loud"
        );
    }

    #[test]
    fn test_voice_steal_reuses_slot_zero() {
        let mut engine = engine();
        engine.install_catalog(catalog_of(
            1,
            vec![
                zone_for_note("a", 60),
                zone_for_note("b", 62),
                zone_for_note("c", 64),
            ],
        ));
        engine.params().set_polyphony(2);

        // Three simultaneous note-ons with two voices: C steals slot 0.
        process_events(
            &mut engine,
            &[
                Event::note_on(0, 60, 1.0),
                Event::note_on(0, 62, 1.0),
                Event::note_on(0, 64, 1.0),
            ],
        );

        assert_eq!(engine.active_voice_count(), 2);
        assert_eq!(engine.voice(0).playing_note(), 64);
        assert_eq!(
            engine.voice(0).current_sample().unwrap().name.as_str(),
            "c"
        );
        assert_eq!(engine.voice(1).playing_note(), 62);
        assert_eq!(
            engine.voice(1).current_sample().unwrap().name.as_str(),
            "b"
        );
    }

    #[test]
    fn test_polyphony_reduction_does_not_stop_voices() {
        let mut engine = engine();
        engine.install_catalog(catalog_of(1, vec![test_sample("all", 44100, 1, vec![vec![0.1; 16384]])]));

        for note in [60, 61, 62, 63] {
            process_events(&mut engine, &[Event::note_on(0, note, 0.8)]);
        }
        assert_eq!(engine.active_voice_count(), 4);

        engine.params().set_polyphony(2);
        render_frames(&mut engine, BLOCK);
        // Existing voices above the new limit play on.
        assert_eq!(engine.active_voice_count(), 4);

        // A new note finds slots 0..2 busy and steals slot 0.
        process_events(&mut engine, &[Event::note_on(0, 64, 0.8)]);
        assert_eq!(engine.voice(0).playing_note(), 64);
        assert_eq!(engine.active_voice_count(), 4);
    }

    #[test]
    fn test_sustain_pedal_holds_note_until_pedal_up() {
        // Source matches an 8kHz host so pitch ratio is 1 and a 16000-frame
        // preload covers two seconds.
        let mut sample = test_sample("held", 16000, 1, vec![vec![0.2; 16000]]);
        sample.source_sample_rate = 8000.0;

        let mut engine = Sampler::new();
        engine.prepare(8000.0, BLOCK as u32);
        engine.install_catalog(catalog_of(1, vec![sample]));

        process_events(
            &mut engine,
            &[
                Event::control_change(0, SUSTAIN_PEDAL_CC, 127),
                Event::note_on(0, 60, 1.0),
            ],
        );
        process_events(&mut engine, &[Event::note_off(0, 60)]);

        // A second of audio later the voice is still held by the pedal.
        render_frames(&mut engine, 8000);
        assert_eq!(engine.active_voice_count(), 1);
        assert!(engine.voice(0).is_sustained_by_pedal());

        // Pedal up: the release runs and the voice ends.
        process_events(&mut engine, &[Event::control_change(0, SUSTAIN_PEDAL_CC, 0)]);
        assert!(!engine.voice(0).is_sustained_by_pedal());
        let mut frames = 0;
        while engine.active_voice_count() > 0 && frames < 16000 {
            render_frames(&mut engine, BLOCK);
            frames += BLOCK;
        }
        assert_eq!(engine.active_voice_count(), 0);
        // The release tail was audible, not an instant cut.
        assert!(frames >= BLOCK);
    }

    #[test]
    fn test_note_off_without_pedal_releases() {
        let mut engine = engine();
        engine.install_catalog(catalog_of(1, vec![test_sample("s", 44100, 1, vec![vec![0.1; 16384]])]));
        engine.params().set_release(0.01);

        process_events(&mut engine, &[Event::note_on(0, 60, 1.0)]);
        process_events(&mut engine, &[Event::note_off(0, 60)]);

        let mut frames = 0;
        while engine.active_voice_count() > 0 && frames < 44100 {
            render_frames(&mut engine, BLOCK);
            frames += BLOCK;
        }
        assert_eq!(engine.active_voice_count(), 0);
        assert!(frames < 4410, "release took {} frames", frames);
    }

    #[test]
    fn test_gain_scales_the_block() {
        let run = |gain: f32| -> Vec<f32> {
            let mut engine = engine();
            engine.install_catalog(catalog_of(1, vec![test_sample("s", 1000, 1, vec![vec![0.5; 1000]])]));
            engine.params().set_gain(gain);
            let mut left = vec![0.0f32; 256];
            let mut right = vec![0.0f32; 256];
            engine.process(&mut left, &mut right, &[Event::note_on(0, 60, 1.0)]);
            left
        };

        let unity = run(1.0);
        let doubled = run(2.0);
        let muted = run(0.0);
        assert!(unity.iter().any(|&v| v != 0.0));
        for i in 0..unity.len() {
            assert!((doubled[i] - 2.0 * unity[i]).abs() < 1e-6);
            assert_eq!(muted[i], 0.0);
        }
    }

    #[test]
    fn test_small_samples_never_request_streaming() {
        let mut engine = engine();
        engine.install_catalog(catalog_of(1, vec![test_sample("s", 16384, 1, vec![vec![0.3; 16384]])]));

        process_events(&mut engine, &[Event::note_on(0, 60, 1.0)]);
        for _ in 0..20 {
            assert!(!engine.voice(0).stream().needs_more_data());
            render_frames(&mut engine, BLOCK);
        }
    }

    #[test]
    fn test_process_with_no_instrument_is_silent() {
        let mut engine = engine();
        let mut left = vec![1.0f32; 64];
        let mut right = vec![-1.0f32; 64];
        engine.process(
            &mut left,
            &mut right,
            &[Event::note_on(0, 60, 1.0), Event::note_off(0, 60)],
        );
        assert!(left.iter().all(|&v| v == 0.0));
        assert!(right.iter().all(|&v| v == 0.0));
        assert_eq!(engine.active_voice_count(), 0);
    }

    #[test]
    fn test_failed_load_retains_current_catalog() {
        let tempdir = tempfile::tempdir().unwrap();
        write_wav_f32(tempdir.path().join("a.wav"), &[vec![0.5; 100]], 44100).unwrap();
        let manifest = write_manifest(
            tempdir.path(),
            "Keeper",
            &[r#"<sample file="a.wav"/>"#],
        );

        let mut engine = engine();
        engine.load_instrument(&manifest).unwrap();
        assert_eq!(engine.catalog().name(), "Keeper");
        let generation = engine.catalog().generation();

        let err = engine.load_instrument(&tempdir.path().join("missing.sss"));
        assert!(err.is_err());
        assert_eq!(engine.catalog().name(), "Keeper");
        assert_eq!(engine.catalog().generation(), generation);
    }

    #[test]
    fn test_unload_advances_generation() {
        let mut engine = engine();
        engine.install_catalog(catalog_of(5, vec![test_sample("s", 100, 1, vec![vec![0.1; 100]])]));
        engine.unload_instrument();
        assert!(engine.catalog().is_empty());
        assert_eq!(engine.catalog().generation(), 6);
    }

    #[test]
    fn test_streaming_note_plays_to_completion_with_disk_thread() {
        let tempdir = tempfile::tempdir().unwrap();
        let total = 50000usize;
        let source: Vec<f32> = (0..total).map(|i| ((i % 997) as f32 + 1.0) / 998.0).collect();
        write_wav_f32(tempdir.path().join("long.wav"), &[source], 44100).unwrap();
        let manifest = write_manifest(
            tempdir.path(),
            "Long",
            &[r#"<sample file="long.wav"/>"#],
        );

        let mut engine = engine();
        engine.load_instrument(&manifest).unwrap();
        engine.start_streaming().unwrap();
        assert!(engine.catalog().get(0).unwrap().needs_streaming());

        let mut left = vec![0.0f32; BLOCK];
        let mut right = vec![0.0f32; BLOCK];
        engine.process(&mut left, &mut right, &[Event::note_on(0, 60, 1.0)]);

        let mut output = Vec::with_capacity(total + BLOCK);
        output.extend_from_slice(&left);
        let mut rendered = BLOCK;
        let mut waits = 0;
        while engine.active_voice_count() > 0 && rendered < 4 * total {
            // Offline pacing: give the disk thread room when we outrun it.
            while engine.streaming_backlog() {
                std::thread::sleep(std::time::Duration::from_millis(2));
                waits += 1;
                assert!(waits < 5000, "disk thread starved");
            }
            engine.process(&mut left, &mut right, &[]);
            output.extend_from_slice(&left);
            rendered += BLOCK;
        }

        // The voice must survive the whole file (no underrun cut) and then
        // end on its own.
        assert_eq!(engine.active_voice_count(), 0);
        assert!(
            output.len() >= total,
            "voice died after {} of {} frames",
            output.len(),
            total
        );
        // No dropout: every window deep into the streamed region carries
        // signal (the source has no zero runs).
        for window in (20000..total - 2000).step_by(2000) {
            let energy: f32 = output[window..window + 2000].iter().map(|v| v.abs()).sum();
            assert!(energy > 0.0, "silent window at {}", window);
        }

        engine.stop_streaming();
    }
}
