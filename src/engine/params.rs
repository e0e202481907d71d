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

//! The engine's parameter plane: a handful of atomics the host/UI thread
//! writes and the audio thread snapshots once per block. Float parameters
//! are stored as `AtomicU32` bit patterns; ordering is relaxed since each
//! value has a single writer and staleness of one block is fine.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::engine::envelope::AdsrParams;
use crate::streaming::MAX_VOICES;

/// One float parameter with a fixed valid range.
struct FloatParam {
    bits: AtomicU32,
    min: f32,
    max: f32,
}

impl FloatParam {
    fn new(default: f32, min: f32, max: f32) -> Self {
        Self {
            bits: AtomicU32::new(default.to_bits()),
            min,
            max,
        }
    }

    fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    fn set(&self, value: f32) {
        let clamped = value.clamp(self.min, self.max);
        self.bits.store(clamped.to_bits(), Ordering::Relaxed);
    }
}

/// The values the audio thread reads at the top of each block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSnapshot {
    pub adsr: AdsrParams,
    pub gain: f32,
    pub polyphony: usize,
}

/// Shared parameter storage. Setters clamp to each parameter's range.
pub struct SamplerParams {
    attack: FloatParam,
    decay: FloatParam,
    sustain: FloatParam,
    release: FloatParam,
    gain: FloatParam,
    polyphony: AtomicUsize,
}

impl SamplerParams {
    pub fn new() -> Self {
        Self {
            attack: FloatParam::new(0.01, 0.001, 5.0),
            decay: FloatParam::new(0.1, 0.001, 5.0),
            sustain: FloatParam::new(0.8, 0.0, 1.0),
            release: FloatParam::new(0.5, 0.001, 10.0),
            gain: FloatParam::new(1.0, 0.0, 2.0),
            polyphony: AtomicUsize::new(16),
        }
    }

    pub fn attack(&self) -> f32 {
        self.attack.get()
    }

    pub fn set_attack(&self, seconds: f32) {
        self.attack.set(seconds);
    }

    pub fn decay(&self) -> f32 {
        self.decay.get()
    }

    pub fn set_decay(&self, seconds: f32) {
        self.decay.set(seconds);
    }

    pub fn sustain(&self) -> f32 {
        self.sustain.get()
    }

    pub fn set_sustain(&self, ratio: f32) {
        self.sustain.set(ratio);
    }

    pub fn release(&self) -> f32 {
        self.release.get()
    }

    pub fn set_release(&self, seconds: f32) {
        self.release.set(seconds);
    }

    pub fn gain(&self) -> f32 {
        self.gain.get()
    }

    pub fn set_gain(&self, gain: f32) {
        self.gain.set(gain);
    }

    pub fn polyphony(&self) -> usize {
        self.polyphony.load(Ordering::Relaxed)
    }

    /// Sets the maximum number of voices new notes may occupy. Voices
    /// already playing above the new limit are left to release naturally.
    pub fn set_polyphony(&self, voices: usize) {
        self.polyphony
            .store(voices.clamp(1, MAX_VOICES), Ordering::Relaxed);
    }

    /// Reads every parameter once, for use across a whole audio block.
    pub fn snapshot(&self) -> ParamSnapshot {
        ParamSnapshot {
            adsr: AdsrParams {
                attack: self.attack(),
                decay: self.decay(),
                sustain: self.sustain(),
                release: self.release(),
            },
            gain: self.gain(),
            polyphony: self.polyphony(),
        }
    }
}

impl Default for SamplerParams {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = SamplerParams::new();
        let snapshot = params.snapshot();
        assert_eq!(snapshot.adsr.attack, 0.01);
        assert_eq!(snapshot.adsr.decay, 0.1);
        assert_eq!(snapshot.adsr.sustain, 0.8);
        assert_eq!(snapshot.adsr.release, 0.5);
        assert_eq!(snapshot.gain, 1.0);
        assert_eq!(snapshot.polyphony, 16);
    }

    #[test]
    fn test_setters_clamp_to_range() {
        let params = SamplerParams::new();

        params.set_attack(100.0);
        assert_eq!(params.attack(), 5.0);
        params.set_attack(0.0);
        assert_eq!(params.attack(), 0.001);

        params.set_sustain(1.5);
        assert_eq!(params.sustain(), 1.0);
        params.set_sustain(-0.5);
        assert_eq!(params.sustain(), 0.0);

        params.set_release(11.0);
        assert_eq!(params.release(), 10.0);

        params.set_gain(3.0);
        assert_eq!(params.gain(), 2.0);

        params.set_polyphony(0);
        assert_eq!(params.polyphony(), 1);
        params.set_polyphony(1000);
        assert_eq!(params.polyphony(), MAX_VOICES);
    }

    #[test]
    fn test_values_round_trip_exactly() {
        let params = SamplerParams::new();
        params.set_decay(1.2345);
        assert_eq!(params.decay(), 1.2345);
        params.set_gain(0.707);
        assert_eq!(params.gain(), 0.707);
    }
}
