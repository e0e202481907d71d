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

//! Per-voice ADSR amplitude envelope.

/// Release levels below this count as silence and deactivate the envelope.
const SILENCE_THRESHOLD: f32 = 1.0e-4;

/// Envelope timing parameters, in seconds (sustain is a level ratio).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdsrParams {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

impl Default for AdsrParams {
    fn default() -> Self {
        Self {
            attack: 0.01,
            decay: 0.1,
            sustain: 0.8,
            release: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Stage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// A four-stage linear ADSR producing one gain value per frame.
///
/// `note_on` always restarts the attack from zero; `note_off` releases from
/// the current level so a release during the attack doesn't jump. The
/// release tail is finite: once it decays below the silence threshold the
/// envelope reports inactive.
pub struct Adsr {
    stage: Stage,
    level: f32,
    sample_rate: f64,
    params: AdsrParams,
    /// Per-frame decrement for the current release, fixed at note-off.
    release_rate: f32,
}

impl Adsr {
    pub fn new() -> Self {
        Self {
            stage: Stage::Idle,
            level: 0.0,
            sample_rate: 44100.0,
            params: AdsrParams::default(),
            release_rate: 0.0,
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
    }

    pub fn set_parameters(&mut self, params: AdsrParams) {
        self.params = params;
    }

    /// Starts the attack stage from silence.
    pub fn note_on(&mut self) {
        self.level = 0.0;
        self.stage = Stage::Attack;
    }

    /// Enters the release stage from the current level.
    pub fn note_off(&mut self) {
        if self.stage == Stage::Idle || self.stage == Stage::Release {
            return;
        }
        let frames = (self.params.release as f64 * self.sample_rate).max(1.0);
        self.release_rate = self.level / frames as f32;
        self.stage = Stage::Release;
    }

    /// Immediate silence.
    pub fn reset(&mut self) {
        self.stage = Stage::Idle;
        self.level = 0.0;
        self.release_rate = 0.0;
    }

    pub fn is_active(&self) -> bool {
        self.stage != Stage::Idle
    }

    /// Advances one frame and returns the gain for it.
    pub fn next_sample(&mut self) -> f32 {
        match self.stage {
            Stage::Idle => 0.0,
            Stage::Attack => {
                let frames = (self.params.attack as f64 * self.sample_rate).max(1.0);
                self.level += (1.0 / frames) as f32;
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.stage = Stage::Decay;
                }
                self.level
            }
            Stage::Decay => {
                let frames = (self.params.decay as f64 * self.sample_rate).max(1.0);
                self.level -= ((1.0 - self.params.sustain as f64) / frames) as f32;
                if self.level <= self.params.sustain {
                    self.level = self.params.sustain;
                    self.stage = Stage::Sustain;
                }
                self.level
            }
            Stage::Sustain => {
                // Follow the parameter so UI changes take effect while held.
                self.level = self.params.sustain;
                self.level
            }
            Stage::Release => {
                self.level -= self.release_rate;
                if self.level <= SILENCE_THRESHOLD {
                    self.reset();
                }
                self.level.max(0.0)
            }
        }
    }
}

impl Default for Adsr {
    fn default() -> Self {
        Self::new()
    }
}
