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

//! Host-persistable engine state: the parameter values plus the path of the
//! loaded instrument's manifest, as a YAML document.

use std::error::Error;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::engine::Sampler;

fn default_attack() -> f32 {
    0.01
}

fn default_decay() -> f32 {
    0.1
}

fn default_sustain() -> f32 {
    0.8
}

fn default_release() -> f32 {
    0.5
}

fn default_gain() -> f32 {
    1.0
}

fn default_polyphony() -> usize {
    16
}

/// A YAML representation of the engine's persistable state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default = "default_attack")]
    pub attack: f32,
    #[serde(default = "default_decay")]
    pub decay: f32,
    #[serde(default = "default_sustain")]
    pub sustain: f32,
    #[serde(default = "default_release")]
    pub release: f32,
    #[serde(default = "default_gain")]
    pub gain: f32,
    #[serde(default = "default_polyphony")]
    pub polyphony: usize,
    /// Manifest path of the loaded instrument, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument: Option<PathBuf>,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            attack: default_attack(),
            decay: default_decay(),
            sustain: default_sustain(),
            release: default_release(),
            gain: default_gain(),
            polyphony: default_polyphony(),
            instrument: None,
        }
    }
}

impl PersistedState {
    /// Captures the engine's current state.
    pub fn capture(engine: &Sampler) -> Self {
        let params = engine.params();
        Self {
            attack: params.attack(),
            decay: params.decay(),
            sustain: params.sustain(),
            release: params.release(),
            gain: params.gain(),
            polyphony: params.polyphony(),
            instrument: engine.catalog().manifest_path().cloned(),
        }
    }

    /// Applies this state to an engine: parameters first, then the
    /// instrument. A missing instrument keeps the parameters and warns,
    /// matching how a host restores a session whose files moved.
    pub fn apply(&self, engine: &mut Sampler) -> Result<(), Box<dyn Error>> {
        let params = engine.params();
        params.set_attack(self.attack);
        params.set_decay(self.decay);
        params.set_sustain(self.sustain);
        params.set_release(self.release);
        params.set_gain(self.gain);
        params.set_polyphony(self.polyphony);

        if let Some(instrument) = &self.instrument {
            if let Err(e) = engine.load_instrument(instrument) {
                warn!(path = ?instrument, error = %e, "Persisted instrument failed to load");
            }
        }
        Ok(())
    }

    /// Serializes to YAML.
    pub fn to_yaml(&self) -> Result<String, Box<dyn Error>> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Deserializes from YAML.
    pub fn from_yaml(text: &str) -> Result<Self, Box<dyn Error>> {
        Ok(serde_yaml::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{write_manifest, write_wav_f32};

    #[test]
    fn test_yaml_round_trip() {
        let state = PersistedState {
            attack: 0.02,
            decay: 0.3,
            sustain: 0.5,
            release: 1.5,
            gain: 0.9,
            polyphony: 8,
            instrument: Some("/music/piano/instrument.sss".into()),
        };
        let yaml = state.to_yaml().unwrap();
        let restored = PersistedState::from_yaml(&yaml).unwrap();
        assert_eq!(state, restored);
    }

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        let state = PersistedState::from_yaml("attack: 0.25\n").unwrap();
        assert_eq!(state.attack, 0.25);
        assert_eq!(state.decay, 0.1);
        assert_eq!(state.sustain, 0.8);
        assert_eq!(state.release, 0.5);
        assert_eq!(state.gain, 1.0);
        assert_eq!(state.polyphony, 16);
        assert_eq!(state.instrument, None);
    }

    #[test]
    fn test_capture_and_apply() {
        let tempdir = tempfile::tempdir().unwrap();
        write_wav_f32(tempdir.path().join("a.wav"), &[vec![0.5; 100]], 44100).unwrap();
        let manifest = write_manifest(
            tempdir.path(),
            "Persist",
            &[r#"<sample file="a.wav"/>"#],
        );

        let mut engine = Sampler::new();
        engine.load_instrument(&manifest).unwrap();
        engine.params().set_attack(0.2);
        engine.params().set_polyphony(4);

        let state = PersistedState::capture(&engine);
        assert_eq!(state.attack, 0.2);
        assert_eq!(state.polyphony, 4);
        assert_eq!(state.instrument.as_deref(), Some(manifest.as_path()));

        let mut restored = Sampler::new();
        state.apply(&mut restored).unwrap();
        assert_eq!(restored.params().attack(), 0.2);
        assert_eq!(restored.params().polyphony(), 4);
        assert_eq!(restored.catalog().name(), "Persist");
    }

    #[test]
    fn test_apply_with_missing_instrument_keeps_parameters() {
        let state = PersistedState {
            gain: 1.5,
            instrument: Some("/nonexistent/instrument.sss".into()),
            ..Default::default()
        };
        let mut engine = Sampler::new();
        state.apply(&mut engine).unwrap();
        assert_eq!(engine.params().gain(), 1.5);
        assert!(engine.catalog().is_empty());
    }
}
