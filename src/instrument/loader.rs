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

//! Builds a [`SampleCatalog`] from an `instrument.sss` manifest.
//!
//! Only each sample's preload prefix is decoded here; the rest of the audio
//! stays on disk for the streamer. Loading runs on the control thread and
//! may block on I/O.

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::manifest::{parse_manifest, ManifestZone};
use super::{PreloadedSample, SampleCatalog};
use crate::audio::{open_decoder, DecoderError};

/// Loads an instrument manifest and decodes every zone's preload.
///
/// Zones whose audio file is missing or undecodable are skipped with a
/// warning; a manifest that yields no playable zones at all is an error, as
/// is a malformed manifest. On error the caller keeps its current catalog.
pub fn load_instrument(
    manifest_path: &Path,
    generation: u32,
) -> Result<SampleCatalog, Box<dyn Error>> {
    let text = fs::read_to_string(manifest_path)
        .map_err(|e| format!("error reading {}: {}", manifest_path.display(), e))?;
    let manifest = parse_manifest(&text)
        .map_err(|e| format!("error parsing {}: {}", manifest_path.display(), e))?;

    let folder = manifest_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let mut samples = Vec::new();
    for zone in &manifest.zones {
        let file_path = if Path::new(&zone.file).is_absolute() {
            PathBuf::from(&zone.file)
        } else {
            folder.join(&zone.file)
        };

        match load_zone(&file_path, zone) {
            Ok(sample) => {
                debug!(
                    name = sample.name,
                    frames = sample.total_frames,
                    channels = sample.channels,
                    preload_frames = sample.preload_frames(),
                    streaming = sample.needs_streaming(),
                    "Sample zone loaded"
                );
                samples.push(Arc::new(sample));
            }
            Err(e) => {
                warn!(path = ?file_path, error = %e, "Skipping unloadable sample zone");
            }
        }
    }

    if samples.is_empty() {
        return Err(format!(
            "no loadable samples in {}",
            manifest_path.display()
        )
        .into());
    }

    let name = manifest
        .name
        .or_else(|| {
            folder
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
        })
        .unwrap_or_default();

    let catalog = SampleCatalog::new(
        generation,
        name,
        manifest.author.unwrap_or_default(),
        manifest_path.to_path_buf(),
        samples,
    );

    info!(
        instrument = catalog.name(),
        zones = catalog.len(),
        generation,
        memory_kb = catalog.memory_size() / 1024,
        "Instrument loaded"
    );

    Ok(catalog)
}

/// Opens one zone's audio file and decodes its preload prefix.
fn load_zone(file_path: &Path, zone: &ManifestZone) -> Result<PreloadedSample, DecoderError> {
    let mut decoder = open_decoder(file_path)?;
    let channels = decoder.channels();
    if channels == 0 || channels > 2 {
        return Err(DecoderError::Unsupported(format!(
            "{}: {} channels (only mono and stereo are supported)",
            file_path.display(),
            channels
        )));
    }

    let total_frames = decoder.length_frames();
    if total_frames <= 0 {
        return Err(DecoderError::Unsupported(format!(
            "{}: empty audio file",
            file_path.display()
        )));
    }

    let preload_frames = PreloadedSample::max_preload_frames(channels).min(total_frames as usize);
    let mut preload = vec![vec![0.0f32; preload_frames]; channels as usize];
    let read = decoder.read(&mut preload, 0, preload_frames, 0)?;
    if read < preload_frames {
        for plane in &mut preload {
            plane.truncate(read);
        }
    }

    let name = file_path
        .file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(PreloadedSample {
        file_path: file_path.to_path_buf(),
        name,
        total_frames,
        channels,
        source_sample_rate: decoder.sample_rate() as f64,
        root_note: zone.root_note,
        lo_note: zone.lo_note,
        hi_note: zone.hi_note,
        lo_vel: zone.lo_vel,
        hi_vel: zone.hi_vel,
        preload,
    })
}
