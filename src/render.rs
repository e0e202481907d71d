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

//! Offline rendering: drive the engine faster than realtime and write the
//! output to a stereo float WAV file.

use std::error::Error;
use std::path::Path;
use std::thread;

use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::info;

use crate::engine::Sampler;
use crate::midi::EventSchedule;
use crate::streaming::POLL_INTERVAL;

/// Summary of a finished render.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderStats {
    pub frames: u64,
}

impl RenderStats {
    pub fn seconds(&self, sample_rate: f64) -> f64 {
        self.frames as f64 / sample_rate
    }
}

/// Renders a schedule of events through the engine into a WAV file.
///
/// The render runs until every event has fired and every voice has gone
/// silent. Because this runs faster than realtime, the loop yields to the
/// disk thread whenever a streaming voice is waiting on data; a voice whose
/// file has failed fades out on its own, so the render still terminates.
pub fn render_to_wav(
    engine: &mut Sampler,
    schedule: &mut EventSchedule,
    out_path: &Path,
    sample_rate: f64,
    block_frames: usize,
) -> Result<RenderStats, Box<dyn Error>> {
    engine.prepare(sample_rate, block_frames as u32);

    let spec = WavSpec {
        channels: 2,
        sample_rate: sample_rate as u32,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(out_path, spec)
        .map_err(|e| format!("error creating {}: {}", out_path.display(), e))?;

    let mut left = vec![0.0f32; block_frames];
    let mut right = vec![0.0f32; block_frames];
    let mut frames_written = 0u64;

    loop {
        // Give the disk thread room when a streaming voice runs low; bounded
        // so a dead stream (read error) cannot hang the render.
        let mut waits = 0;
        while engine.streaming_backlog() && waits < 1000 {
            thread::sleep(POLL_INTERVAL);
            waits += 1;
        }

        let events = schedule.next_block(block_frames).to_vec();
        engine.process(&mut left, &mut right, &events);

        for frame in 0..block_frames {
            writer.write_sample(left[frame])?;
            writer.write_sample(right[frame])?;
        }
        frames_written += block_frames as u64;

        if schedule.is_finished() && engine.active_voice_count() == 0 {
            break;
        }
    }

    writer.finalize()?;

    let stats = RenderStats {
        frames: frames_written,
    };
    info!(
        path = ?out_path,
        frames = stats.frames,
        seconds = format!("{:.2}", stats.seconds(sample_rate)),
        "Render complete"
    );
    Ok(stats)
}
