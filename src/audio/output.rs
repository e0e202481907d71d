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

//! Realtime playback through a cpal output device.
//!
//! This is the standalone player's host layer: it owns the engine inside
//! the output callback, deals MIDI-file events to each block, and converts
//! the engine's stereo f32 output to whatever sample format the device
//! wants.

use std::error::Error;
use std::path::Path;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{error, info};

use crate::engine::Sampler;
use crate::midi::EventSchedule;

/// Names of the available output devices, sorted.
pub fn list_output_devices() -> Result<Vec<String>, Box<dyn Error>> {
    let host = cpal::default_host();
    let mut names = Vec::new();
    for device in host.output_devices()? {
        if let Ok(name) = device.name() {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Plays a MIDI file through the engine on an output device (the default
/// device if no name is given). Blocks until every event has fired and the
/// last voice has gone silent.
pub fn play_midi_file(
    mut engine: Sampler,
    midi_path: &Path,
    device_name: Option<&str>,
) -> Result<(), Box<dyn Error>> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(name) => host
            .output_devices()?
            .find(|d| d.name().map(|n| n.trim() == name).unwrap_or(false))
            .ok_or_else(|| format!("no output device found with name {}", name))?,
        None => host
            .default_output_device()
            .ok_or("no default output device")?,
    };

    let default_config = device.default_output_config()?;
    let sample_rate = default_config.sample_rate().0;
    let config = StreamConfig {
        channels: default_config.channels(),
        sample_rate: default_config.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };

    engine.prepare(sample_rate as f64, 0);
    engine.start_streaming()?;
    let schedule = EventSchedule::from_midi_file(midi_path, sample_rate as f64)?;

    info!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels = config.channels,
        "Playing"
    );

    let (done_tx, done_rx): (Sender<()>, Receiver<()>) = bounded(1);
    let stream = match default_config.sample_format() {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, engine, schedule, done_tx)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, engine, schedule, done_tx)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, engine, schedule, done_tx)?,
        format => return Err(format!("unsupported device sample format {format:?}").into()),
    };
    stream.play()?;

    // Wait for the callback to report completion.
    done_rx.recv()?;
    Ok(())
}

/// Builds the output stream. The engine and schedule move into the
/// callback; completion is signaled once the schedule is exhausted and all
/// voices are silent.
fn build_stream<T: SizedSample + FromSample<f32>>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut engine: Sampler,
    mut schedule: EventSchedule,
    done_tx: Sender<()>,
) -> Result<Stream, Box<dyn Error>> {
    let out_channels = config.channels as usize;
    let mut left: Vec<f32> = Vec::new();
    let mut right: Vec<f32> = Vec::new();
    let mut finished = false;

    let error_callback = |err: cpal::StreamError| {
        error!(err = err.to_string(), "Error during stream.");
    };

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let frames = data.len() / out_channels;
            if left.len() < frames {
                left.resize(frames, 0.0);
                right.resize(frames, 0.0);
            }

            let events = schedule.next_block(frames);
            engine.process(&mut left[..frames], &mut right[..frames], events);

            for frame in 0..frames {
                let base = frame * out_channels;
                data[base] = T::from_sample(left[frame]);
                if out_channels > 1 {
                    data[base + 1] = T::from_sample(right[frame]);
                }
                for channel in 2..out_channels {
                    data[base + channel] = T::from_sample(0.0f32);
                }
            }

            if !finished && schedule.is_finished() && engine.active_voice_count() == 0 {
                finished = true;
                let _ = done_tx.try_send(());
            }
        },
        error_callback,
        None,
    );

    match stream {
        Ok(stream) => Ok(stream),
        Err(e) => Err(e.to_string().into()),
    }
}
