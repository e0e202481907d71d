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
use std::error::Error;
use std::path::Path;

use clap::{crate_version, Parser, Subcommand};

use dfdsampler::audio::output::{list_output_devices, play_midi_file};
use dfdsampler::engine::Sampler;
use dfdsampler::instrument;
use dfdsampler::midi::EventSchedule;
use dfdsampler::render::render_to_wav;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A disk-streaming multi-zone sampler."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Lists the instruments in a library directory.
    Instruments {
        /// The path to the instrument library on disk.
        path: String,
    },
    /// Loads an instrument manifest and prints its sample zones.
    Verify {
        /// The path to an instrument.sss manifest.
        manifest: String,
    },
    /// Renders a MIDI file through an instrument into a stereo WAV file.
    Render {
        /// The path to an instrument.sss manifest.
        manifest: String,
        /// The MIDI file to render.
        midi: String,
        /// The WAV file to write.
        output: String,
        /// Sample rate of the rendered file.
        #[arg(long, default_value_t = 44100)]
        sample_rate: u32,
        /// Frames per processing block.
        #[arg(long, default_value_t = 512)]
        block_frames: usize,
        /// Master gain applied to the output.
        #[arg(long, default_value_t = 1.0)]
        gain: f32,
    },
    /// Plays a MIDI file through an instrument on an output device.
    Play {
        /// The path to an instrument.sss manifest.
        manifest: String,
        /// The MIDI file to play.
        midi: String,
        /// The output device name. Defaults to the system default device.
        #[arg(short, long)]
        device: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off,dfdsampler=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Devices {} => {
            for name in list_output_devices()? {
                println!("{}", name);
            }
            Ok(())
        }
        Commands::Instruments { path } => list_instruments(&path),
        Commands::Verify { manifest } => verify_instrument(&manifest),
        Commands::Render {
            manifest,
            midi,
            output,
            sample_rate,
            block_frames,
            gain,
        } => render(&manifest, &midi, &output, sample_rate, block_frames, gain),
        Commands::Play {
            manifest,
            midi,
            device,
        } => {
            let mut engine = Sampler::new();
            engine.load_instrument(Path::new(&manifest))?;
            play_midi_file(engine, Path::new(&midi), device.as_deref())
        }
    }
}

fn list_instruments(path: &str) -> Result<(), Box<dyn Error>> {
    let instruments = instrument::scan_instruments(Path::new(path))?;
    if instruments.is_empty() {
        println!("No instruments found in {}", path);
        return Ok(());
    }
    for info in instruments {
        if info.author.is_empty() {
            println!("{} ({})", info.name, info.folder.display());
        } else {
            println!("{} by {} ({})", info.name, info.author, info.folder.display());
        }
    }
    Ok(())
}

fn verify_instrument(manifest: &str) -> Result<(), Box<dyn Error>> {
    let catalog = instrument::load_instrument(Path::new(manifest), 1)?;
    println!(
        "{} ({} zones, {} KiB preloaded)",
        catalog.name(),
        catalog.len(),
        catalog.memory_size() / 1024
    );
    for sample in catalog.samples() {
        println!(
            "  {}: notes {}-{} vel {}-{} root {} ({} frames, {}ch @ {}Hz{})",
            sample.name,
            sample.lo_note,
            sample.hi_note,
            sample.lo_vel,
            sample.hi_vel,
            sample.root_note,
            sample.total_frames,
            sample.channels,
            sample.source_sample_rate,
            if sample.needs_streaming() {
                ", streamed"
            } else {
                ""
            }
        );
    }
    Ok(())
}

fn render(
    manifest: &str,
    midi: &str,
    output: &str,
    sample_rate: u32,
    block_frames: usize,
    gain: f32,
) -> Result<(), Box<dyn Error>> {
    let mut engine = Sampler::new();
    engine.load_instrument(Path::new(manifest))?;
    engine.params().set_gain(gain);
    engine.start_streaming()?;

    let mut schedule = EventSchedule::from_midi_file(Path::new(midi), sample_rate as f64)?;
    let stats = render_to_wav(
        &mut engine,
        &mut schedule,
        Path::new(output),
        sample_rate as f64,
        block_frames,
    )?;

    println!(
        "Wrote {} ({:.2}s at {}Hz)",
        output,
        stats.seconds(sample_rate as f64),
        sample_rate
    );
    Ok(())
}
