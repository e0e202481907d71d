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

//! Standard MIDI file playback scheduling.
//!
//! Converts a MIDI file into engine events stamped with absolute sample
//! frames (honoring the file's tempo map), then deals them out one audio
//! block at a time for the offline renderer and the realtime player.

use std::error::Error;
use std::fs;
use std::path::Path;

use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use tracing::debug;

use crate::engine::{Event, EventKind};

/// Microseconds per quarter note until the file says otherwise.
const DEFAULT_TEMPO: f64 = 500_000.0;

/// An engine event at an absolute frame position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedEvent {
    pub frame: u64,
    pub kind: EventKind,
}

/// A time-ordered queue of engine events, consumed block by block.
pub struct EventSchedule {
    events: Vec<TimedEvent>,
    cursor: usize,
    /// Absolute frame the next block starts at.
    position: u64,
    /// Block events with block-relative offsets, reused every call.
    scratch: Vec<Event>,
}

impl EventSchedule {
    pub fn new(mut events: Vec<TimedEvent>) -> Self {
        events.sort_by_key(|e| e.frame);
        Self {
            events,
            cursor: 0,
            position: 0,
            scratch: Vec::new(),
        }
    }

    /// Loads and converts a standard MIDI file.
    pub fn from_midi_file<P: AsRef<Path>>(
        path: P,
        sample_rate: f64,
    ) -> Result<Self, Box<dyn Error>> {
        let path = path.as_ref();
        let bytes = fs::read(path)
            .map_err(|e| format!("error reading {}: {}", path.display(), e))?;
        let smf = Smf::parse(&bytes)
            .map_err(|e| format!("error parsing {}: {}", path.display(), e))?;
        let schedule = Self::from_smf(&smf, sample_rate);
        debug!(
            path = ?path,
            events = schedule.events.len(),
            "MIDI file scheduled"
        );
        Ok(schedule)
    }

    /// Converts a parsed MIDI file, merging all tracks and applying the
    /// tempo map.
    pub fn from_smf(smf: &Smf, sample_rate: f64) -> Self {
        // Merge every track into one absolute-tick stream.
        let mut ticked: Vec<(u64, &TrackEventKind)> = Vec::new();
        for track in &smf.tracks {
            let mut tick = 0u64;
            for event in track {
                tick += u64::from(u32::from(event.delta));
                ticked.push((tick, &event.kind));
            }
        }
        ticked.sort_by_key(|(tick, _)| *tick);

        // Seconds per tick; updated by tempo meta events for metrical files.
        let mut seconds_per_tick = match smf.header.timing {
            Timing::Metrical(ticks_per_beat) => {
                DEFAULT_TEMPO / 1.0e6 / f64::from(u16::from(ticks_per_beat))
            }
            Timing::Timecode(fps, subframe) => 1.0 / (fps.as_f32() as f64 * subframe as f64),
        };

        let mut events = Vec::new();
        let mut last_tick = 0u64;
        let mut last_frame = 0f64;
        for (tick, kind) in ticked {
            let frame = last_frame + (tick - last_tick) as f64 * seconds_per_tick * sample_rate;
            last_tick = tick;
            last_frame = frame;

            match kind {
                TrackEventKind::Meta(MetaMessage::Tempo(us_per_beat)) => {
                    if let Timing::Metrical(ticks_per_beat) = smf.header.timing {
                        seconds_per_tick = f64::from(u32::from(*us_per_beat))
                            / 1.0e6
                            / f64::from(u16::from(ticks_per_beat));
                    }
                }
                TrackEventKind::Midi { message, .. } => {
                    if let Some(kind) = convert_message(message) {
                        events.push(TimedEvent {
                            frame: frame.round() as u64,
                            kind,
                        });
                    }
                }
                _ => {}
            }
        }

        Self::new(events)
    }

    pub fn events(&self) -> &[TimedEvent] {
        &self.events
    }

    /// True once every event has been dealt out.
    pub fn is_finished(&self) -> bool {
        self.cursor >= self.events.len()
    }

    /// Frame of the last event, or 0 for an empty schedule.
    pub fn end_frame(&self) -> u64 {
        self.events.last().map_or(0, |e| e.frame)
    }

    /// Returns the events due in the next `frames` frames, with offsets
    /// relative to the block start, and advances the schedule.
    pub fn next_block(&mut self, frames: usize) -> &[Event] {
        self.scratch.clear();
        let end = self.position + frames as u64;
        while self.cursor < self.events.len() && self.events[self.cursor].frame < end {
            let event = self.events[self.cursor];
            self.scratch.push(Event {
                offset: (event.frame - self.position) as u32,
                kind: event.kind,
            });
            self.cursor += 1;
        }
        self.position = end;
        &self.scratch
    }
}

/// Maps a MIDI channel message to an engine event. Note-on with velocity
/// zero is note-off, per convention.
fn convert_message(message: &MidiMessage) -> Option<EventKind> {
    match message {
        MidiMessage::NoteOn { key, vel } if u8::from(*vel) == 0 => Some(EventKind::NoteOff {
            note: u8::from(*key),
        }),
        MidiMessage::NoteOn { key, vel } => Some(EventKind::NoteOn {
            note: u8::from(*key),
            velocity: f32::from(u8::from(*vel)) / 127.0,
        }),
        MidiMessage::NoteOff { key, .. } => Some(EventKind::NoteOff {
            note: u8::from(*key),
        }),
        MidiMessage::Controller { controller, value } => Some(EventKind::ControlChange {
            controller: u8::from(*controller),
            value: u8::from(*value),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use midly::{num::u28, Format, Header, TrackEvent};

    fn midi_event(delta: u32, message: MidiMessage) -> TrackEvent<'static> {
        TrackEvent {
            delta: u28::from(delta),
            kind: TrackEventKind::Midi {
                channel: 0.into(),
                message,
            },
        }
    }

    fn note_on(delta: u32, key: u8, vel: u8) -> TrackEvent<'static> {
        midi_event(
            delta,
            MidiMessage::NoteOn {
                key: key.into(),
                vel: vel.into(),
            },
        )
    }

    fn note_off(delta: u32, key: u8) -> TrackEvent<'static> {
        midi_event(
            delta,
            MidiMessage::NoteOff {
                key: key.into(),
                vel: 0.into(),
            },
        )
    }

    #[test]
    fn test_metrical_timing_conversion() {
        // 480 ticks per beat at the default 120bpm: one beat is 0.5s, so
        // 480 ticks land at frame 22050 at 44.1kHz.
        let mut smf = Smf::new(Header::new(
            Format::SingleTrack,
            Timing::Metrical(480.into()),
        ));
        smf.tracks
            .push(vec![note_on(0, 60, 127), note_off(480, 60)]);

        let schedule = EventSchedule::from_smf(&smf, 44100.0);
        assert_eq!(schedule.events().len(), 2);
        assert_eq!(schedule.events()[0].frame, 0);
        assert_eq!(
            schedule.events()[0].kind,
            EventKind::NoteOn {
                note: 60,
                velocity: 1.0
            }
        );
        assert_eq!(schedule.events()[1].frame, 22050);
        assert_eq!(schedule.events()[1].kind, EventKind::NoteOff { note: 60 });
    }

    #[test]
    fn test_tempo_change_shifts_later_events() {
        let mut smf = Smf::new(Header::new(
            Format::SingleTrack,
            Timing::Metrical(480.into()),
        ));
        smf.tracks.push(vec![
            note_on(0, 60, 100),
            // Double-time from here (250ms per beat).
            TrackEvent {
                delta: u28::from(480),
                kind: TrackEventKind::Meta(MetaMessage::Tempo(250_000.into())),
            },
            note_on(480, 62, 100),
        ]);

        let schedule = EventSchedule::from_smf(&smf, 44100.0);
        // First beat at the default tempo, second beat at double time.
        assert_eq!(schedule.events()[1].frame, 22050 + 11025);
    }

    #[test]
    fn test_note_on_velocity_zero_is_note_off() {
        let mut smf = Smf::new(Header::new(
            Format::SingleTrack,
            Timing::Metrical(480.into()),
        ));
        smf.tracks.push(vec![note_on(0, 60, 100), note_on(10, 60, 0)]);

        let schedule = EventSchedule::from_smf(&smf, 44100.0);
        assert_eq!(schedule.events()[1].kind, EventKind::NoteOff { note: 60 });
    }

    #[test]
    fn test_multiple_tracks_are_merged_in_order() {
        let mut smf = Smf::new(Header::new(
            Format::Parallel,
            Timing::Metrical(100.into()),
        ));
        smf.tracks.push(vec![note_on(200, 60, 100)]);
        smf.tracks.push(vec![note_on(100, 72, 100)]);

        let schedule = EventSchedule::from_smf(&smf, 44100.0);
        assert_eq!(schedule.events().len(), 2);
        assert!(matches!(
            schedule.events()[0].kind,
            EventKind::NoteOn { note: 72, .. }
        ));
        assert!(matches!(
            schedule.events()[1].kind,
            EventKind::NoteOn { note: 60, .. }
        ));
    }

    #[test]
    fn test_next_block_deals_events_with_offsets() {
        let mut schedule = EventSchedule::new(vec![
            TimedEvent {
                frame: 0,
                kind: EventKind::NoteOn {
                    note: 60,
                    velocity: 1.0,
                },
            },
            TimedEvent {
                frame: 100,
                kind: EventKind::ControlChange {
                    controller: 64,
                    value: 127,
                },
            },
            TimedEvent {
                frame: 600,
                kind: EventKind::NoteOff { note: 60 },
            },
        ]);
        assert_eq!(schedule.end_frame(), 600);

        let block = schedule.next_block(512).to_vec();
        assert_eq!(block.len(), 2);
        assert_eq!(block[0].offset, 0);
        assert_eq!(block[1].offset, 100);
        assert!(!schedule.is_finished());

        let block = schedule.next_block(512).to_vec();
        assert_eq!(block.len(), 1);
        assert_eq!(block[0].offset, 88);
        assert!(schedule.is_finished());

        assert!(schedule.next_block(512).is_empty());
    }

    #[test]
    fn test_midi_file_round_trip() {
        let mut smf = Smf::new(Header::new(
            Format::SingleTrack,
            Timing::Metrical(480.into()),
        ));
        smf.tracks
            .push(vec![note_on(0, 64, 90), note_off(960, 64)]);

        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("test.mid");
        smf.save(&path).unwrap();

        let schedule = EventSchedule::from_midi_file(&path, 44100.0).unwrap();
        assert_eq!(schedule.events().len(), 2);
        assert_eq!(schedule.events()[1].frame, 44100);

        assert!(EventSchedule::from_midi_file("/nonexistent.mid", 44100.0).is_err());
    }
}
