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

//! The disk reader thread.
//!
//! A single background worker polls every voice slot a few hundred times a
//! second. When an active voice raises `needs_data`, the worker opens (or
//! reuses) a decoder for that voice's sample and copies frames into the
//! voice's ring buffer in `DISK_READ_FRAMES` chunks. The worker never
//! blocks on the audio thread and the audio thread never waits for the
//! worker; starvation on either side degrades into a short fade on the
//! affected voice, not a stall.
//!
//! Decoder handles live exclusively on this thread. A decoder is reopened
//! only when the voice's sample handle changes, so steady-state refills do
//! no allocation and no open/close churn.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::{SampleHandle, StreamState, DISK_READ_FRAMES, POLL_INTERVAL};
use crate::audio::{open_decoder, AudioDecoder};
use crate::instrument::{PreloadedSample, SampleCatalog};

/// Shared slot the control thread publishes new catalogs through. The
/// worker refreshes its snapshot from here only when it meets a handle from
/// an unknown generation, keeping the refill path lock-free.
pub type CatalogSlot = Arc<RwLock<Arc<SampleCatalog>>>;

/// Control handle for the disk reader thread. Dropping it stops the thread.
pub struct DiskStreamer {
    shutdown: Arc<AtomicBool>,
    wake_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl DiskStreamer {
    /// Spawns the worker thread servicing the given voice slots.
    pub fn start(voices: Vec<Arc<StreamState>>, catalog_slot: CatalogSlot) -> io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let (wake_tx, wake_rx) = bounded(1);

        let worker_shutdown = shutdown.clone();
        let thread = std::thread::Builder::new()
            .name("dfdsampler-disk".to_string())
            .spawn(move || {
                let mut worker = StreamerWorker::new(voices, catalog_slot, worker_shutdown);
                worker.run(wake_rx);
            })?;

        Ok(Self {
            shutdown,
            wake_tx,
            thread: Some(thread),
        })
    }

    /// Wakes the worker before its next poll tick (after a note-on or an
    /// instrument load). Best-effort: if a wakeup is already queued there is
    /// nothing to add.
    pub fn wake(&self) {
        let _ = self.wake_tx.try_send(());
    }

    /// Signals shutdown and joins the worker. Decoders close on the worker
    /// thread before it exits.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        let _ = self.wake_tx.try_send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for DiskStreamer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A decoder opened for a specific voice slot, tagged with the handle it
/// was opened for so a sample change is detected by comparison.
struct OpenDecoder {
    decoder: Box<dyn AudioDecoder>,
    handle: SampleHandle,
}

/// The worker state owned by the disk thread. Separate from [`DiskStreamer`]
/// so tests can drive polls and fills synchronously.
pub(crate) struct StreamerWorker {
    voices: Vec<Arc<StreamState>>,
    decoders: Vec<Option<OpenDecoder>>,
    /// Scratch planar buffer reused for every disk read.
    scratch: Vec<Vec<f32>>,
    catalog_slot: CatalogSlot,
    catalog: Arc<SampleCatalog>,
    shutdown: Arc<AtomicBool>,
}

impl StreamerWorker {
    pub(crate) fn new(
        voices: Vec<Arc<StreamState>>,
        catalog_slot: CatalogSlot,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let catalog = catalog_slot.read().clone();
        let decoders = voices.iter().map(|_| None).collect();
        Self {
            voices,
            decoders,
            scratch: vec![vec![0.0; DISK_READ_FRAMES]; 2],
            catalog_slot,
            catalog,
            shutdown,
        }
    }

    fn run(&mut self, wake_rx: Receiver<()>) {
        debug!("Disk streamer started");
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            self.poll_voices();

            match wake_rx.recv_timeout(POLL_INTERVAL) {
                Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("Disk streamer stopped");
    }

    /// One pass over every voice slot.
    pub(crate) fn poll_voices(&mut self) {
        for index in 0..self.voices.len() {
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            let voice = &self.voices[index];
            if voice.is_active() && voice.needs_more_data() {
                self.fill(index);
            }
        }
    }

    /// Resolves a handle against the catalog snapshot, refreshing the
    /// snapshot once if the generation is unknown.
    fn resolve(&mut self, handle: SampleHandle) -> Option<Arc<PreloadedSample>> {
        if handle.generation != self.catalog.generation() {
            self.catalog = self.catalog_slot.read().clone();
        }
        if handle.generation != self.catalog.generation() {
            return None;
        }
        self.catalog.get(handle.index).cloned()
    }

    /// Refills one voice's ring buffer from disk.
    pub(crate) fn fill(&mut self, index: usize) {
        let voice = self.voices[index].clone();

        let handle = match voice.sample_handle() {
            Some(handle) => handle,
            None => {
                voice.clear_needs_data();
                return;
            }
        };
        let sample = match self.resolve(handle) {
            Some(sample) => sample,
            None => {
                voice.clear_needs_data();
                return;
            }
        };

        // Open (or reopen) the decoder if this slot's sample changed.
        let reuse = matches!(&self.decoders[index], Some(open) if open.handle == handle);
        if !reuse {
            self.decoders[index] = None;
            match open_decoder(&sample.file_path) {
                Ok(decoder) => {
                    debug!(voice = index, sample = sample.name, "Opened decoder");
                    self.decoders[index] = Some(OpenDecoder { decoder, handle });
                }
                Err(e) => {
                    warn!(
                        voice = index,
                        path = ?sample.file_path,
                        error = %e,
                        "Failed to open sample for streaming"
                    );
                    voice.set_read_error(true);
                    voice.clear_needs_data();
                    return;
                }
            }
        }
        let open = match self.decoders[index].as_mut() {
            Some(open) => open,
            None => return,
        };

        let total_frames = sample.total_frames;
        let mut file_pos = voice.file_read_pos();
        if file_pos >= total_frames {
            voice.set_end_of_file(true);
            voice.clear_needs_data();
            return;
        }

        let ring = voice.ring();
        let mut space = ring.space_available();
        if space < DISK_READ_FRAMES {
            // Nearly full; the voice will ask again at its low watermark.
            voice.clear_needs_data();
            return;
        }

        while space >= DISK_READ_FRAMES
            && file_pos < total_frames
            && !self.shutdown.load(Ordering::Acquire)
        {
            // A steal can restart this slot mid-fill; the handle changes
            // before the slot reactivates, so stop feeding the old stream.
            if voice.sample_handle() != Some(handle) {
                break;
            }

            let frames = DISK_READ_FRAMES
                .min((total_frames - file_pos) as usize)
                .min(space);

            // Cleared first so a short read pads with silence instead of
            // leftovers from the previous chunk.
            for plane in &mut self.scratch {
                plane[..frames].fill(0.0);
            }

            if let Err(e) = open.decoder.read(&mut self.scratch, 0, frames, file_pos) {
                warn!(
                    voice = index,
                    path = ?sample.file_path,
                    error = %e,
                    "Disk read failed mid-stream"
                );
                voice.set_read_error(true);
                break;
            }

            let (first, second) = self.scratch.split_at(1);
            let left = &first[0];
            // Mono sources are duplicated into both ring channels.
            let right = if sample.channels >= 2 { &second[0] } else { left };
            ring.write_frames(&left[..frames], &right[..frames], frames);

            file_pos += frames as i64;
            voice.set_file_read_pos(file_pos);
            space = ring.space_available();
        }

        if file_pos >= total_frames {
            voice.set_end_of_file(true);
        }
        voice.clear_needs_data();
    }
}
