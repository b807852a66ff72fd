//! The host facade wiring engine, dispatcher, MIDI and controller together.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use ensemble_core::{AudioEngine, Controller, EventDispatcher, MidiDispatcher, Result};

const TIMING_REPORT_FILE: &str = "ensemble_timings.txt";

/// A fully wired host: the realtime engine, the dispatcher thread, the MIDI
/// routing hub and the controller surfaces.
pub struct EnsembleHost {
    engine: Arc<AudioEngine>,
    midi: Arc<MidiDispatcher>,
    controller: Controller,
    dispatcher: Mutex<Option<EventDispatcher>>,
}

impl EnsembleHost {
    pub fn builder() -> crate::EnsembleHostBuilder {
        crate::EnsembleHostBuilder::default()
    }

    pub(crate) fn from_parts(
        engine: Arc<AudioEngine>,
        midi: Arc<MidiDispatcher>,
        dispatcher: EventDispatcher,
    ) -> Self {
        let controller = Controller::new(engine.clone(), midi.clone());
        Self {
            engine,
            midi,
            controller,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// The engine, for audio backends and advanced use.
    pub fn engine(&self) -> &Arc<AudioEngine> {
        &self.engine
    }

    /// The MIDI routing hub, for MIDI backends.
    pub fn midi(&self) -> &Arc<MidiDispatcher> {
        &self.midi
    }

    /// The controller command surfaces.
    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Process interleaved audio; the audio backend's entry point. The frame
    /// count must be a multiple of the chunk size.
    pub fn process(&self, input: &[f32], output: &mut [f32]) -> Result<()> {
        self.engine.process(input, output)
    }

    /// Mark the engine realtime: structural changes now go through the
    /// realtime thread instead of being applied directly.
    pub fn enable_realtime(&self, enabled: bool) {
        self.engine.enable_realtime(enabled);
    }

    /// Stop the host: the engine leaves realtime mode, outstanding commands
    /// fail, subscribers get a final shutdown notice, and collected timing
    /// statistics are written to disk.
    pub fn shutdown(&self) {
        self.engine.enable_realtime(false);

        if self.engine.timings().enabled() {
            self.write_timing_report();
        }

        if let Some(mut dispatcher) = self.dispatcher.lock().take() {
            dispatcher.stop();
        }
        info!("host shut down");
    }

    fn write_timing_report(&self) {
        let timings = self.engine.timings();
        timings.set_enabled(false);
        timings.process_pending();

        let registry = self.engine.registry();
        let mut nodes = Vec::new();
        for track in registry.all_tracks() {
            nodes.push((track.id(), track.data().name()));
            for processor_id in registry.processors_on_track(track.id()) {
                if let Some(data) = registry.data(processor_id) {
                    nodes.push((processor_id, data.name()));
                }
            }
        }

        match std::fs::File::create(TIMING_REPORT_FILE) {
            Ok(mut file) => {
                if let Err(error) = timings.write_report(&mut file, &nodes) {
                    warn!(%error, "could not write timing report");
                }
            }
            Err(error) => warn!(%error, "could not create timing report file"),
        }
    }
}

impl Drop for EnsembleHost {
    fn drop(&mut self) {
        if self.dispatcher.lock().is_some() {
            self.shutdown();
        }
    }
}
