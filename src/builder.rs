//! Builder wiring the host's subsystems together.

use std::sync::Arc;

use ensemble_core::dispatcher::DispatcherContext;
use ensemble_core::{AudioEngine, EngineConfig, EventDispatcher, MidiDispatcher, Result};

use crate::EnsembleHost;

/// Builder for [`EnsembleHost`].
#[derive(Default)]
pub struct EnsembleHostBuilder {
    config: EngineConfig,
}

impl EnsembleHostBuilder {
    pub fn sample_rate(mut self, sample_rate: f64) -> Self {
        self.config.sample_rate = sample_rate;
        self
    }

    /// Number of CPU cores used for track rendering (default: 1).
    pub fn cpu_cores(mut self, cores: usize) -> Self {
        self.config.cpu_cores = cores;
        self
    }

    pub fn audio_channels(mut self, inputs: usize, outputs: usize) -> Self {
        self.config.input_channels = inputs;
        self.config.output_channels = outputs;
        self
    }

    pub fn midi_ports(mut self, inputs: usize, outputs: usize) -> Self {
        self.config.midi_input_ports = inputs;
        self.config.midi_output_ports = outputs;
        self
    }

    pub fn clip_detection(mut self, input: bool, output: bool) -> Self {
        self.config.input_clip_detection = input;
        self.config.output_clip_detection = output;
        self
    }

    /// Build the host: engine, MIDI routing hub and dispatcher thread.
    pub fn build(self) -> Result<EnsembleHost> {
        let midi_inputs = self.config.midi_input_ports;
        let midi_outputs = self.config.midi_output_ports;

        let engine = AudioEngine::new(self.config)?;
        let midi = Arc::new(MidiDispatcher::new(
            engine.rt_in_queue().clone(),
            engine.registry().clone(),
            midi_inputs,
            midi_outputs,
        ));

        let dispatcher = EventDispatcher::run(DispatcherContext {
            rt_out: engine.rt_out_queue().clone(),
            rt_in: engine.rt_in_queue().clone(),
            completions: engine.completions().clone(),
            notifications: engine.notifications().clone(),
            timings: engine.timings().clone(),
            midi: midi.clone(),
            transport_view: engine.transport_view().clone(),
        });

        Ok(EnsembleHost::from_parts(engine, midi, dispatcher))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let host = EnsembleHostBuilder::default().build().unwrap();
        assert_eq!(host.engine().sample_rate(), 48000.0);
        assert_eq!(host.engine().input_channel_count(), 2);
        assert_eq!(host.engine().output_channel_count(), 2);
        host.shutdown();
    }

    #[test]
    fn test_builder_rejects_bad_config() {
        assert!(EnsembleHostBuilder::default().sample_rate(10.0).build().is_err());
        assert!(EnsembleHostBuilder::default().cpu_cores(0).build().is_err());
    }
}
