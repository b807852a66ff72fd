//! Smoothed gain unit.

use std::sync::Arc;

use crate::buffer::SampleBuffer;
use crate::event::{RtEvent, RtEventPayload};
use crate::parameter::{ParameterRange, ParameterStore};
use crate::processor::{bypass_passthrough, Processor, ProcessorData};
use crate::smooth::SmoothedValue;
use crate::types::ObjectId;

const MAX_CHANNELS: usize = 8;
const SMOOTHING_TIME_SECS: f32 = 0.005;

/// Applies a smoothed linear gain to every channel.
///
/// The `gain` parameter is normalized with `gain_linear = normalized * 2`,
/// so 0.5 is unity.
pub struct GainProcessor {
    data: Arc<ProcessorData>,
    gain_parameter_id: ObjectId,
    gain: SmoothedValue,
}

impl GainProcessor {
    pub fn new(sample_rate: f64) -> Self {
        let mut parameters = ParameterStore::new();
        let gain_parameter_id = parameters.register_float(
            "gain",
            "Gain",
            "",
            1.0,
            ParameterRange::linear(0.0, 2.0),
            true,
        );
        let data = ProcessorData::new(
            super::GAIN_UID,
            "Gain",
            MAX_CHANNELS,
            MAX_CHANNELS,
            parameters,
            Vec::new(),
        );
        Self {
            data,
            gain_parameter_id,
            gain: SmoothedValue::new(1.0, SMOOTHING_TIME_SECS, sample_rate as f32),
        }
    }

    pub fn gain_parameter_id(&self) -> ObjectId {
        self.gain_parameter_id
    }
}

impl Processor for GainProcessor {
    fn data(&self) -> &Arc<ProcessorData> {
        &self.data
    }

    fn process_audio(&mut self, input: &SampleBuffer, output: &mut SampleBuffer) {
        if self.data.bypassed() {
            bypass_passthrough(input, output);
            return;
        }
        let channels = input.channel_count().min(output.channel_count());
        if channels == 0 {
            output.clear();
            return;
        }
        // One smoother drives every channel; step it once per frame.
        for frame in 0..crate::buffer::AUDIO_CHUNK_SIZE {
            let gain = self.gain.next_sample();
            for ch in 0..channels {
                output.channel_mut(ch)[frame] = input.channel(ch)[frame] * gain;
            }
        }
        for ch in channels..output.channel_count() {
            output.channel_mut(ch).fill(0.0);
        }
    }

    fn process_event(&mut self, event: RtEvent) {
        // A bypassed unit discards everything queued for it, parameter
        // changes included, until un-bypassed.
        if self.data.bypassed() && !matches!(event.payload, RtEventPayload::SetBypass { .. }) {
            return;
        }
        match event.payload {
            RtEventPayload::ParameterChange { parameter_id, value }
                if parameter_id == self.gain_parameter_id =>
            {
                self.data.parameters().set_normalized(parameter_id, value);
                let normalized = self
                    .data
                    .parameters()
                    .normalized(parameter_id)
                    .unwrap_or(0.5);
                self.gain.set_target(normalized * 2.0);
            }
            RtEventPayload::SetBypass { bypassed } => {
                self.data.set_bypassed(bypassed);
            }
            _ => {}
        }
    }

    fn configure(&mut self, sample_rate: f64) {
        let target = self.gain.target();
        self.gain = SmoothedValue::new(target, SMOOTHING_TIME_SECS, sample_rate as f32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::AUDIO_CHUNK_SIZE;

    fn run_blocks(processor: &mut GainProcessor, input: &SampleBuffer, blocks: usize) -> SampleBuffer {
        let mut output = SampleBuffer::new(input.channel_count());
        for _ in 0..blocks {
            processor.process_audio(input, &mut output);
        }
        output
    }

    #[test]
    fn test_unity_by_default() {
        let mut processor = GainProcessor::new(48000.0);
        let mut input = SampleBuffer::new(2);
        input.channel_mut(0).fill(0.5);
        input.channel_mut(1).fill(-0.5);
        let output = run_blocks(&mut processor, &input, 1);
        assert_eq!(output.channel(0)[AUDIO_CHUNK_SIZE - 1], 0.5);
        assert_eq!(output.channel(1)[AUDIO_CHUNK_SIZE - 1], -0.5);
    }

    #[test]
    fn test_gain_settles_after_change() {
        let mut processor = GainProcessor::new(48000.0);
        let parameter = processor.gain_parameter_id();
        let id = processor.data().id();
        processor.process_event(RtEvent::parameter_change(id, 0, parameter, 0.25));

        let mut input = SampleBuffer::new(1);
        input.channel_mut(0).fill(1.0);
        // 5 ms smoothing settles well inside 4 blocks at 48 kHz.
        let output = run_blocks(&mut processor, &input, 4);
        assert!((output.channel(0)[AUDIO_CHUNK_SIZE - 1] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_bypass_forwards_input() {
        let mut processor = GainProcessor::new(48000.0);
        let id = processor.data().id();
        processor.process_event(RtEvent::set_bypass(id, true));

        let mut input = SampleBuffer::new(2);
        for frame in 0..AUDIO_CHUNK_SIZE {
            input.channel_mut(0)[frame] = frame as f32 / AUDIO_CHUNK_SIZE as f32;
        }
        let mut output = SampleBuffer::new(2);
        processor.process_audio(&input, &mut output);
        assert_eq!(output.channel(0), input.channel(0));
        assert_eq!(output.channel(1), input.channel(1));
    }

    #[test]
    fn test_bypass_discards_parameter_events() {
        let mut processor = GainProcessor::new(48000.0);
        let parameter = processor.gain_parameter_id();
        let id = processor.data().id();

        processor.process_event(RtEvent::set_bypass(id, true));
        processor.process_event(RtEvent::parameter_change(id, 0, parameter, 0.0));
        processor.process_event(RtEvent::set_bypass(id, false));

        // The change sent while bypassed never landed.
        assert_eq!(processor.data().parameters().normalized(parameter), Some(0.5));
    }
}
