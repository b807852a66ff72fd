//! Channel-aware passthrough unit.

use std::sync::Arc;

use crate::buffer::SampleBuffer;
use crate::event::{RtEvent, RtEventPayload};
use crate::parameter::ParameterStore;
use crate::processor::{bypass_passthrough, Processor, ProcessorData};

const MAX_CHANNELS: usize = 8;

/// Forwards input to output with the deterministic channel mapping used for
/// bypassed units.
pub struct PassthroughProcessor {
    data: Arc<ProcessorData>,
}

impl PassthroughProcessor {
    pub fn new() -> Self {
        Self {
            data: ProcessorData::new(
                super::PASSTHROUGH_UID,
                "Passthrough",
                MAX_CHANNELS,
                MAX_CHANNELS,
                ParameterStore::new(),
                Vec::new(),
            ),
        }
    }
}

impl Default for PassthroughProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for PassthroughProcessor {
    fn data(&self) -> &Arc<ProcessorData> {
        &self.data
    }

    fn process_audio(&mut self, input: &SampleBuffer, output: &mut SampleBuffer) {
        bypass_passthrough(input, output);
    }

    fn process_event(&mut self, event: RtEvent) {
        if let RtEventPayload::SetBypass { bypassed } = event.payload {
            self.data.set_bypassed(bypassed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_is_exact_for_matching_channels() {
        let mut processor = PassthroughProcessor::new();
        let mut input = SampleBuffer::new(2);
        input.channel_mut(0).fill(0.25);
        input.channel_mut(1).fill(-0.75);
        let mut output = SampleBuffer::new(2);
        processor.process_audio(&input, &mut output);
        assert_eq!(output.channel(0), input.channel(0));
        assert_eq!(output.channel(1), input.channel(1));
    }
}
