//! Plugin backend interface.
//!
//! Format-specific loaders (VST, CLAP, LV2, ...) live outside the core. A
//! backend hands out [`PluginInstance`] handles; [`PluginProcessor`] wraps
//! one and bridges it into the [`Processor`] model. Dropping an instance
//! unloads it.

use std::sync::Arc;

use crate::buffer::SampleBuffer;
use crate::error::Result;
use crate::event::{RtEvent, RtEventPayload};
use crate::parameter::{ParameterRange, ParameterScale, ParameterStore};
use crate::processor::{bypass_passthrough, Processor, ProcessorData};
use crate::state::ProcessorState;

/// Parameter declaration reported by a native plugin.
#[derive(Debug, Clone)]
pub struct PluginParameterInfo {
    pub name: String,
    pub label: String,
    pub unit: String,
    pub min: f32,
    pub max: f32,
    pub default: f32,
    pub logarithmic: bool,
    pub automatable: bool,
}

/// A loaded native plugin.
pub trait PluginInstance: Send {
    /// Channel capacity of the native unit.
    fn channel_capacity(&self) -> (usize, usize);

    fn parameter_infos(&self) -> Vec<PluginParameterInfo>;

    fn enumerate_programs(&self) -> Vec<String>;

    fn set_program(&mut self, index: usize) -> Result<()>;

    fn process_audio(&mut self, input: &SampleBuffer, output: &mut SampleBuffer);

    fn process_event(&mut self, event: RtEvent);

    /// Opaque native state blob.
    fn state_export(&mut self) -> Result<Vec<u8>>;

    fn state_apply(&mut self, bytes: &[u8]) -> Result<()>;
}

/// Loader for one plugin format.
pub trait PluginBackend: Send + Sync {
    /// Format tag used in processor uids, e.g. `vst3`.
    fn format(&self) -> &str;

    fn load(&self, uid: &str, path: &str, sample_rate: f64) -> Result<Box<dyn PluginInstance>>;
}

/// Name of the property holding the embedded native state blob.
pub const NATIVE_STATE_PROPERTY: &str = "native_state";

/// Bridges a [`PluginInstance`] into the processor model.
pub struct PluginProcessor {
    data: Arc<ProcessorData>,
    native_state_property: crate::types::ObjectId,
    instance: Box<dyn PluginInstance>,
}

impl PluginProcessor {
    pub fn new(uid: &str, label: &str, instance: Box<dyn PluginInstance>) -> Self {
        let (max_inputs, max_outputs) = instance.channel_capacity();
        let mut parameters = ParameterStore::new();
        for info in instance.parameter_infos() {
            let scale = if info.logarithmic {
                ParameterScale::Logarithmic
            } else {
                ParameterScale::Linear
            };
            parameters.register_float(
                &info.name,
                &info.label,
                &info.unit,
                info.default,
                ParameterRange::new(info.min, info.max, scale),
                info.automatable,
            );
        }
        let native_state_property = parameters.register_property(NATIVE_STATE_PROPERTY, "Native state", "");
        let programs = instance.enumerate_programs();
        let data = ProcessorData::new(uid, label, max_inputs, max_outputs, parameters, programs);
        Self {
            data,
            native_state_property,
            instance,
        }
    }

}

impl Processor for PluginProcessor {
    fn data(&self) -> &Arc<ProcessorData> {
        &self.data
    }

    fn process_audio(&mut self, input: &SampleBuffer, output: &mut SampleBuffer) {
        if self.data.bypassed() {
            bypass_passthrough(input, output);
            return;
        }
        self.instance.process_audio(input, output);
    }

    fn process_event(&mut self, event: RtEvent) {
        match event.payload {
            RtEventPayload::SetBypass { bypassed } => self.data.set_bypassed(bypassed),
            RtEventPayload::ParameterChange { parameter_id, value } if !self.data.bypassed() => {
                self.data.parameters().set_normalized(parameter_id, value);
                self.instance.process_event(event);
            }
            RtEventPayload::ProgramChange { program } if !self.data.bypassed() => {
                if self.instance.set_program(program as usize).is_ok() {
                    self.data.set_current_program(program as usize);
                }
            }
            _ if !self.data.bypassed() => self.instance.process_event(event),
            _ => {}
        }
    }

    fn set_program(&mut self, index: usize) -> Result<()> {
        self.instance.set_program(index)?;
        self.data.set_current_program(index);
        Ok(())
    }

    fn apply_state(&mut self, state: &ProcessorState) {
        if let Some(bypassed) = state.bypassed() {
            self.data.set_bypassed(bypassed);
        }
        for &(parameter_id, value) in state.parameters() {
            self.process_event(RtEvent::parameter_change(self.data.id(), 0, parameter_id, value));
        }
        for (property_id, value) in state.properties() {
            if *property_id == self.native_state_property {
                if let Some(bytes) = decode_hex(value) {
                    let _ = self.instance.state_apply(&bytes);
                }
            }
            self.data.parameters().set_property(*property_id, value);
        }
    }
}

fn decode_hex(value: &str) -> Option<Vec<u8>> {
    if value.len() % 2 != 0 {
        return None;
    }
    (0..value.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&value[i..i + 2], 16).ok())
        .collect()
}

/// Hex encoding used for the native state property.
pub fn encode_native_state(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    struct FakeInstance {
        programs: Vec<String>,
        current: usize,
        state: Vec<u8>,
        last_event: Option<RtEvent>,
    }

    impl PluginInstance for FakeInstance {
        fn channel_capacity(&self) -> (usize, usize) {
            (2, 2)
        }
        fn parameter_infos(&self) -> Vec<PluginParameterInfo> {
            vec![PluginParameterInfo {
                name: "drive".into(),
                label: "Drive".into(),
                unit: "".into(),
                min: 0.0,
                max: 1.0,
                default: 0.5,
                logarithmic: false,
                automatable: true,
            }]
        }
        fn enumerate_programs(&self) -> Vec<String> {
            self.programs.clone()
        }
        fn set_program(&mut self, index: usize) -> Result<()> {
            if index >= self.programs.len() {
                return Err(Error::Backend("program out of range".into()));
            }
            self.current = index;
            Ok(())
        }
        fn process_audio(&mut self, input: &SampleBuffer, output: &mut SampleBuffer) {
            output.copy_from(input);
        }
        fn process_event(&mut self, event: RtEvent) {
            self.last_event = Some(event);
        }
        fn state_export(&mut self) -> Result<Vec<u8>> {
            Ok(self.state.clone())
        }
        fn state_apply(&mut self, bytes: &[u8]) -> Result<()> {
            self.state = bytes.to_vec();
            Ok(())
        }
    }

    fn wrapped() -> PluginProcessor {
        PluginProcessor::new(
            "vst3.fake",
            "Fake",
            Box::new(FakeInstance {
                programs: vec!["default".into(), "crushed".into()],
                current: 0,
                state: Vec::new(),
                last_event: None,
            }),
        )
    }

    #[test]
    fn test_wrapper_exposes_declared_parameters() {
        let processor = wrapped();
        let parameters = processor.data().parameters();
        assert!(parameters.parameter_id("drive").is_some());
        assert_eq!(processor.data().programs().len(), 2);
    }

    #[test]
    fn test_set_program_updates_shared_data() {
        let mut processor = wrapped();
        processor.set_program(1).unwrap();
        assert_eq!(processor.data().current_program(), Some(1));
        assert!(processor.set_program(5).is_err());
    }

    #[test]
    fn test_hex_round_trip() {
        let bytes = vec![0u8, 1, 0xab, 0xff];
        let encoded = encode_native_state(&bytes);
        assert_eq!(decode_hex(&encoded), Some(bytes));
        assert_eq!(decode_hex("abc"), None);
    }
}
