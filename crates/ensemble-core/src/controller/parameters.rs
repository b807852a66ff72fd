//! Parameter and property surface.

use std::sync::Arc;

use super::{status_from_result, CommandResult, ParameterInfo, PropertyInfo};
use crate::engine::AudioEngine;
use crate::event::RtEvent;
use crate::processor::ProcessorData;
use crate::types::{ControlStatus, ObjectId};

pub struct ParameterController {
    engine: Arc<AudioEngine>,
}

impl ParameterController {
    pub(super) fn new(engine: Arc<AudioEngine>) -> Self {
        Self { engine }
    }

    fn data(&self, processor_id: ObjectId) -> CommandResult<Arc<ProcessorData>> {
        self.engine
            .registry()
            .data(processor_id)
            .ok_or(ControlStatus::NotFound)
    }

    pub fn processor_parameters(&self, processor_id: ObjectId) -> CommandResult<Vec<ParameterInfo>> {
        let data = self.data(processor_id)?;
        Ok(data
            .parameters()
            .descriptors()
            .map(|descriptor| ParameterInfo {
                id: descriptor.id,
                name: descriptor.name.clone(),
                label: descriptor.label.clone(),
                unit: descriptor.unit.clone(),
                kind: descriptor.kind,
                min_domain_value: descriptor.range.min,
                max_domain_value: descriptor.range.max,
                automatable: descriptor.automatable,
            })
            .collect())
    }

    pub fn parameter_id_from_name(
        &self,
        processor_id: ObjectId,
        name: &str,
    ) -> CommandResult<ObjectId> {
        let data = self.data(processor_id)?;
        data.parameters()
            .parameter_id(name)
            .ok_or(ControlStatus::NotFound)
    }

    /// Current value, normalized to [0, 1].
    pub fn parameter_value(&self, processor_id: ObjectId, parameter_id: ObjectId) -> CommandResult<f32> {
        let data = self.data(processor_id)?;
        data.parameters()
            .normalized(parameter_id)
            .ok_or(ControlStatus::NotFound)
    }

    /// Current value converted into the parameter's domain range.
    pub fn parameter_value_in_domain(
        &self,
        processor_id: ObjectId,
        parameter_id: ObjectId,
    ) -> CommandResult<f32> {
        let data = self.data(processor_id)?;
        data.parameters()
            .domain_value(parameter_id)
            .ok_or(ControlStatus::NotFound)
    }

    pub fn parameter_value_as_string(
        &self,
        processor_id: ObjectId,
        parameter_id: ObjectId,
    ) -> CommandResult<String> {
        let data = self.data(processor_id)?;
        data.parameters()
            .value_as_string(parameter_id)
            .ok_or(ControlStatus::NotFound)
    }

    /// Set a parameter from a normalized value. Values outside [0, 1] are
    /// clamped; the command still succeeds.
    pub fn set_parameter_value(
        &self,
        processor_id: ObjectId,
        parameter_id: ObjectId,
        value: f32,
    ) -> ControlStatus {
        let Ok(data) = self.data(processor_id) else {
            return ControlStatus::NotFound;
        };
        if !data.parameters().set_normalized(parameter_id, value) {
            return ControlStatus::NotFound;
        }
        status_from_result(self.engine.send_rt_event(RtEvent::parameter_change(
            processor_id,
            0,
            parameter_id,
            value.clamp(0.0, 1.0),
        )))
    }

    pub fn processor_properties(&self, processor_id: ObjectId) -> CommandResult<Vec<PropertyInfo>> {
        let data = self.data(processor_id)?;
        Ok(data
            .parameters()
            .property_descriptors()
            .map(|descriptor| PropertyInfo {
                id: descriptor.id,
                name: descriptor.name.clone(),
                label: descriptor.label.clone(),
            })
            .collect())
    }

    pub fn property_id_from_name(
        &self,
        processor_id: ObjectId,
        name: &str,
    ) -> CommandResult<ObjectId> {
        let data = self.data(processor_id)?;
        data.parameters()
            .property_id(name)
            .ok_or(ControlStatus::NotFound)
    }

    pub fn property_value(
        &self,
        processor_id: ObjectId,
        property_id: ObjectId,
    ) -> CommandResult<String> {
        let data = self.data(processor_id)?;
        data.parameters()
            .property_value(property_id)
            .ok_or(ControlStatus::NotFound)
    }

    pub fn set_property_value(
        &self,
        processor_id: ObjectId,
        property_id: ObjectId,
        value: &str,
    ) -> ControlStatus {
        let Ok(data) = self.data(processor_id) else {
            return ControlStatus::NotFound;
        };
        if data.parameters().set_property(property_id, value) {
            ControlStatus::Ok
        } else {
            ControlStatus::NotFound
        }
    }
}
