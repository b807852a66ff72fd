//! Audio graph surface: tracks, processors, bypass and state bundles.

use std::sync::Arc;

use super::{status_from_error, status_from_result, CommandResult, ProcessorInfo, TrackInfo};
use crate::engine::{AudioEngine, PluginInfo};
use crate::event::{RtEvent, RtEventPayload};
use crate::state::ProcessorState;
use crate::types::{ControlStatus, ObjectId};

pub struct AudioGraphController {
    engine: Arc<AudioEngine>,
}

impl AudioGraphController {
    pub(super) fn new(engine: Arc<AudioEngine>) -> Self {
        Self { engine }
    }

    fn processor_info_for(&self, id: ObjectId) -> Option<ProcessorInfo> {
        let data = self.engine.registry().data(id)?;
        Some(ProcessorInfo {
            id,
            name: data.name(),
            label: data.label().to_owned(),
            input_channels: data.input_channels(),
            output_channels: data.output_channels(),
            parameter_count: data.parameters().parameter_count(),
            program_count: data.programs().len(),
        })
    }

    pub fn all_processors(&self) -> Vec<ProcessorInfo> {
        self.engine
            .registry()
            .all_processors()
            .into_iter()
            .filter_map(|handle| self.processor_info_for(handle.id()))
            .collect()
    }

    pub fn all_tracks(&self) -> Vec<TrackInfo> {
        self.engine
            .registry()
            .all_tracks()
            .into_iter()
            .filter_map(|handle| self.track_info(handle.id()).ok())
            .collect()
    }

    pub fn processor_id_from_name(&self, name: &str) -> CommandResult<ObjectId> {
        self.engine
            .registry()
            .processor_id_by_name(name)
            .ok_or(ControlStatus::NotFound)
    }

    pub fn track_id_from_name(&self, name: &str) -> CommandResult<ObjectId> {
        self.engine
            .registry()
            .track_id_by_name(name)
            .ok_or(ControlStatus::NotFound)
    }

    pub fn processor_info(&self, processor_id: ObjectId) -> CommandResult<ProcessorInfo> {
        if self.engine.registry().processor(processor_id).is_none() {
            return Err(ControlStatus::NotFound);
        }
        self.processor_info_for(processor_id).ok_or(ControlStatus::NotFound)
    }

    pub fn track_info(&self, track_id: ObjectId) -> CommandResult<TrackInfo> {
        let registry = self.engine.registry();
        let track = registry.track(track_id).ok_or(ControlStatus::NotFound)?;
        let data = track.data();
        Ok(TrackInfo {
            id: track_id,
            name: data.name(),
            label: data.label().to_owned(),
            input_channels: data.input_channels(),
            output_channels: data.output_channels(),
            input_busses: track.input_busses(),
            output_busses: track.output_busses(),
            processors: registry.processors_on_track(track_id),
        })
    }

    pub fn processors_on_track(&self, track_id: ObjectId) -> CommandResult<Vec<ProcessorInfo>> {
        if self.engine.registry().track(track_id).is_none() {
            return Err(ControlStatus::NotFound);
        }
        Ok(self
            .engine
            .registry()
            .processors_on_track(track_id)
            .into_iter()
            .filter_map(|id| self.processor_info_for(id))
            .collect())
    }

    pub fn create_track(&self, name: &str, channels: usize) -> CommandResult<ObjectId> {
        self.engine
            .create_track(name, channels)
            .map_err(|e| status_from_error(&e))
    }

    pub fn create_multibus_track(
        &self,
        name: &str,
        input_busses: usize,
        output_busses: usize,
    ) -> CommandResult<ObjectId> {
        self.engine
            .create_multibus_track(name, input_busses, output_busses)
            .map_err(|e| status_from_error(&e))
    }

    pub fn delete_track(&self, track_id: ObjectId) -> ControlStatus {
        status_from_result(self.engine.delete_track(track_id))
    }

    /// Create a processor and insert it into a track, appended or before
    /// another processor. The processor is torn down again if the insertion
    /// fails.
    pub fn create_processor_on_track(
        &self,
        name: &str,
        info: &PluginInfo,
        track_id: ObjectId,
        before: Option<ObjectId>,
    ) -> CommandResult<ObjectId> {
        if self.engine.registry().track(track_id).is_none() {
            return Err(ControlStatus::NotFound);
        }
        let processor_id = self
            .engine
            .create_processor(info, name)
            .map_err(|e| status_from_error(&e))?;
        if let Err(error) = self.engine.add_processor_to_track(processor_id, track_id, before) {
            let _ = self.engine.delete_processor(processor_id);
            return Err(status_from_error(&error));
        }
        Ok(processor_id)
    }

    pub fn move_processor_on_track(
        &self,
        processor_id: ObjectId,
        source_track_id: ObjectId,
        dest_track_id: ObjectId,
        before: Option<ObjectId>,
    ) -> ControlStatus {
        status_from_result(self.engine.move_processor(
            processor_id,
            source_track_id,
            dest_track_id,
            before,
        ))
    }

    /// Remove a processor from its track and destroy it.
    pub fn delete_processor_from_track(
        &self,
        processor_id: ObjectId,
        track_id: ObjectId,
    ) -> ControlStatus {
        let status = status_from_result(
            self.engine.remove_processor_from_track(processor_id, track_id),
        );
        if status != ControlStatus::Ok {
            return status;
        }
        status_from_result(self.engine.delete_processor(processor_id))
    }

    pub fn processor_bypass_state(&self, processor_id: ObjectId) -> CommandResult<bool> {
        self.engine
            .registry()
            .data(processor_id)
            .map(|data| data.bypassed())
            .ok_or(ControlStatus::NotFound)
    }

    pub fn set_processor_bypass_state(&self, processor_id: ObjectId, bypassed: bool) -> ControlStatus {
        let Some(data) = self.engine.registry().data(processor_id) else {
            return ControlStatus::NotFound;
        };
        data.set_bypassed(bypassed);
        status_from_result(
            self.engine
                .send_rt_event(RtEvent::set_bypass(processor_id, bypassed)),
        )
    }

    /// Export the full state bundle of a processor.
    pub fn processor_state(&self, processor_id: ObjectId) -> CommandResult<ProcessorState> {
        self.engine
            .registry()
            .data(processor_id)
            .map(|data| data.export_state())
            .ok_or(ControlStatus::NotFound)
    }

    /// Apply a state bundle: program, bypass, parameter and property values.
    pub fn set_processor_state(&self, processor_id: ObjectId, state: &ProcessorState) -> ControlStatus {
        let Some(data) = self.engine.registry().data(processor_id) else {
            return ControlStatus::NotFound;
        };

        if let Some(program) = state.program() {
            if program >= 0 && data.set_current_program(program as usize) {
                let _ = self.engine.send_rt_event(RtEvent::new(
                    processor_id,
                    0,
                    RtEventPayload::ProgramChange { program: program as u32 },
                ));
            }
        }
        if let Some(bypassed) = state.bypassed() {
            data.set_bypassed(bypassed);
            let _ = self
                .engine
                .send_rt_event(RtEvent::set_bypass(processor_id, bypassed));
        }
        for &(parameter_id, value) in state.parameters() {
            if data.parameters().set_normalized(parameter_id, value) {
                let _ = self.engine.send_rt_event(RtEvent::parameter_change(
                    processor_id,
                    0,
                    parameter_id,
                    value,
                ));
            }
        }
        for (property_id, value) in state.properties() {
            data.parameters().set_property(*property_id, value);
        }
        ControlStatus::Ok
    }
}
