//! Program (preset) surface.

use std::sync::Arc;

use super::CommandResult;
use crate::engine::AudioEngine;
use crate::event::{RtEvent, RtEventPayload};
use crate::types::{ControlStatus, ObjectId};

pub struct ProgramController {
    engine: Arc<AudioEngine>,
}

impl ProgramController {
    pub(super) fn new(engine: Arc<AudioEngine>) -> Self {
        Self { engine }
    }

    pub fn processor_current_program(&self, processor_id: ObjectId) -> CommandResult<usize> {
        let data = self
            .engine
            .registry()
            .data(processor_id)
            .ok_or(ControlStatus::NotFound)?;
        if !data.supports_programs() {
            return Err(ControlStatus::Unsupported);
        }
        data.current_program().ok_or(ControlStatus::Unsupported)
    }

    pub fn processor_current_program_name(&self, processor_id: ObjectId) -> CommandResult<String> {
        let program = self.processor_current_program(processor_id)?;
        self.processor_program_name(processor_id, program)
    }

    pub fn processor_program_name(
        &self,
        processor_id: ObjectId,
        program: usize,
    ) -> CommandResult<String> {
        let data = self
            .engine
            .registry()
            .data(processor_id)
            .ok_or(ControlStatus::NotFound)?;
        if !data.supports_programs() {
            return Err(ControlStatus::Unsupported);
        }
        data.programs()
            .get(program)
            .cloned()
            .ok_or(ControlStatus::OutOfRange)
    }

    pub fn processor_programs(&self, processor_id: ObjectId) -> CommandResult<Vec<String>> {
        let data = self
            .engine
            .registry()
            .data(processor_id)
            .ok_or(ControlStatus::NotFound)?;
        if !data.supports_programs() {
            return Err(ControlStatus::Unsupported);
        }
        Ok(data.programs().to_vec())
    }

    pub fn set_processor_program(&self, processor_id: ObjectId, program: usize) -> ControlStatus {
        let Some(data) = self.engine.registry().data(processor_id) else {
            return ControlStatus::NotFound;
        };
        if !data.supports_programs() {
            return ControlStatus::Unsupported;
        }
        if !data.set_current_program(program) {
            return ControlStatus::OutOfRange;
        }
        // Native units sync their internal program when the event lands.
        let _ = self.engine.send_rt_event(RtEvent::new(
            processor_id,
            0,
            RtEventPayload::ProgramChange { program: program as u32 },
        ));
        ControlStatus::Ok
    }
}
