//! CPU timing statistics surface.

use std::sync::Arc;

use super::CommandResult;
use crate::engine::AudioEngine;
use crate::timings::{ProcessTimings, ENGINE_TIMING_ID};
use crate::types::{ControlStatus, ObjectId};

pub struct TimingController {
    engine: Arc<AudioEngine>,
}

impl TimingController {
    pub(super) fn new(engine: Arc<AudioEngine>) -> Self {
        Self { engine }
    }

    pub fn timings_enabled(&self) -> bool {
        self.engine.timings().enabled()
    }

    pub fn set_timings_enabled(&self, enabled: bool) -> ControlStatus {
        self.engine.timings().set_enabled(enabled);
        ControlStatus::Ok
    }

    pub fn engine_timings(&self) -> CommandResult<ProcessTimings> {
        self.node_timings(ENGINE_TIMING_ID)
    }

    pub fn track_timings(&self, track_id: ObjectId) -> CommandResult<ProcessTimings> {
        if self.engine.registry().track(track_id).is_none() {
            return Err(ControlStatus::NotFound);
        }
        self.node_timings(track_id)
    }

    pub fn processor_timings(&self, processor_id: ObjectId) -> CommandResult<ProcessTimings> {
        if self.engine.registry().processor(processor_id).is_none() {
            return Err(ControlStatus::NotFound);
        }
        self.node_timings(processor_id)
    }

    fn node_timings(&self, id: ObjectId) -> CommandResult<ProcessTimings> {
        let timings = self.engine.timings();
        timings.process_pending();
        timings.timings_for_node(id).ok_or(ControlStatus::NotFound)
    }

    pub fn reset_all_timings(&self) -> ControlStatus {
        self.engine.timings().reset();
        ControlStatus::Ok
    }

    pub fn reset_timings_for_node(&self, id: ObjectId) -> ControlStatus {
        self.engine.timings().reset_node(id);
        ControlStatus::Ok
    }
}
