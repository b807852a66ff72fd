//! Audio routing surface: engine channels to and from track channels.

use std::sync::Arc;

use super::{status_from_result, CommandResult};
use crate::connections::AudioConnection;
use crate::engine::AudioEngine;
use crate::types::{ControlStatus, ObjectId};

pub struct AudioRoutingController {
    engine: Arc<AudioEngine>,
}

impl AudioRoutingController {
    pub(super) fn new(engine: Arc<AudioEngine>) -> Self {
        Self { engine }
    }

    pub fn all_input_connections(&self) -> Vec<AudioConnection> {
        self.engine.audio_input_connections()
    }

    pub fn all_output_connections(&self) -> Vec<AudioConnection> {
        self.engine.audio_output_connections()
    }

    pub fn input_connections_for_track(
        &self,
        track_id: ObjectId,
    ) -> CommandResult<Vec<AudioConnection>> {
        if self.engine.registry().track(track_id).is_none() {
            return Err(ControlStatus::NotFound);
        }
        Ok(self.engine.audio_input_connections_for_track(track_id))
    }

    pub fn output_connections_for_track(
        &self,
        track_id: ObjectId,
    ) -> CommandResult<Vec<AudioConnection>> {
        if self.engine.registry().track(track_id).is_none() {
            return Err(ControlStatus::NotFound);
        }
        Ok(self.engine.audio_output_connections_for_track(track_id))
    }

    pub fn connect_input_channel_to_track(
        &self,
        engine_channel: usize,
        track_channel: usize,
        track_id: ObjectId,
    ) -> ControlStatus {
        status_from_result(
            self.engine
                .connect_audio_input_channel(engine_channel, track_channel, track_id),
        )
    }

    pub fn connect_track_to_output_channel(
        &self,
        engine_channel: usize,
        track_channel: usize,
        track_id: ObjectId,
    ) -> ControlStatus {
        status_from_result(
            self.engine
                .connect_audio_output_channel(engine_channel, track_channel, track_id),
        )
    }

    pub fn disconnect_input_channel_from_track(
        &self,
        engine_channel: usize,
        track_channel: usize,
        track_id: ObjectId,
    ) -> ControlStatus {
        status_from_result(
            self.engine
                .disconnect_audio_input_channel(engine_channel, track_channel, track_id),
        )
    }

    pub fn disconnect_track_from_output_channel(
        &self,
        engine_channel: usize,
        track_channel: usize,
        track_id: ObjectId,
    ) -> ControlStatus {
        status_from_result(
            self.engine
                .disconnect_audio_output_channel(engine_channel, track_channel, track_id),
        )
    }

    pub fn disconnect_all_inputs_from_track(&self, track_id: ObjectId) -> ControlStatus {
        if self.engine.registry().track(track_id).is_none() {
            return ControlStatus::NotFound;
        }
        self.engine.disconnect_all_inputs_from_track(track_id);
        ControlStatus::Ok
    }

    pub fn disconnect_all_outputs_from_track(&self, track_id: ObjectId) -> ControlStatus {
        if self.engine.registry().track(track_id).is_none() {
            return ControlStatus::NotFound;
        }
        self.engine.disconnect_all_outputs_from_track(track_id);
        ControlStatus::Ok
    }
}
