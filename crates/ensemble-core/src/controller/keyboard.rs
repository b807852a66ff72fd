//! Keyboard input surface: note and channel messages onto tracks.

use std::sync::Arc;

use super::status_from_result;
use crate::engine::AudioEngine;
use crate::event::RtEvent;
use crate::types::{ControlStatus, ObjectId};

pub struct KeyboardController {
    engine: Arc<AudioEngine>,
}

impl KeyboardController {
    pub(super) fn new(engine: Arc<AudioEngine>) -> Self {
        Self { engine }
    }

    fn send(&self, track_id: ObjectId, event: RtEvent) -> ControlStatus {
        if self.engine.registry().track(track_id).is_none() {
            return ControlStatus::NotFound;
        }
        status_from_result(self.engine.send_rt_event(event))
    }

    pub fn note_on(&self, track_id: ObjectId, channel: u8, note: u8, velocity: f32) -> ControlStatus {
        if channel > 15 || note > 127 {
            return ControlStatus::InvalidArguments;
        }
        self.send(
            track_id,
            RtEvent::note_on(track_id, 0, channel, note, velocity.clamp(0.0, 1.0)),
        )
    }

    pub fn note_off(&self, track_id: ObjectId, channel: u8, note: u8, velocity: f32) -> ControlStatus {
        if channel > 15 || note > 127 {
            return ControlStatus::InvalidArguments;
        }
        self.send(
            track_id,
            RtEvent::note_off(track_id, 0, channel, note, velocity.clamp(0.0, 1.0)),
        )
    }

    pub fn note_aftertouch(&self, track_id: ObjectId, channel: u8, note: u8, value: f32) -> ControlStatus {
        if channel > 15 || note > 127 {
            return ControlStatus::InvalidArguments;
        }
        self.send(
            track_id,
            RtEvent::note_aftertouch(track_id, 0, channel, note, value.clamp(0.0, 1.0)),
        )
    }

    pub fn pitch_bend(&self, track_id: ObjectId, channel: u8, value: f32) -> ControlStatus {
        if channel > 15 {
            return ControlStatus::InvalidArguments;
        }
        self.send(
            track_id,
            RtEvent::pitch_bend(track_id, 0, channel, value.clamp(-1.0, 1.0)),
        )
    }

    pub fn modulation(&self, track_id: ObjectId, channel: u8, value: f32) -> ControlStatus {
        if channel > 15 {
            return ControlStatus::InvalidArguments;
        }
        self.send(
            track_id,
            RtEvent::modulation(track_id, 0, channel, value.clamp(0.0, 1.0)),
        )
    }

    pub fn aftertouch(&self, track_id: ObjectId, channel: u8, value: f32) -> ControlStatus {
        if channel > 15 {
            return ControlStatus::InvalidArguments;
        }
        self.send(
            track_id,
            RtEvent::aftertouch(track_id, 0, channel, value.clamp(0.0, 1.0)),
        )
    }
}
