//! MIDI routing surface.

use std::sync::Arc;

use super::CommandResult;
use crate::engine::AudioEngine;
use crate::midi::{
    CcInputConnection, KbdInputConnection, KbdOutputConnection, MidiDispatcher, PcInputConnection,
};
use crate::types::{ControlStatus, ObjectId};

pub struct MidiController {
    engine: Arc<AudioEngine>,
    midi: Arc<MidiDispatcher>,
}

impl MidiController {
    pub(super) fn new(engine: Arc<AudioEngine>, midi: Arc<MidiDispatcher>) -> Self {
        Self { engine, midi }
    }

    pub fn input_ports(&self) -> usize {
        self.midi.input_ports()
    }

    pub fn output_ports(&self) -> usize {
        self.midi.output_ports()
    }

    pub fn all_kbd_input_connections(&self) -> Vec<KbdInputConnection> {
        self.midi.kb_input_connections()
    }

    pub fn all_kbd_output_connections(&self) -> Vec<KbdOutputConnection> {
        self.midi.kb_output_connections()
    }

    pub fn all_cc_input_connections(&self) -> Vec<CcInputConnection> {
        self.midi.cc_input_connections()
    }

    pub fn all_pc_input_connections(&self) -> Vec<PcInputConnection> {
        self.midi.pc_input_connections()
    }

    pub fn cc_input_connections_for_processor(
        &self,
        processor_id: ObjectId,
    ) -> CommandResult<Vec<CcInputConnection>> {
        if self.engine.registry().data(processor_id).is_none() {
            return Err(ControlStatus::NotFound);
        }
        Ok(self.midi.cc_input_connections_for_processor(processor_id))
    }

    pub fn pc_input_connections_for_processor(
        &self,
        processor_id: ObjectId,
    ) -> CommandResult<Vec<PcInputConnection>> {
        if self.engine.registry().data(processor_id).is_none() {
            return Err(ControlStatus::NotFound);
        }
        Ok(self.midi.pc_input_connections_for_processor(processor_id))
    }

    pub fn connect_kbd_input_to_track(
        &self,
        track_id: ObjectId,
        port: usize,
        channel: Option<u8>,
        raw_midi: bool,
    ) -> ControlStatus {
        if self.engine.registry().track(track_id).is_none() {
            return ControlStatus::NotFound;
        }
        if port >= self.midi.input_ports() || channel.is_some_and(|c| c > 15) {
            return ControlStatus::OutOfRange;
        }
        if self.midi.connect_kb_to_track(port, channel, track_id, raw_midi) {
            ControlStatus::Ok
        } else {
            ControlStatus::InvalidArguments
        }
    }

    pub fn disconnect_kbd_input_from_track(
        &self,
        track_id: ObjectId,
        port: usize,
        channel: Option<u8>,
        raw_midi: bool,
    ) -> ControlStatus {
        if self.midi.disconnect_kb_from_track(port, channel, track_id, raw_midi) {
            ControlStatus::Ok
        } else {
            ControlStatus::NotFound
        }
    }

    pub fn connect_kbd_output_from_track(
        &self,
        track_id: ObjectId,
        port: usize,
        channel: u8,
    ) -> ControlStatus {
        if self.engine.registry().track(track_id).is_none() {
            return ControlStatus::NotFound;
        }
        if port >= self.midi.output_ports() || channel > 15 {
            return ControlStatus::OutOfRange;
        }
        if self.midi.connect_track_to_output(port, channel, track_id) {
            ControlStatus::Ok
        } else {
            ControlStatus::InvalidArguments
        }
    }

    pub fn disconnect_kbd_output_from_track(
        &self,
        track_id: ObjectId,
        port: usize,
        channel: u8,
    ) -> ControlStatus {
        if self.midi.disconnect_track_from_output(port, channel, track_id) {
            ControlStatus::Ok
        } else {
            ControlStatus::NotFound
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn connect_cc_to_parameter(
        &self,
        processor_id: ObjectId,
        parameter_id: ObjectId,
        port: usize,
        channel: Option<u8>,
        cc_number: u8,
        min_range: f32,
        max_range: f32,
        relative_mode: bool,
    ) -> ControlStatus {
        let Some(data) = self.engine.registry().data(processor_id) else {
            return ControlStatus::NotFound;
        };
        if data.parameters().descriptor(parameter_id).is_none() {
            return ControlStatus::NotFound;
        }
        if port >= self.midi.input_ports() || cc_number > 127 || channel.is_some_and(|c| c > 15) {
            return ControlStatus::OutOfRange;
        }
        if self.midi.connect_cc_to_parameter(
            port,
            channel,
            cc_number,
            processor_id,
            parameter_id,
            min_range,
            max_range,
            relative_mode,
        ) {
            ControlStatus::Ok
        } else {
            ControlStatus::InvalidArguments
        }
    }

    pub fn disconnect_cc_from_parameter(
        &self,
        processor_id: ObjectId,
        port: usize,
        channel: Option<u8>,
        cc_number: u8,
    ) -> ControlStatus {
        if self.midi.disconnect_cc_from_parameter(port, channel, cc_number, processor_id) {
            ControlStatus::Ok
        } else {
            ControlStatus::NotFound
        }
    }

    pub fn connect_pc_to_processor(
        &self,
        processor_id: ObjectId,
        port: usize,
        channel: Option<u8>,
    ) -> ControlStatus {
        if self.engine.registry().data(processor_id).is_none() {
            return ControlStatus::NotFound;
        }
        if port >= self.midi.input_ports() || channel.is_some_and(|c| c > 15) {
            return ControlStatus::OutOfRange;
        }
        if self.midi.connect_pc_to_processor(port, channel, processor_id) {
            ControlStatus::Ok
        } else {
            ControlStatus::InvalidArguments
        }
    }

    pub fn disconnect_pc_from_processor(
        &self,
        processor_id: ObjectId,
        port: usize,
        channel: Option<u8>,
    ) -> ControlStatus {
        if self.midi.disconnect_pc_from_processor(port, channel, processor_id) {
            ControlStatus::Ok
        } else {
            ControlStatus::NotFound
        }
    }

    /// Remove every cc-in and pc-in route targeting a processor.
    pub fn disconnect_all_from_processor(&self, processor_id: ObjectId) -> ControlStatus {
        if self.engine.registry().data(processor_id).is_none() {
            return ControlStatus::NotFound;
        }
        self.midi.disconnect_all_from_processor(processor_id);
        ControlStatus::Ok
    }
}
