//! MIDI routing: decoding, connection tables and event conversion.
//!
//! Incoming MIDI from a backend is decoded and routed through four tables
//! (kb-in, kb-out, cc-in, pc-in) into realtime events for the engine;
//! keyboard events leaving tracks are routed back out through kb-out. The
//! tables are mutated under a mutex and published to the input thread as an
//! immutable snapshot.

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::debug;

use crate::event::{MidiData, RtEvent, RtEventPayload};
use crate::fifo::RtEventQueue;
use crate::registry::ProcessorRegistry;
use crate::types::ObjectId;

/// A decoded channel-voice message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MidiMessage {
    NoteOn { channel: u8, note: u8, velocity: f32 },
    NoteOff { channel: u8, note: u8, velocity: f32 },
    PolyAftertouch { channel: u8, note: u8, value: f32 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    ChannelAftertouch { channel: u8, value: f32 },
    PitchBend { channel: u8, value: f32 },
    Unsupported,
}

/// Decode a 1-3 byte channel-voice message.
pub fn decode_midi(bytes: &[u8]) -> MidiMessage {
    let Some(&status) = bytes.first() else {
        return MidiMessage::Unsupported;
    };
    let channel = status & 0x0f;
    let data1 = bytes.get(1).copied().unwrap_or(0) & 0x7f;
    let data2 = bytes.get(2).copied().unwrap_or(0) & 0x7f;
    match status & 0xf0 {
        0x80 => MidiMessage::NoteOff {
            channel,
            note: data1,
            velocity: data2 as f32 / 127.0,
        },
        0x90 if data2 == 0 => MidiMessage::NoteOff {
            channel,
            note: data1,
            velocity: 0.5,
        },
        0x90 => MidiMessage::NoteOn {
            channel,
            note: data1,
            velocity: data2 as f32 / 127.0,
        },
        0xa0 => MidiMessage::PolyAftertouch {
            channel,
            note: data1,
            value: data2 as f32 / 127.0,
        },
        0xb0 => MidiMessage::ControlChange {
            channel,
            controller: data1,
            value: data2,
        },
        0xc0 => MidiMessage::ProgramChange {
            channel,
            program: data1,
        },
        0xd0 => MidiMessage::ChannelAftertouch {
            channel,
            value: data1 as f32 / 127.0,
        },
        0xe0 => {
            let raw = (data2 as u16) << 7 | data1 as u16;
            MidiMessage::PitchBend {
                channel,
                value: (raw as f32 - 8192.0) / 8192.0,
            }
        }
        _ => MidiMessage::Unsupported,
    }
}

/// Mod wheel controller number, routed as a keyboard modulation event.
const MOD_WHEEL_CC: u8 = 1;

/// Keyboard input route: decoded (or raw) events from a port/channel to a
/// track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KbdInputConnection {
    pub port: usize,
    /// `None` matches any channel.
    pub channel: Option<u8>,
    pub track: ObjectId,
    pub raw_midi: bool,
}

/// Keyboard output route: a track's event output to a port/channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KbdOutputConnection {
    pub port: usize,
    pub channel: u8,
    pub track: ObjectId,
}

/// Control-change input route onto a parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CcInputConnection {
    pub port: usize,
    pub channel: Option<u8>,
    pub cc: u8,
    pub processor: ObjectId,
    pub parameter: ObjectId,
    pub min_range: f32,
    pub max_range: f32,
    pub relative: bool,
}

/// Program-change input route onto a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcInputConnection {
    pub port: usize,
    pub channel: Option<u8>,
    pub processor: ObjectId,
}

#[derive(Debug, Clone, Default)]
struct RoutingTables {
    kb_in: Vec<KbdInputConnection>,
    kb_out: Vec<KbdOutputConnection>,
    cc_in: Vec<CcInputConnection>,
    pc_in: Vec<PcInputConnection>,
}

/// Backend-facing output sink for MIDI leaving the host.
pub trait MidiOutputSink: Send + Sync {
    fn send_midi(&self, port: usize, data: MidiData);
}

/// Program change request produced by a pc-in route; forwarded to the
/// dispatcher since program switching is not realtime-safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramChangeRequest {
    pub processor: ObjectId,
    pub program: usize,
}

/// The MIDI routing hub.
pub struct MidiDispatcher {
    tables: Mutex<RoutingTables>,
    snapshot: ArcSwap<RoutingTables>,
    rt_queue: Arc<RtEventQueue<RtEvent>>,
    registry: Arc<ProcessorRegistry>,
    output_sink: Mutex<Option<Arc<dyn MidiOutputSink>>>,
    program_requests: Mutex<Vec<ProgramChangeRequest>>,
    input_ports: usize,
    output_ports: usize,
}

impl MidiDispatcher {
    pub fn new(
        rt_queue: Arc<RtEventQueue<RtEvent>>,
        registry: Arc<ProcessorRegistry>,
        input_ports: usize,
        output_ports: usize,
    ) -> Self {
        Self {
            tables: Mutex::new(RoutingTables::default()),
            snapshot: ArcSwap::from_pointee(RoutingTables::default()),
            rt_queue,
            registry,
            output_sink: Mutex::new(None),
            program_requests: Mutex::new(Vec::new()),
            input_ports,
            output_ports,
        }
    }

    pub fn input_ports(&self) -> usize {
        self.input_ports
    }

    pub fn output_ports(&self) -> usize {
        self.output_ports
    }

    pub fn set_output_sink(&self, sink: Arc<dyn MidiOutputSink>) {
        *self.output_sink.lock() = Some(sink);
    }

    fn commit(&self, tables: &RoutingTables) {
        self.snapshot.store(Arc::new(tables.clone()));
    }

    pub fn connect_kb_to_track(
        &self,
        port: usize,
        channel: Option<u8>,
        track: ObjectId,
        raw_midi: bool,
    ) -> bool {
        if port >= self.input_ports {
            return false;
        }
        let row = KbdInputConnection { port, channel, track, raw_midi };
        let mut tables = self.tables.lock();
        if tables.kb_in.contains(&row) {
            return false;
        }
        tables.kb_in.push(row);
        self.commit(&tables);
        true
    }

    pub fn disconnect_kb_from_track(
        &self,
        port: usize,
        channel: Option<u8>,
        track: ObjectId,
        raw_midi: bool,
    ) -> bool {
        let row = KbdInputConnection { port, channel, track, raw_midi };
        let mut tables = self.tables.lock();
        let before = tables.kb_in.len();
        tables.kb_in.retain(|c| *c != row);
        let removed = tables.kb_in.len() != before;
        if removed {
            self.commit(&tables);
        }
        removed
    }

    pub fn connect_track_to_output(&self, port: usize, channel: u8, track: ObjectId) -> bool {
        if port >= self.output_ports || channel > 15 {
            return false;
        }
        let row = KbdOutputConnection { port, channel, track };
        let mut tables = self.tables.lock();
        if tables.kb_out.contains(&row) {
            return false;
        }
        tables.kb_out.push(row);
        self.commit(&tables);
        true
    }

    pub fn disconnect_track_from_output(&self, port: usize, channel: u8, track: ObjectId) -> bool {
        let row = KbdOutputConnection { port, channel, track };
        let mut tables = self.tables.lock();
        let before = tables.kb_out.len();
        tables.kb_out.retain(|c| *c != row);
        let removed = tables.kb_out.len() != before;
        if removed {
            self.commit(&tables);
        }
        removed
    }

    #[allow(clippy::too_many_arguments)]
    pub fn connect_cc_to_parameter(
        &self,
        port: usize,
        channel: Option<u8>,
        cc: u8,
        processor: ObjectId,
        parameter: ObjectId,
        min_range: f32,
        max_range: f32,
        relative: bool,
    ) -> bool {
        if port >= self.input_ports || cc > 127 {
            return false;
        }
        let mut tables = self.tables.lock();
        if tables
            .cc_in
            .iter()
            .any(|c| c.port == port && c.channel == channel && c.cc == cc && c.processor == processor)
        {
            return false;
        }
        tables.cc_in.push(CcInputConnection {
            port,
            channel,
            cc,
            processor,
            parameter,
            min_range,
            max_range,
            relative,
        });
        self.commit(&tables);
        true
    }

    pub fn disconnect_cc_from_parameter(
        &self,
        port: usize,
        channel: Option<u8>,
        cc: u8,
        processor: ObjectId,
    ) -> bool {
        let mut tables = self.tables.lock();
        let before = tables.cc_in.len();
        tables
            .cc_in
            .retain(|c| !(c.port == port && c.channel == channel && c.cc == cc && c.processor == processor));
        let removed = tables.cc_in.len() != before;
        if removed {
            self.commit(&tables);
        }
        removed
    }

    pub fn connect_pc_to_processor(&self, port: usize, channel: Option<u8>, processor: ObjectId) -> bool {
        if port >= self.input_ports {
            return false;
        }
        let row = PcInputConnection { port, channel, processor };
        let mut tables = self.tables.lock();
        if tables.pc_in.contains(&row) {
            return false;
        }
        tables.pc_in.push(row);
        self.commit(&tables);
        true
    }

    pub fn disconnect_pc_from_processor(&self, port: usize, channel: Option<u8>, processor: ObjectId) -> bool {
        let row = PcInputConnection { port, channel, processor };
        let mut tables = self.tables.lock();
        let before = tables.pc_in.len();
        tables.pc_in.retain(|c| *c != row);
        let removed = tables.pc_in.len() != before;
        if removed {
            self.commit(&tables);
        }
        removed
    }

    /// Remove every cc-in and pc-in route targeting `processor`.
    pub fn disconnect_all_from_processor(&self, processor: ObjectId) -> usize {
        let mut tables = self.tables.lock();
        let before = tables.cc_in.len() + tables.pc_in.len();
        tables.cc_in.retain(|c| c.processor != processor);
        tables.pc_in.retain(|c| c.processor != processor);
        let removed = before - tables.cc_in.len() - tables.pc_in.len();
        if removed > 0 {
            self.commit(&tables);
        }
        removed
    }

    /// Remove every kb route touching `track`.
    pub fn disconnect_track(&self, track: ObjectId) -> usize {
        let mut tables = self.tables.lock();
        let before = tables.kb_in.len() + tables.kb_out.len();
        tables.kb_in.retain(|c| c.track != track);
        tables.kb_out.retain(|c| c.track != track);
        let removed = before - tables.kb_in.len() - tables.kb_out.len();
        if removed > 0 {
            self.commit(&tables);
        }
        removed
    }

    pub fn kb_input_connections(&self) -> Vec<KbdInputConnection> {
        self.tables.lock().kb_in.clone()
    }

    pub fn kb_output_connections(&self) -> Vec<KbdOutputConnection> {
        self.tables.lock().kb_out.clone()
    }

    pub fn cc_input_connections(&self) -> Vec<CcInputConnection> {
        self.tables.lock().cc_in.clone()
    }

    pub fn cc_input_connections_for_processor(&self, processor: ObjectId) -> Vec<CcInputConnection> {
        self.tables
            .lock()
            .cc_in
            .iter()
            .copied()
            .filter(|c| c.processor == processor)
            .collect()
    }

    pub fn pc_input_connections(&self) -> Vec<PcInputConnection> {
        self.tables.lock().pc_in.clone()
    }

    pub fn pc_input_connections_for_processor(&self, processor: ObjectId) -> Vec<PcInputConnection> {
        self.tables
            .lock()
            .pc_in
            .iter()
            .copied()
            .filter(|c| c.processor == processor)
            .collect()
    }

    /// Pending program changes collected from pc-in routes; drained by the
    /// dispatcher thread.
    pub fn take_program_requests(&self) -> Vec<ProgramChangeRequest> {
        std::mem::take(&mut self.program_requests.lock())
    }

    /// Route one incoming MIDI message. Called by the MIDI backend for each
    /// `(port, raw bytes)` it receives.
    pub fn process_midi_input(&self, port: usize, bytes: &[u8]) {
        let snapshot = self.snapshot.load();
        let message = decode_midi(bytes);
        let channel = match message {
            MidiMessage::NoteOn { channel, .. }
            | MidiMessage::NoteOff { channel, .. }
            | MidiMessage::PolyAftertouch { channel, .. }
            | MidiMessage::ControlChange { channel, .. }
            | MidiMessage::ProgramChange { channel, .. }
            | MidiMessage::ChannelAftertouch { channel, .. }
            | MidiMessage::PitchBend { channel, .. } => channel,
            MidiMessage::Unsupported => return,
        };

        for row in &snapshot.kb_in {
            if row.port != port || !matches_channel(row.channel, channel) {
                continue;
            }
            let event = if row.raw_midi {
                Some(RtEvent::wrapped_midi(row.track, 0, MidiData::new(bytes)))
            } else {
                keyboard_event_for(row.track, message)
            };
            if let Some(event) = event {
                self.rt_queue.push(event);
            }
        }

        if let MidiMessage::ControlChange { controller, value, .. } = message {
            for row in &snapshot.cc_in {
                if row.port != port || row.cc != controller || !matches_channel(row.channel, channel) {
                    continue;
                }
                let normalized = if row.relative {
                    let delta = if value < 64 { value as i32 } else { value as i32 - 128 };
                    let step = delta as f32 / 127.0 * (row.max_range - row.min_range);
                    let current = self
                        .registry
                        .data(row.processor)
                        .and_then(|d| d.parameters().normalized(row.parameter))
                        .unwrap_or(0.0);
                    current + step
                } else {
                    row.min_range + value as f32 / 127.0 * (row.max_range - row.min_range)
                };
                self.rt_queue.push(RtEvent::parameter_change(
                    row.processor,
                    0,
                    row.parameter,
                    normalized.clamp(0.0, 1.0),
                ));
            }
        }

        if let MidiMessage::ProgramChange { program, .. } = message {
            for row in &snapshot.pc_in {
                if row.port != port || !matches_channel(row.channel, channel) {
                    continue;
                }
                self.program_requests.lock().push(ProgramChangeRequest {
                    processor: row.processor,
                    program: program as usize,
                });
            }
        }
    }

    /// Route a keyboard event that left a track through kb-out.
    pub fn process_track_output(&self, event: &RtEvent) {
        let snapshot = self.snapshot.load();
        let sink_guard = self.output_sink.lock();
        let Some(sink) = sink_guard.as_ref() else {
            return;
        };
        for row in &snapshot.kb_out {
            if row.track != event.processor_id {
                continue;
            }
            if let Some(data) = encode_keyboard_event(event, row.channel) {
                sink.send_midi(row.port, data);
            } else {
                debug!(track = row.track, "dropping unencodable track output event");
            }
        }
    }
}

#[inline]
fn matches_channel(filter: Option<u8>, channel: u8) -> bool {
    filter.is_none() || filter == Some(channel)
}

fn keyboard_event_for(track: ObjectId, message: MidiMessage) -> Option<RtEvent> {
    match message {
        MidiMessage::NoteOn { channel, note, velocity } => {
            Some(RtEvent::note_on(track, 0, channel, note, velocity))
        }
        MidiMessage::NoteOff { channel, note, velocity } => {
            Some(RtEvent::note_off(track, 0, channel, note, velocity))
        }
        MidiMessage::PolyAftertouch { channel, note, value } => {
            Some(RtEvent::note_aftertouch(track, 0, channel, note, value))
        }
        MidiMessage::ChannelAftertouch { channel, value } => {
            Some(RtEvent::aftertouch(track, 0, channel, value))
        }
        MidiMessage::PitchBend { channel, value } => {
            Some(RtEvent::pitch_bend(track, 0, channel, value))
        }
        MidiMessage::ControlChange { channel, controller: MOD_WHEEL_CC, value } => {
            Some(RtEvent::modulation(track, 0, channel, value as f32 / 127.0))
        }
        _ => None,
    }
}

fn encode_keyboard_event(event: &RtEvent, channel: u8) -> Option<MidiData> {
    let data = match event.payload {
        RtEventPayload::NoteOn { note, velocity, .. } => {
            MidiData::new(&[0x90 | channel, note, (velocity * 127.0) as u8])
        }
        RtEventPayload::NoteOff { note, velocity, .. } => {
            MidiData::new(&[0x80 | channel, note, (velocity * 127.0) as u8])
        }
        RtEventPayload::NoteAftertouch { note, value, .. } => {
            MidiData::new(&[0xa0 | channel, note, (value * 127.0) as u8])
        }
        RtEventPayload::Aftertouch { value, .. } => {
            MidiData::new(&[0xd0 | channel, (value * 127.0) as u8])
        }
        RtEventPayload::Modulation { value, .. } => {
            MidiData::new(&[0xb0 | channel, MOD_WHEEL_CC, (value * 127.0) as u8])
        }
        RtEventPayload::PitchBend { value, .. } => {
            let raw = ((value.clamp(-1.0, 1.0) * 8192.0) + 8192.0) as u16;
            MidiData::new(&[0xe0 | channel, (raw & 0x7f) as u8, (raw >> 7) as u8 & 0x7f])
        }
        RtEventPayload::WrappedMidi { data } => data,
        _ => return None,
    };
    Some(data)
}
