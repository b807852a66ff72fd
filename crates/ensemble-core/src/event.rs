//! Realtime event records.
//!
//! [`RtEvent`] is the unit of communication on the lock-free queues between
//! the realtime and controller worlds. Events are plain `Copy` data and must
//! fit a cache-line sized queue slot.

use crate::types::{ObjectId, PlayingMode, SyncMode, TimeSignature};

/// Raw MIDI message wrapped in an event, 1-3 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MidiData {
    pub bytes: [u8; 3],
    pub len: u8,
}

impl MidiData {
    pub fn new(data: &[u8]) -> Self {
        let mut bytes = [0u8; 3];
        let len = data.len().min(3);
        bytes[..len].copy_from_slice(&data[..len]);
        Self {
            bytes,
            len: len as u8,
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

/// Payload of a realtime event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RtEventPayload {
    NoteOn { channel: u8, note: u8, velocity: f32 },
    NoteOff { channel: u8, note: u8, velocity: f32 },
    NoteAftertouch { channel: u8, note: u8, value: f32 },
    Aftertouch { channel: u8, value: f32 },
    PitchBend { channel: u8, value: f32 },
    Modulation { channel: u8, value: f32 },
    WrappedMidi { data: MidiData },

    ParameterChange { parameter_id: ObjectId, value: f32 },
    IntParameterChange { parameter_id: ObjectId, value: i32 },
    BoolParameterChange { parameter_id: ObjectId, value: bool },

    SetBypass { bypassed: bool },
    ProgramChange { program: u32 },

    Tempo { bpm: f32, at_bar_boundary: bool },
    TimeSignatureChange { signature: TimeSignature, at_bar_boundary: bool },
    PlayingModeChange { mode: PlayingMode },
    SyncModeChange { mode: SyncMode },

    // Structural control ops, handled at the top of a block. Each carries the
    // returnable id that the engine answers with a `Completion`.
    AddTrack { event_id: u64, core: Option<usize> },
    RemoveTrack { event_id: u64 },
    AddProcessorToTrack { event_id: u64, track_id: ObjectId, before: Option<ObjectId> },
    RemoveProcessorFromTrack { event_id: u64, track_id: ObjectId },
    MoveProcessorOnTrack { event_id: u64, track_id: ObjectId, before: Option<ObjectId> },
    WidenTrackOutput { event_id: u64 },
    StopEngine { event_id: u64 },
    Fence { event_id: u64 },

    // Outbound-only records.
    Completion { event_id: u64, handled: bool },
    ClipNotification { channel: usize, input: bool },
    TransportChange,
}

/// A tagged realtime event: target processor, sample offset within the
/// current chunk, and the payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RtEvent {
    pub processor_id: ObjectId,
    pub sample_offset: u32,
    pub payload: RtEventPayload,
}

impl RtEvent {
    pub fn new(processor_id: ObjectId, sample_offset: u32, payload: RtEventPayload) -> Self {
        Self {
            processor_id,
            sample_offset,
            payload,
        }
    }

    pub fn note_on(processor_id: ObjectId, offset: u32, channel: u8, note: u8, velocity: f32) -> Self {
        Self::new(processor_id, offset, RtEventPayload::NoteOn { channel, note, velocity })
    }

    pub fn note_off(processor_id: ObjectId, offset: u32, channel: u8, note: u8, velocity: f32) -> Self {
        Self::new(processor_id, offset, RtEventPayload::NoteOff { channel, note, velocity })
    }

    pub fn note_aftertouch(processor_id: ObjectId, offset: u32, channel: u8, note: u8, value: f32) -> Self {
        Self::new(processor_id, offset, RtEventPayload::NoteAftertouch { channel, note, value })
    }

    pub fn aftertouch(processor_id: ObjectId, offset: u32, channel: u8, value: f32) -> Self {
        Self::new(processor_id, offset, RtEventPayload::Aftertouch { channel, value })
    }

    pub fn pitch_bend(processor_id: ObjectId, offset: u32, channel: u8, value: f32) -> Self {
        Self::new(processor_id, offset, RtEventPayload::PitchBend { channel, value })
    }

    pub fn modulation(processor_id: ObjectId, offset: u32, channel: u8, value: f32) -> Self {
        Self::new(processor_id, offset, RtEventPayload::Modulation { channel, value })
    }

    pub fn wrapped_midi(processor_id: ObjectId, offset: u32, data: MidiData) -> Self {
        Self::new(processor_id, offset, RtEventPayload::WrappedMidi { data })
    }

    pub fn parameter_change(processor_id: ObjectId, offset: u32, parameter_id: ObjectId, value: f32) -> Self {
        Self::new(processor_id, offset, RtEventPayload::ParameterChange { parameter_id, value })
    }

    pub fn int_parameter_change(processor_id: ObjectId, offset: u32, parameter_id: ObjectId, value: i32) -> Self {
        Self::new(processor_id, offset, RtEventPayload::IntParameterChange { parameter_id, value })
    }

    pub fn bool_parameter_change(processor_id: ObjectId, offset: u32, parameter_id: ObjectId, value: bool) -> Self {
        Self::new(processor_id, offset, RtEventPayload::BoolParameterChange { parameter_id, value })
    }

    pub fn set_bypass(processor_id: ObjectId, bypassed: bool) -> Self {
        Self::new(processor_id, 0, RtEventPayload::SetBypass { bypassed })
    }

    pub fn completion(event_id: u64, handled: bool) -> Self {
        Self::new(0, 0, RtEventPayload::Completion { event_id, handled })
    }

    pub fn clip_notification(channel: usize, input: bool) -> Self {
        Self::new(0, 0, RtEventPayload::ClipNotification { channel, input })
    }

    /// True for events that travel down a track's keyboard event path.
    pub fn is_keyboard_event(&self) -> bool {
        matches!(
            self.payload,
            RtEventPayload::NoteOn { .. }
                | RtEventPayload::NoteOff { .. }
                | RtEventPayload::NoteAftertouch { .. }
                | RtEventPayload::Aftertouch { .. }
                | RtEventPayload::PitchBend { .. }
                | RtEventPayload::Modulation { .. }
                | RtEventPayload::WrappedMidi { .. }
        )
    }

    /// True for the structural/engine control ops handled at block top.
    pub fn is_control_event(&self) -> bool {
        matches!(
            self.payload,
            RtEventPayload::AddTrack { .. }
                | RtEventPayload::RemoveTrack { .. }
                | RtEventPayload::AddProcessorToTrack { .. }
                | RtEventPayload::RemoveProcessorFromTrack { .. }
                | RtEventPayload::MoveProcessorOnTrack { .. }
                | RtEventPayload::WidenTrackOutput { .. }
                | RtEventPayload::StopEngine { .. }
                | RtEventPayload::Fence { .. }
                | RtEventPayload::Tempo { .. }
                | RtEventPayload::TimeSignatureChange { .. }
                | RtEventPayload::PlayingModeChange { .. }
                | RtEventPayload::SyncModeChange { .. }
        )
    }

    /// Re-tag the event with a new source processor, keeping the payload.
    pub fn with_processor_id(mut self, processor_id: ObjectId) -> Self {
        self.processor_id = processor_id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_fits_in_a_cache_line_slot() {
        assert!(core::mem::size_of::<RtEvent>() <= 64);
    }

    #[test]
    fn test_keyboard_event_classification() {
        assert!(RtEvent::note_on(1, 0, 0, 60, 1.0).is_keyboard_event());
        assert!(RtEvent::pitch_bend(1, 0, 0, 0.5).is_keyboard_event());
        assert!(!RtEvent::parameter_change(1, 0, 2, 0.5).is_keyboard_event());
        assert!(!RtEvent::set_bypass(1, true).is_keyboard_event());
    }

    #[test]
    fn test_retagging_keeps_payload() {
        let event = RtEvent::note_on(125, 12, 3, 64, 0.75);
        let retagged = event.with_processor_id(7);
        assert_eq!(retagged.processor_id, 7);
        assert_eq!(retagged.sample_offset, 12);
        assert_eq!(retagged.payload, event.payload);
    }

    #[test]
    fn test_midi_data_truncates() {
        let data = MidiData::new(&[0x90, 0x40, 0x7f, 0x00]);
        assert_eq!(data.len, 3);
        assert_eq!(data.as_slice(), &[0x90, 0x40, 0x7f]);
    }
}
