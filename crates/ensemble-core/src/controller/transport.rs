//! Transport control surface.

use std::sync::Arc;

use crate::engine::AudioEngine;
use crate::types::{ControlStatus, PlayingMode, SyncMode, TimeSignature};

pub struct TransportController {
    engine: Arc<AudioEngine>,
}

impl TransportController {
    pub(super) fn new(engine: Arc<AudioEngine>) -> Self {
        Self { engine }
    }

    pub fn sample_rate(&self) -> f64 {
        self.engine.sample_rate()
    }

    pub fn tempo(&self) -> f32 {
        self.engine.transport_view().tempo()
    }

    pub fn set_tempo(&self, bpm: f32) -> ControlStatus {
        if !bpm.is_finite() || bpm <= 0.0 {
            return ControlStatus::InvalidArguments;
        }
        self.engine.set_tempo(bpm, false);
        ControlStatus::Ok
    }

    /// Defer the change to the next bar line.
    pub fn set_tempo_at_bar_boundary(&self, bpm: f32) -> ControlStatus {
        if !bpm.is_finite() || bpm <= 0.0 {
            return ControlStatus::InvalidArguments;
        }
        self.engine.set_tempo(bpm, true);
        ControlStatus::Ok
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.engine.transport_view().time_signature()
    }

    pub fn set_time_signature(&self, signature: TimeSignature) -> ControlStatus {
        if signature.numerator == 0 || !signature.denominator.is_power_of_two() {
            return ControlStatus::InvalidArguments;
        }
        self.engine.set_time_signature(signature, false);
        ControlStatus::Ok
    }

    pub fn playing_mode(&self) -> PlayingMode {
        self.engine.transport_view().playing_mode()
    }

    pub fn set_playing_mode(&self, mode: PlayingMode) -> ControlStatus {
        self.engine.set_playing_mode(mode);
        ControlStatus::Ok
    }

    pub fn sync_mode(&self) -> SyncMode {
        self.engine.transport_view().sync_mode()
    }

    pub fn set_sync_mode(&self, mode: SyncMode) -> ControlStatus {
        self.engine.set_sync_mode(mode);
        ControlStatus::Ok
    }

    /// Wire-level variant taking the raw mode value; unknown values are
    /// rejected instead of silently accepted.
    pub fn set_sync_mode_raw(&self, raw: i32) -> ControlStatus {
        let mode = match raw {
            0 => SyncMode::Internal,
            1 => SyncMode::MidiClock,
            2 => SyncMode::Link,
            _ => return ControlStatus::InvalidArguments,
        };
        self.set_sync_mode(mode)
    }

    pub fn current_beats(&self) -> f64 {
        self.engine.transport_view().current_beats()
    }

    pub fn current_bar_beats(&self) -> f64 {
        self.engine.transport_view().current_bar_beats()
    }

    pub fn current_bar_start_beats(&self) -> f64 {
        self.engine.transport_view().current_bar_start_beats()
    }
}
