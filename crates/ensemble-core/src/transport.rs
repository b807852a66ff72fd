//! Transport: musical and wall-clock time, play state and sync.
//!
//! The realtime half ([`Transport`]) is owned by the engine and advanced once
//! per chunk; a lock-free view ([`TransportView`]) is published for the
//! controller world.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use atomic_float::{AtomicF32, AtomicF64};

use crate::event::{RtEvent, RtEventPayload};
use crate::types::{PlayingMode, StateChange, SyncMode, TimeSignature};

pub const DEFAULT_TEMPO: f32 = 120.0;
const MIN_TEMPO: f32 = 20.0;
const MAX_TEMPO: f32 = 999.0;

/// Largest phase correction applied per block when chasing an external sync
/// source, in beats.
const MAX_SYNC_CORRECTION_BEATS: f64 = 1.0 / 16.0;

/// External sync input: the newest `(beat position, confidence, wall time)`
/// tuple pushed by a sync source, readable from the realtime thread.
pub struct SyncInput {
    beat_position: AtomicF64,
    confidence: AtomicF32,
    wall_time_secs: AtomicF64,
    has_update: AtomicBool,
}

impl Default for SyncInput {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncInput {
    pub fn new() -> Self {
        Self {
            beat_position: AtomicF64::new(0.0),
            confidence: AtomicF32::new(0.0),
            wall_time_secs: AtomicF64::new(0.0),
            has_update: AtomicBool::new(false),
        }
    }

    /// Called by a sync source from any thread.
    pub fn push(&self, beat_position: f64, confidence: f32, wall_time_secs: f64) {
        self.beat_position.store(beat_position, Ordering::Release);
        self.confidence.store(confidence, Ordering::Release);
        self.wall_time_secs.store(wall_time_secs, Ordering::Release);
        self.has_update.store(true, Ordering::Release);
    }

    fn latest(&self) -> Option<(f64, f32, f64)> {
        if !self.has_update.load(Ordering::Acquire) {
            return None;
        }
        Some((
            self.beat_position.load(Ordering::Acquire),
            self.confidence.load(Ordering::Acquire),
            self.wall_time_secs.load(Ordering::Acquire),
        ))
    }
}

/// Lock-free snapshot of the transport for the controller world.
pub struct TransportView {
    tempo: AtomicF32,
    playing_mode: AtomicU8,
    sync_mode: AtomicU8,
    numerator: AtomicU32,
    denominator: AtomicU32,
    current_beats: AtomicF64,
    bar_beats: AtomicF64,
    bar_start_beats: AtomicF64,
    sample_position: AtomicU64,
}

impl TransportView {
    fn new() -> Self {
        Self {
            tempo: AtomicF32::new(DEFAULT_TEMPO),
            playing_mode: AtomicU8::new(PlayingMode::Stopped as u8),
            sync_mode: AtomicU8::new(SyncMode::Internal as u8),
            numerator: AtomicU32::new(4),
            denominator: AtomicU32::new(4),
            current_beats: AtomicF64::new(0.0),
            bar_beats: AtomicF64::new(0.0),
            bar_start_beats: AtomicF64::new(0.0),
            sample_position: AtomicU64::new(0),
        }
    }

    pub fn tempo(&self) -> f32 {
        self.tempo.load(Ordering::Acquire)
    }

    pub fn playing_mode(&self) -> PlayingMode {
        PlayingMode::from_u8(self.playing_mode.load(Ordering::Acquire))
    }

    pub fn sync_mode(&self) -> SyncMode {
        SyncMode::from_u8(self.sync_mode.load(Ordering::Acquire))
    }

    pub fn time_signature(&self) -> TimeSignature {
        TimeSignature {
            numerator: self.numerator.load(Ordering::Acquire),
            denominator: self.denominator.load(Ordering::Acquire),
        }
    }

    pub fn current_beats(&self) -> f64 {
        self.current_beats.load(Ordering::Acquire)
    }

    pub fn current_bar_beats(&self) -> f64 {
        self.bar_beats.load(Ordering::Acquire)
    }

    pub fn current_bar_start_beats(&self) -> f64 {
        self.bar_start_beats.load(Ordering::Acquire)
    }

    pub fn sample_position(&self) -> u64 {
        self.sample_position.load(Ordering::Acquire)
    }
}

/// Realtime transport state, advanced once per chunk by the engine.
pub struct Transport {
    sample_rate: f64,
    tempo: f32,
    time_signature: TimeSignature,
    playing_mode: PlayingMode,
    sync_mode: SyncMode,

    sample_position: u64,
    wall_time_secs: f64,
    latency_offset_secs: f64,

    current_beats: f64,
    bar_start_beats: f64,
    bar_beats: f64,

    state_change: StateChange,
    pending_tempo: Option<f32>,
    pending_signature: Option<TimeSignature>,

    view: Arc<TransportView>,
    sync_input: Arc<SyncInput>,
}

impl Transport {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            tempo: DEFAULT_TEMPO,
            time_signature: TimeSignature::default(),
            playing_mode: PlayingMode::Stopped,
            sync_mode: SyncMode::Internal,
            sample_position: 0,
            wall_time_secs: 0.0,
            latency_offset_secs: 0.0,
            current_beats: 0.0,
            bar_start_beats: 0.0,
            bar_beats: 0.0,
            state_change: StateChange::Unchanged,
            pending_tempo: None,
            pending_signature: None,
            view: Arc::new(TransportView::new()),
            sync_input: Arc::new(SyncInput::new()),
        }
    }

    pub fn view(&self) -> Arc<TransportView> {
        self.view.clone()
    }

    pub fn sync_input(&self) -> Arc<SyncInput> {
        self.sync_input.clone()
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
    }

    pub fn set_latency_offset(&mut self, seconds: f64) {
        self.latency_offset_secs = seconds;
    }

    /// Wall-clock time at which the current block will reach the output,
    /// including the latency compensation offset.
    pub fn current_process_time(&self) -> f64 {
        self.wall_time_secs + self.latency_offset_secs
    }

    pub fn playing_mode(&self) -> PlayingMode {
        self.playing_mode
    }

    pub fn tempo(&self) -> f32 {
        self.tempo
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.time_signature
    }

    pub fn sync_mode(&self) -> SyncMode {
        self.sync_mode
    }

    pub fn current_beats(&self) -> f64 {
        self.current_beats
    }

    pub fn current_bar_beats(&self) -> f64 {
        self.bar_beats
    }

    pub fn current_bar_start_beats(&self) -> f64 {
        self.bar_start_beats
    }

    /// Play-state transition observable for exactly the block in which it
    /// happened.
    pub fn current_state_change(&self) -> StateChange {
        self.state_change
    }

    /// Set tempo directly. With `at_bar_boundary` the change is deferred to
    /// the next bar line.
    pub fn set_tempo(&mut self, bpm: f32, at_bar_boundary: bool) {
        let bpm = bpm.clamp(MIN_TEMPO, MAX_TEMPO);
        if at_bar_boundary {
            self.pending_tempo = Some(bpm);
        } else {
            self.tempo = bpm;
            self.publish();
        }
    }

    pub fn set_time_signature(&mut self, signature: TimeSignature, at_bar_boundary: bool) {
        if at_bar_boundary {
            self.pending_signature = Some(signature);
        } else {
            self.time_signature = signature;
            self.publish();
        }
    }

    pub fn set_playing_mode(&mut self, mode: PlayingMode) {
        if mode == self.playing_mode {
            return;
        }
        self.state_change = match (self.playing_mode.is_rolling(), mode.is_rolling()) {
            (false, true) => StateChange::Starting,
            (true, false) => StateChange::Stopping,
            _ => self.state_change,
        };
        self.playing_mode = mode;
        self.publish();
    }

    pub fn set_sync_mode(&mut self, mode: SyncMode) {
        self.sync_mode = mode;
        self.publish();
    }

    /// Handle a transport control event on the realtime thread.
    pub fn process_event(&mut self, event: &RtEvent) {
        match event.payload {
            RtEventPayload::Tempo { bpm, at_bar_boundary } => self.set_tempo(bpm, at_bar_boundary),
            RtEventPayload::TimeSignatureChange { signature, at_bar_boundary } => {
                self.set_time_signature(signature, at_bar_boundary)
            }
            RtEventPayload::PlayingModeChange { mode } => self.set_playing_mode(mode),
            RtEventPayload::SyncModeChange { mode } => self.set_sync_mode(mode),
            _ => {}
        }
    }

    /// Advance to a new block. `sample_position` is the position of the
    /// block's first frame; the state-change latch of the previous block is
    /// released here.
    pub fn set_time(&mut self, sample_position: u64, wall_time_secs: f64) {
        self.state_change = StateChange::Unchanged;

        let delta_samples = sample_position.saturating_sub(self.sample_position);
        self.sample_position = sample_position;
        self.wall_time_secs = wall_time_secs;

        if self.playing_mode.is_rolling() && delta_samples > 0 {
            let delta_beats =
                delta_samples as f64 * self.tempo as f64 / (60.0 * self.sample_rate);
            self.current_beats += delta_beats;
        }

        if self.sync_mode != SyncMode::Internal && self.playing_mode.is_rolling() {
            self.chase_external_position();
        }

        self.update_bar_position();
        self.publish();
    }

    fn chase_external_position(&mut self) {
        let Some((beat_position, confidence, wall_time)) = self.sync_input.latest() else {
            return;
        };
        if confidence <= 0.0 {
            return;
        }
        // Extrapolate the source position to now and phase-align without
        // discontinuities larger than a sixteenth of a beat per block.
        let elapsed = (self.wall_time_secs - wall_time).max(0.0);
        let estimate = beat_position + elapsed * self.tempo as f64 / 60.0;
        let error = estimate - self.current_beats;
        let correction = error.clamp(-MAX_SYNC_CORRECTION_BEATS, MAX_SYNC_CORRECTION_BEATS);
        self.current_beats = (self.current_beats + correction).max(0.0);
    }

    fn update_bar_position(&mut self) {
        let beats_per_bar = self.time_signature.beats_per_bar();
        let bar_start = (self.current_beats / beats_per_bar).floor() * beats_per_bar;
        if bar_start > self.bar_start_beats {
            // Crossed a bar line: queued changes land here.
            if let Some(bpm) = self.pending_tempo.take() {
                self.tempo = bpm;
            }
            if let Some(signature) = self.pending_signature.take() {
                self.time_signature = signature;
            }
        }
        let beats_per_bar = self.time_signature.beats_per_bar();
        self.bar_start_beats = (self.current_beats / beats_per_bar).floor() * beats_per_bar;
        self.bar_beats = self.current_beats - self.bar_start_beats;
    }

    fn publish(&self) {
        self.view.tempo.store(self.tempo, Ordering::Release);
        self.view
            .playing_mode
            .store(self.playing_mode as u8, Ordering::Release);
        self.view.sync_mode.store(self.sync_mode as u8, Ordering::Release);
        self.view
            .numerator
            .store(self.time_signature.numerator, Ordering::Release);
        self.view
            .denominator
            .store(self.time_signature.denominator, Ordering::Release);
        self.view.current_beats.store(self.current_beats, Ordering::Release);
        self.view.bar_beats.store(self.bar_beats, Ordering::Release);
        self.view
            .bar_start_beats
            .store(self.bar_start_beats, Ordering::Release);
        self.view
            .sample_position
            .store(self.sample_position, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::AUDIO_CHUNK_SIZE;

    fn playing_transport(sample_rate: f64) -> Transport {
        let mut transport = Transport::new(sample_rate);
        transport.set_playing_mode(PlayingMode::Playing);
        transport
    }

    #[test]
    fn test_stopped_transport_does_not_advance_beats() {
        let mut transport = Transport::new(48000.0);
        transport.set_time(48000, 1.0);
        assert_eq!(transport.current_beats(), 0.0);
        assert_eq!(transport.view().sample_position(), 48000);
    }

    #[test]
    fn test_timeline_at_one_second() {
        // 32 kHz, tempo 120, 4/4: one second is two beats.
        let mut transport = playing_transport(32000.0);
        transport.set_time(32000, 1.0);
        assert!((transport.current_beats() - 2.0).abs() < 1e-9);
        assert!((transport.current_bar_beats() - 2.0).abs() < 1e-9);
        assert_eq!(transport.current_bar_start_beats(), 0.0);
    }

    #[test]
    fn test_timeline_wraps_bars() {
        // 2.5 seconds at 120 BPM is five beats: bar two, one beat in.
        let mut transport = playing_transport(32000.0);
        transport.set_time(80000, 2.5);
        assert!((transport.current_beats() - 5.0).abs() < 1e-9);
        assert!((transport.current_bar_beats() - 1.0).abs() < 1e-9);
        assert!((transport.current_bar_start_beats() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_bar_invariant_holds_across_updates() {
        let mut transport = playing_transport(48000.0);
        let mut position = 0;
        let mut last_beats = 0.0;
        for _ in 0..1000 {
            position += AUDIO_CHUNK_SIZE as u64;
            transport.set_time(position, position as f64 / 48000.0);
            let beats = transport.current_beats();
            assert!(beats >= last_beats);
            last_beats = beats;
            let bpb = transport.time_signature().beats_per_bar();
            assert!(transport.current_bar_beats() >= 0.0);
            assert!(transport.current_bar_beats() < bpb);
            assert!(
                (transport.current_bar_start_beats() + transport.current_bar_beats()
                    - transport.current_beats())
                .abs()
                    < 1e-9
            );
        }
    }

    #[test]
    fn test_state_change_latched_one_block() {
        let mut transport = Transport::new(48000.0);
        transport.set_time(0, 0.0);
        transport.set_playing_mode(PlayingMode::Playing);
        assert_eq!(transport.current_state_change(), StateChange::Starting);

        transport.set_time(64, 64.0 / 48000.0);
        assert_eq!(transport.current_state_change(), StateChange::Unchanged);

        transport.set_playing_mode(PlayingMode::Stopped);
        assert_eq!(transport.current_state_change(), StateChange::Stopping);
        transport.set_time(128, 128.0 / 48000.0);
        assert_eq!(transport.current_state_change(), StateChange::Unchanged);
    }

    #[test]
    fn test_recording_counts_as_rolling() {
        let mut transport = Transport::new(48000.0);
        transport.set_playing_mode(PlayingMode::Recording);
        assert_eq!(transport.current_state_change(), StateChange::Starting);
        transport.set_time(4800, 0.1);
        assert!(transport.current_beats() > 0.0);
    }

    #[test]
    fn test_tempo_clamped() {
        let mut transport = Transport::new(48000.0);
        transport.set_tempo(5000.0, false);
        assert_eq!(transport.tempo(), MAX_TEMPO);
        transport.set_tempo(1.0, false);
        assert_eq!(transport.tempo(), MIN_TEMPO);
    }

    #[test]
    fn test_tempo_change_at_bar_boundary_is_deferred() {
        let mut transport = playing_transport(48000.0);
        transport.set_tempo(240.0, true);
        assert_eq!(transport.tempo(), DEFAULT_TEMPO);

        // Advance past the first bar line (4 beats at 120 BPM is 2 s).
        let mut position = 0u64;
        while transport.current_bar_start_beats() < 4.0 {
            position += AUDIO_CHUNK_SIZE as u64;
            transport.set_time(position, position as f64 / 48000.0);
        }
        assert_eq!(transport.tempo(), 240.0);
    }

    #[test]
    fn test_external_sync_correction_is_bounded() {
        let mut transport = playing_transport(48000.0);
        transport.set_sync_mode(SyncMode::MidiClock);
        // Source is far ahead; the transport may only step 1/16 beat per
        // block towards it.
        transport.sync_input().push(10.0, 1.0, 0.0);
        transport.set_time(64, 64.0 / 48000.0);
        let after_one_block = transport.current_beats();
        let free_running = 64.0 * 120.0 / (60.0 * 48000.0);
        assert!(after_one_block <= free_running + 1.0 / 16.0 + 1e-9);
        assert!(after_one_block > free_running);
    }

    #[test]
    fn test_latency_offset_shifts_process_time() {
        let mut transport = Transport::new(48000.0);
        transport.set_time(4800, 0.1);
        assert_eq!(transport.current_process_time(), 0.1);
        transport.set_latency_offset(0.005);
        assert!((transport.current_process_time() - 0.105).abs() < 1e-12);
    }

    #[test]
    fn test_view_mirrors_state() {
        let mut transport = playing_transport(32000.0);
        let view = transport.view();
        transport.set_tempo(100.0, false);
        transport.set_time_signature(TimeSignature::new(3, 4), false);
        transport.set_time(32000, 1.0);

        assert_eq!(view.tempo(), 100.0);
        assert_eq!(view.time_signature(), TimeSignature::new(3, 4));
        assert_eq!(view.playing_mode(), PlayingMode::Playing);
        assert!((view.current_beats() - transport.current_beats()).abs() < 1e-12);
    }
}
