//! Mixer track: an ordered chain of processors with bus gain and pan.

use std::cell::UnsafeCell;
use std::sync::Arc;
use std::time::Instant;

use smallvec::SmallVec;

use crate::buffer::SampleBuffer;
use crate::event::RtEvent;
use crate::fifo::RtEventFifo;
use crate::parameter::{ParameterRange, ParameterStore};
use crate::processor::{ProcessorData, ProcessorHandle};
use crate::smooth::BlockSmoother;
use crate::timings::TimingLog;
use crate::types::ObjectId;

/* No real technical limit, just high enough for any sane session */
pub const TRACK_MAX_CHANNELS: usize = 8;
pub const TRACK_MAX_BUSSES: usize = TRACK_MAX_CHANNELS / 2;
pub const TRACK_MAX_PROCESSORS: usize = 32;

pub const TRACK_UID: &str = "ensemble.track";

const KB_EVENT_FIFO_CAPACITY: usize = 128;
const EVENT_OUTPUT_CAPACITY: usize = 256;
const PAN_SMOOTHING_TIME_SECS: f32 = 0.005;
const DEFAULT_BUS_GAIN: f32 = 1.0;

/// Map gain and pan to left/right gains.
///
/// `left = g * cos((pan + 1) * pi/4) * sqrt(2)`, and sin for the right side:
/// center pan is unity in both channels, a hard pan is +3 dB in the live
/// channel and silent in the other.
#[inline]
fn pan_gains(gain: f32, pan: f32) -> (f32, f32) {
    if pan == 0.0 {
        // Center pan is exactly unity in both channels.
        return (gain, gain);
    }
    let angle = (pan + 1.0) * core::f32::consts::FRAC_PI_4;
    let left = gain * angle.cos() * core::f32::consts::SQRT_2;
    let right = gain * angle.sin() * core::f32::consts::SQRT_2;
    (left, right)
}

/// A track: processor chain, input/output busses, per-bus gain and pan, and
/// an event output channel.
///
/// All methods taking `&mut self` run on the realtime side (the rendering
/// worker, or the engine thread at a block boundary).
pub struct Track {
    data: Arc<ProcessorData>,
    gain_ids: SmallVec<[ObjectId; TRACK_MAX_BUSSES]>,
    pan_ids: SmallVec<[ObjectId; TRACK_MAX_BUSSES]>,
    mute_id: ObjectId,

    chain: Vec<Arc<ProcessorHandle>>,
    input_buffer: SampleBuffer,
    output_buffer: SampleBuffer,

    input_busses: usize,
    output_busses: usize,

    kb_events: RtEventFifo<RtEvent>,
    event_output: Arc<RtEventFifo<RtEvent>>,

    smoothers_left: SmallVec<[BlockSmoother; TRACK_MAX_BUSSES]>,
    smoothers_right: SmallVec<[BlockSmoother; TRACK_MAX_BUSSES]>,
}

impl Track {
    /// Create a track with `channels` input channels. Even a mono track has
    /// a stereo-capable output bus.
    pub fn new(channels: usize, sample_rate: f64) -> Self {
        let channels = channels.min(2);
        let buffer_channels = channels.max(2);
        Self::build(channels, channels, buffer_channels, 1, 1, sample_rate)
    }

    /// Create a track with `input_busses` and `output_busses` stereo busses.
    pub fn new_multibus(input_busses: usize, output_busses: usize, sample_rate: f64) -> Self {
        let input_busses = input_busses.clamp(1, TRACK_MAX_BUSSES);
        let output_busses = output_busses.clamp(1, TRACK_MAX_BUSSES);
        let channels = input_busses.max(output_busses) * 2;
        Self::build(channels, channels, channels, input_busses, output_busses, sample_rate)
    }

    fn build(
        input_channels: usize,
        output_channels: usize,
        buffer_channels: usize,
        input_busses: usize,
        output_busses: usize,
        sample_rate: f64,
    ) -> Self {
        let mut parameters = ParameterStore::new();
        let mut gain_ids = SmallVec::new();
        let mut pan_ids = SmallVec::new();
        gain_ids.push(parameters.register_float(
            "gain",
            "Gain",
            "",
            DEFAULT_BUS_GAIN,
            ParameterRange::linear(0.0, 2.0),
            true,
        ));
        pan_ids.push(parameters.register_float(
            "pan",
            "Pan",
            "",
            0.0,
            ParameterRange::linear(-1.0, 1.0),
            true,
        ));
        for bus in 1..output_busses {
            gain_ids.push(parameters.register_float(
                &format!("gain_sub_{bus}"),
                "Gain",
                "",
                DEFAULT_BUS_GAIN,
                ParameterRange::linear(0.0, 2.0),
                true,
            ));
            pan_ids.push(parameters.register_float(
                &format!("pan_sub_{bus}"),
                "Pan",
                "",
                0.0,
                ParameterRange::linear(-1.0, 1.0),
                true,
            ));
        }
        let mute_id = parameters.register_bool("mute", "Mute", false, true);

        let data = ProcessorData::new(
            TRACK_UID,
            "Track",
            buffer_channels,
            buffer_channels,
            parameters,
            Vec::new(),
        );
        data.store_input_channels(input_channels);
        data.store_output_channels(output_channels);

        let block_rate = (sample_rate / crate::buffer::AUDIO_CHUNK_SIZE as f64) as f32;
        let smoother = BlockSmoother::new(DEFAULT_BUS_GAIN, PAN_SMOOTHING_TIME_SECS, block_rate);
        Self {
            data,
            gain_ids,
            pan_ids,
            mute_id,
            chain: Vec::with_capacity(TRACK_MAX_PROCESSORS),
            input_buffer: SampleBuffer::with_max_channels(buffer_channels, buffer_channels),
            output_buffer: SampleBuffer::with_max_channels(buffer_channels, buffer_channels),
            input_busses,
            output_busses,
            kb_events: RtEventFifo::new(KB_EVENT_FIFO_CAPACITY),
            event_output: Arc::new(RtEventFifo::new(EVENT_OUTPUT_CAPACITY)),
            smoothers_left: (0..output_busses).map(|_| smoother.clone()).collect(),
            smoothers_right: (0..output_busses).map(|_| smoother.clone()).collect(),
        }
    }

    pub fn data(&self) -> &Arc<ProcessorData> {
        &self.data
    }

    pub fn id(&self) -> ObjectId {
        self.data.id()
    }

    pub fn input_busses(&self) -> usize {
        self.input_busses
    }

    pub fn output_busses(&self) -> usize {
        self.output_busses
    }

    pub fn event_output(&self) -> &Arc<RtEventFifo<RtEvent>> {
        &self.event_output
    }

    pub fn processor_ids(&self) -> Vec<ObjectId> {
        self.chain.iter().map(|p| p.id()).collect()
    }

    pub fn processor_count(&self) -> usize {
        self.chain.len()
    }

    pub(crate) fn input_buffer_mut(&mut self) -> &mut SampleBuffer {
        &mut self.input_buffer
    }

    pub(crate) fn output_buffer(&self) -> &SampleBuffer {
        &self.output_buffer
    }

    /// Widen a mono track with stereo capacity; used when connecting its
    /// second output channel.
    pub(crate) fn widen_output_to_stereo(&mut self) {
        self.data.store_output_channels(2);
        self.renegotiate_channels();
    }

    /// Add a processor before `before`, or at the end of the chain.
    /// Preallocated capacity; does not allocate once full.
    pub fn add(&mut self, processor: Arc<ProcessorHandle>, before: Option<ObjectId>) -> bool {
        if self.chain.len() >= TRACK_MAX_PROCESSORS || processor.data().active_on_track() {
            return false;
        }
        let position = match before {
            Some(before_id) => match self.chain.iter().position(|p| p.id() == before_id) {
                Some(index) => index,
                None => return false,
            },
            None => self.chain.len(),
        };
        processor.data().set_active_on_track(true);
        self.chain.insert(position, processor);
        self.renegotiate_channels();
        true
    }

    /// Remove a processor from the chain.
    pub fn remove(&mut self, processor_id: ObjectId) -> bool {
        match self.chain.iter().position(|p| p.id() == processor_id) {
            Some(index) => {
                let removed = self.chain.remove(index);
                removed.data().set_active_on_track(false);
                self.renegotiate_channels();
                true
            }
            None => false,
        }
    }

    /// Reorder a processor within the chain, placing it before `before` or
    /// at the end.
    pub fn move_processor(&mut self, processor_id: ObjectId, before: Option<ObjectId>) -> bool {
        let Some(index) = self.chain.iter().position(|p| p.id() == processor_id) else {
            return false;
        };
        if before == Some(processor_id) {
            return true;
        }
        let handle = self.chain.remove(index);
        let position = match before {
            Some(before_id) => match self.chain.iter().position(|p| p.id() == before_id) {
                Some(i) => i,
                None => {
                    // Restore and fail, the anchor does not exist.
                    self.chain.insert(index, handle);
                    return false;
                }
            },
            None => self.chain.len(),
        };
        self.chain.insert(position, handle);
        self.renegotiate_channels();
        true
    }

    /// Walk the chain from the track's input channel count, asking each
    /// processor for its preferred output count. The final count is padded or
    /// truncated to the track's output width during render.
    pub fn renegotiate_channels(&mut self) {
        let mut channels = self.data.input_channels();
        for handle in &self.chain {
            // SAFETY: chain mutation and renegotiation happen on the
            // realtime side or at a block fence.
            let processor = unsafe { handle.rt_processor() };
            processor.set_input_channels(channels);
            let preferred = processor.preferred_output_channels(processor.data().input_channels());
            processor.set_output_channels(preferred);
            channels = processor.data().output_channels();
        }
    }

    /// Deliver an event to the track itself. Keyboard events are cached and
    /// passed through the chain on the next render.
    pub fn process_event(&mut self, event: RtEvent) {
        use crate::event::RtEventPayload;

        if event.is_keyboard_event() {
            self.kb_events.push(event);
            return;
        }
        match event.payload {
            RtEventPayload::SetBypass { bypassed } => {
                for handle in &self.chain {
                    // SAFETY: see renegotiate_channels.
                    let processor = unsafe { handle.rt_processor() };
                    processor.process_event(RtEvent::set_bypass(handle.id(), bypassed));
                }
                self.data.set_bypassed(bypassed);
            }
            RtEventPayload::ParameterChange { parameter_id, value } => {
                self.data.parameters().set_normalized(parameter_id, value);
            }
            RtEventPayload::BoolParameterChange { parameter_id, value } => {
                self.data
                    .parameters()
                    .set_normalized(parameter_id, if value { 1.0 } else { 0.0 });
            }
            _ => {}
        }
    }

    /// Render one chunk: run the chain, forward leftover events, apply bus
    /// gain/pan, clear the input buffer for the next block.
    pub fn render(&mut self, timings: &TimingLog) {
        let started = Instant::now();

        self.process_chain(timings);
        self.forward_output_events();

        let muted = self
            .data
            .parameters()
            .normalized(self.mute_id)
            .map(|v| v >= 0.5)
            .unwrap_or(false);
        for bus in 0..self.output_busses {
            self.apply_pan_and_gain(bus, muted);
        }
        self.input_buffer.clear();

        timings.record(self.data.id(), started.elapsed());
    }

    fn process_chain(&mut self, timings: &TimingLog) {
        let output_channels = self.data.output_channels();
        let mut result_in_input = true;

        for i in 0..self.chain.len() {
            // SAFETY: this worker is the only accessor during render.
            let processor = unsafe { self.chain[i].rt_processor() };
            while let Some(event) = self.kb_events.pop() {
                processor.process_event(event);
            }

            let in_channels = processor.data().input_channels();
            let out_channels = processor.data().output_channels();
            let (front, back) = if result_in_input {
                (&mut self.input_buffer, &mut self.output_buffer)
            } else {
                (&mut self.output_buffer, &mut self.input_buffer)
            };
            front.set_channel_count(in_channels);
            back.set_channel_count(out_channels);

            let processor_started = Instant::now();
            processor.process_audio(front, back);
            timings.record(processor.data().id(), processor_started.elapsed());

            processor.drain_output_events(&mut |event| {
                if event.is_keyboard_event() {
                    self.kb_events.push(event);
                } else {
                    self.event_output.push(event);
                }
            });

            result_in_input = !result_in_input;
        }

        let produced = self
            .chain
            .last()
            .map(|p| p.data().output_channels())
            .unwrap_or_else(|| self.data.input_channels());

        self.output_buffer.set_channel_count(output_channels);
        let shared = produced.min(output_channels);
        if result_in_input {
            // The chain result still sits in the input buffer.
            for ch in 0..shared {
                self.output_buffer.copy_channel_from(ch, &self.input_buffer, ch);
            }
        }
        for ch in shared..output_channels {
            self.output_buffer.channel_mut(ch).fill(0.0);
        }
    }

    /// Keyboard events not consumed by the chain are re-tagged with the
    /// track's id and forwarded on the event output.
    fn forward_output_events(&mut self) {
        let track_id = self.data.id();
        while let Some(event) = self.kb_events.pop() {
            self.event_output.push(event.with_processor_id(track_id));
        }
    }

    fn apply_pan_and_gain(&mut self, bus: usize, muted: bool) {
        let parameters = self.data.parameters();
        let gain = if muted {
            0.0
        } else {
            parameters.processed_value(self.gain_ids[bus]).unwrap_or(DEFAULT_BUS_GAIN)
        };
        let pan = parameters.domain_value(self.pan_ids[bus]).unwrap_or(0.0);
        let (left_gain, right_gain) = pan_gains(gain, pan);
        self.smoothers_left[bus].set(left_gain);
        self.smoothers_right[bus].set(right_gain);

        let left_ch = bus * 2;
        let right_ch = bus * 2 + 1;
        let output_channels = self.output_buffer.channel_count();
        if left_ch >= output_channels {
            return;
        }

        // A mono source on a stereo bus feeds both sides before panning.
        if self.data.input_channels() == 1 && right_ch < output_channels {
            self.output_buffer.duplicate_channel(left_ch, right_ch);
        }

        if self.smoothers_left[bus].stationary() && self.smoothers_right[bus].stationary() {
            self.output_buffer.apply_gain(left_ch, left_gain);
            if right_ch < output_channels {
                self.output_buffer.apply_gain(right_ch, right_gain);
            }
        } else {
            let from = self.smoothers_left[bus].value();
            let to = self.smoothers_left[bus].next_value();
            self.output_buffer.ramp_gain(left_ch, from, to);
            if right_ch < output_channels {
                let from = self.smoothers_right[bus].value();
                let to = self.smoothers_right[bus].next_value();
                self.output_buffer.ramp_gain(right_ch, from, to);
            }
        }
    }
}

/// A track shared between worlds, mirroring [`ProcessorHandle`].
pub struct TrackHandle {
    data: Arc<ProcessorData>,
    event_output: Arc<RtEventFifo<RtEvent>>,
    input_busses: usize,
    output_busses: usize,
    rt: UnsafeCell<Track>,
}

// SAFETY: `rt` is only accessed through `rt_track()`, whose callers uphold
// the single-accessor contract (rendering worker or fenced block boundary).
unsafe impl Send for TrackHandle {}
unsafe impl Sync for TrackHandle {}

impl TrackHandle {
    pub fn new(track: Track) -> Arc<Self> {
        let data = track.data().clone();
        let event_output = track.event_output().clone();
        let input_busses = track.input_busses();
        let output_busses = track.output_busses();
        Arc::new(Self {
            data,
            event_output,
            input_busses,
            output_busses,
            rt: UnsafeCell::new(track),
        })
    }

    pub fn input_busses(&self) -> usize {
        self.input_busses
    }

    pub fn output_busses(&self) -> usize {
        self.output_busses
    }

    pub fn data(&self) -> &Arc<ProcessorData> {
        &self.data
    }

    pub fn id(&self) -> ObjectId {
        self.data.id()
    }

    pub fn event_output(&self) -> &Arc<RtEventFifo<RtEvent>> {
        &self.event_output
    }

    /// Access the realtime half.
    ///
    /// SAFETY: the caller must be the worker currently rendering this track,
    /// or run while the realtime thread is fenced at a block boundary.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn rt_track(&self) -> &mut Track {
        &mut *self.rt.get()
    }
}
