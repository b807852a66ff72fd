//! The processor model.
//!
//! A processor is split in two: [`ProcessorData`] holds everything both
//! worlds may touch (identity, bypass flag, channel counts, parameter and
//! property stores, programs) behind atomics and coarse locks, while the DSP
//! state lives in the boxed [`Processor`] implementation that only the
//! realtime side drives.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::SampleBuffer;
use crate::event::RtEvent;
use crate::parameter::ParameterStore;
use crate::state::ProcessorState;
use crate::types::{next_object_id, ObjectId};

/// Shared, thread-safe half of a processor.
pub struct ProcessorData {
    id: ObjectId,
    uid: String,
    label: String,
    name: Mutex<String>,
    bypassed: AtomicBool,
    enabled: AtomicBool,
    active_on_track: AtomicBool,
    input_channels: AtomicUsize,
    output_channels: AtomicUsize,
    max_input_channels: usize,
    max_output_channels: usize,
    parameters: ParameterStore,
    programs: Vec<String>,
    current_program: AtomicI32,
}

impl ProcessorData {
    pub fn new(
        uid: &str,
        label: &str,
        max_input_channels: usize,
        max_output_channels: usize,
        parameters: ParameterStore,
        programs: Vec<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: next_object_id(),
            uid: uid.to_owned(),
            label: label.to_owned(),
            name: Mutex::new(String::new()),
            bypassed: AtomicBool::new(false),
            enabled: AtomicBool::new(false),
            active_on_track: AtomicBool::new(false),
            input_channels: AtomicUsize::new(max_input_channels),
            output_channels: AtomicUsize::new(max_output_channels),
            max_input_channels,
            max_output_channels,
            parameters,
            programs,
            current_program: AtomicI32::new(-1),
        })
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Type identifier used in persisted state records, e.g. `ensemble.gain`.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub fn set_name(&self, name: &str) {
        *self.name.lock() = name.to_owned();
    }

    pub fn bypassed(&self) -> bool {
        self.bypassed.load(Ordering::Acquire)
    }

    pub fn set_bypassed(&self, bypassed: bool) {
        self.bypassed.store(bypassed, Ordering::Release);
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Whether the processor currently sits in a track's chain.
    pub fn active_on_track(&self) -> bool {
        self.active_on_track.load(Ordering::Acquire)
    }

    pub(crate) fn set_active_on_track(&self, active: bool) {
        self.active_on_track.store(active, Ordering::Release);
    }

    pub fn input_channels(&self) -> usize {
        self.input_channels.load(Ordering::Acquire)
    }

    pub fn output_channels(&self) -> usize {
        self.output_channels.load(Ordering::Acquire)
    }

    pub fn max_input_channels(&self) -> usize {
        self.max_input_channels
    }

    pub fn max_output_channels(&self) -> usize {
        self.max_output_channels
    }

    pub(crate) fn store_input_channels(&self, channels: usize) {
        self.input_channels
            .store(channels.min(self.max_input_channels), Ordering::Release);
    }

    pub(crate) fn store_output_channels(&self, channels: usize) {
        self.output_channels
            .store(channels.min(self.max_output_channels), Ordering::Release);
    }

    pub fn parameters(&self) -> &ParameterStore {
        &self.parameters
    }

    pub fn programs(&self) -> &[String] {
        &self.programs
    }

    pub fn supports_programs(&self) -> bool {
        !self.programs.is_empty()
    }

    /// Index of the current program, if the processor has programs and one is
    /// selected.
    pub fn current_program(&self) -> Option<usize> {
        let program = self.current_program.load(Ordering::Acquire);
        (program >= 0).then_some(program as usize)
    }

    /// Returns false for an out-of-range index or a program-less processor.
    pub fn set_current_program(&self, program: usize) -> bool {
        if program >= self.programs.len() {
            return false;
        }
        self.current_program.store(program as i32, Ordering::Release);
        true
    }

    /// Snapshot of the full shared state: program, bypass, parameter and
    /// property values.
    pub fn export_state(&self) -> ProcessorState {
        let mut state = ProcessorState::new(&self.uid);
        if let Some(program) = self.current_program() {
            state.set_program(program as i32);
        }
        state.set_bypass(self.bypassed());
        for descriptor in self.parameters.descriptors() {
            if let Some(value) = self.parameters.normalized(descriptor.id) {
                state.add_parameter_change(descriptor.id, value);
            }
        }
        for descriptor in self.parameters.property_descriptors() {
            if let Some(value) = self.parameters.property_value(descriptor.id) {
                state.add_property_change(descriptor.id, &value);
            }
        }
        state
    }
}

/// Realtime processing surface of a processor.
///
/// `process_event` is called zero or more times before each `process_audio`,
/// always from the thread that renders the owning track.
pub trait Processor: Send {
    fn data(&self) -> &Arc<ProcessorData>;

    fn process_audio(&mut self, input: &SampleBuffer, output: &mut SampleBuffer);

    fn process_event(&mut self, event: RtEvent);

    /// Emit any events produced while processing the last chunk.
    fn drain_output_events(&mut self, _sink: &mut dyn FnMut(RtEvent)) {}

    fn set_input_channels(&mut self, channels: usize) {
        self.data().store_input_channels(channels);
    }

    fn set_output_channels(&mut self, channels: usize) {
        self.data().store_output_channels(channels);
    }

    /// Preferred output channel count for a given input count, used when a
    /// track renegotiates its chain.
    fn preferred_output_channels(&self, input_channels: usize) -> usize {
        input_channels
            .max(1)
            .min(self.data().max_output_channels())
    }

    /// Adapt internal state to a new sample rate. Never called while the
    /// processor is active in the graph.
    fn configure(&mut self, _sample_rate: f64) {}

    /// Select a program. Non-realtime; called while the processor is fenced
    /// out of rendering. The default only tracks the shared program index.
    fn set_program(&mut self, program: usize) -> crate::error::Result<()> {
        if self.data().set_current_program(program) {
            Ok(())
        } else {
            Err(crate::error::Error::NotFound(format!(
                "program {program} out of range"
            )))
        }
    }

    /// Apply the realtime-relevant half of a state record (bypass and
    /// parameter values). Programs and properties are applied on the shared
    /// data by the caller.
    fn apply_state(&mut self, state: &ProcessorState) {
        if let Some(bypassed) = state.bypassed() {
            self.data().set_bypassed(bypassed);
        }
        for &(parameter_id, value) in state.parameters() {
            self.process_event(RtEvent::parameter_change(self.data().id(), 0, parameter_id, value));
        }
    }
}

/// Deterministic bypass routing: mono duplicates to stereo, stereo averages
/// to mono, otherwise the min-channel subset is copied and the rest zeroed.
pub fn bypass_passthrough(input: &SampleBuffer, output: &mut SampleBuffer) {
    let ins = input.channel_count();
    let outs = output.channel_count();
    if ins == 1 && outs == 2 {
        output.copy_channel_from(0, input, 0);
        output.copy_channel_from(1, input, 0);
    } else if ins == 2 && outs == 1 {
        output.copy_channel_from(0, input, 0);
        output.add_channel_from(0, input, 1);
        output.apply_gain(0, 0.5);
    } else {
        let shared = ins.min(outs);
        for ch in 0..shared {
            output.copy_channel_from(ch, input, ch);
        }
        for ch in shared..outs {
            output.channel_mut(ch).fill(0.0);
        }
    }
}

/// A processor instance shared between worlds.
///
/// The boxed DSP state is behind an `UnsafeCell`: it is touched only by the
/// worker rendering the owning track, or by the dispatcher while the engine
/// is fenced at a block boundary.
pub struct ProcessorHandle {
    data: Arc<ProcessorData>,
    rt: UnsafeCell<Box<dyn Processor>>,
}

// SAFETY: `rt` is only accessed through `rt_processor()`, whose callers
// uphold the single-accessor contract above. Everything else is Sync.
unsafe impl Send for ProcessorHandle {}
unsafe impl Sync for ProcessorHandle {}

impl ProcessorHandle {
    pub fn new(processor: Box<dyn Processor>) -> Arc<Self> {
        let data = processor.data().clone();
        Arc::new(Self {
            data,
            rt: UnsafeCell::new(processor),
        })
    }

    pub fn data(&self) -> &Arc<ProcessorData> {
        &self.data
    }

    pub fn id(&self) -> ObjectId {
        self.data.id()
    }

    /// Access the DSP half.
    ///
    /// SAFETY: the caller must be the worker currently rendering the owning
    /// track, or run while the realtime thread is fenced at a block boundary.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn rt_processor(&self) -> &mut Box<dyn Processor> {
        &mut *self.rt.get()
    }
}
