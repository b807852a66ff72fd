//! The audio engine.
//!
//! Orchestrates one block: drain control and processor event queues, advance
//! the transport, route engine inputs to track busses, render the graph,
//! collect track event outputs, route track busses to the engine output and
//! detect clipping. Structural changes arrive as returnable control events
//! handled at the top of a block; while the engine is not realtime they are
//! applied directly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use atomic_float::AtomicF64;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::buffer::{SampleBuffer, AUDIO_CHUNK_SIZE};
use crate::config::EngineConfig;
use crate::connections::{AudioConnection, ConnectionTable};
use crate::dispatcher::{next_returnable_id, CompletionListener, DEFAULT_COMMAND_TIMEOUT};
use crate::error::{Error, Result};
use crate::event::{RtEvent, RtEventPayload};
use crate::fifo::{RtEventFifo, RtEventQueue};
use crate::graph::AudioGraph;
use crate::internal::InternalProcessorFactory;
use crate::notifications::{GraphChange, Notification, NotificationHub, NotificationKind};
use crate::plugin::{PluginBackend, PluginProcessor};
use crate::processor::ProcessorHandle;
use crate::registry::{GraphNode, ProcessorRegistry, RtNodeTable};
use crate::timings::{TimingRegistry, ENGINE_TIMING_ID};
use crate::track::{Track, TrackHandle, TRACK_MAX_BUSSES};
use crate::transport::{SyncInput, Transport, TransportView};
use crate::types::{ControlStatus, ObjectId, PlayingMode, SyncMode, TimeSignature};

const RT_QUEUE_CAPACITY: usize = 1024;
const CONTROL_QUEUE_CAPACITY: usize = 256;
const OUT_QUEUE_CAPACITY: usize = 4096;
const CLIP_DETECTION_INTERVAL_SECS: f64 = 0.5;

/// Engine realtime state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RealtimeState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl RealtimeState {
    fn from_u8(val: u8) -> Self {
        match val {
            1 => RealtimeState::Starting,
            2 => RealtimeState::Running,
            3 => RealtimeState::Stopping,
            _ => RealtimeState::Stopped,
        }
    }

    fn advance(self) -> Self {
        match self {
            RealtimeState::Starting => RealtimeState::Running,
            RealtimeState::Stopping => RealtimeState::Stopped,
            other => other,
        }
    }
}

/// Identity of a processor to instantiate.
#[derive(Debug, Clone, Default)]
pub struct PluginInfo {
    /// Type uid, e.g. `ensemble.gain` or a plugin-specific identifier.
    pub uid: String,
    /// Library path for external plugins; empty for internal units.
    pub path: String,
    /// Plugin format tag registered with the engine; empty for internal
    /// units.
    pub format: String,
}

impl PluginInfo {
    pub fn internal(uid: &str) -> Self {
        Self {
            uid: uid.to_owned(),
            ..Default::default()
        }
    }
}

/// Per-channel clipping detector with a re-arm interval.
struct ClipDetector {
    interval: u32,
    input_counters: Vec<u32>,
    output_counters: Vec<u32>,
}

impl ClipDetector {
    fn new(sample_rate: f64, input_channels: usize, output_channels: usize) -> Self {
        let interval =
            (sample_rate * CLIP_DETECTION_INTERVAL_SECS) as u32 - AUDIO_CHUNK_SIZE as u32;
        Self {
            interval,
            input_counters: vec![interval; input_channels],
            output_counters: vec![interval; output_channels],
        }
    }

    fn detect(&mut self, buffer: &SampleBuffer, queue: &RtEventFifo<RtEvent>, input: bool) {
        let counters = if input {
            &mut self.input_counters
        } else {
            &mut self.output_counters
        };
        for (channel, counter) in counters.iter_mut().enumerate().take(buffer.channel_count()) {
            if buffer.count_clipped_samples(channel) > 0 && *counter >= self.interval {
                queue.push(RtEvent::clip_notification(channel, input));
                *counter = 0;
            } else {
                *counter += AUDIO_CHUNK_SIZE as u32;
            }
        }
    }
}

/// State owned by the realtime side, behind the engine's block lock.
struct RtCore {
    graph: AudioGraph,
    transport: Transport,
    clip_detector: ClipDetector,
    in_chunk: SampleBuffer,
    out_chunk: SampleBuffer,
    sample_position: u64,
}

/// The engine. Shared between the audio backend (process calls), the
/// controller world and the dispatcher.
pub struct AudioEngine {
    registry: Arc<ProcessorRegistry>,
    rt_in: Arc<RtEventQueue<RtEvent>>,
    control_in: Arc<RtEventQueue<RtEvent>>,
    rt_out: Arc<RtEventFifo<RtEvent>>,
    completions: Arc<CompletionListener>,
    timings: Arc<TimingRegistry>,
    notifications: Arc<NotificationHub>,
    transport_view: Arc<TransportView>,
    sync_input: Arc<SyncInput>,
    input_connections: ConnectionTable,
    output_connections: ConnectionTable,
    internal_factory: InternalProcessorFactory,
    plugin_backends: Mutex<HashMap<String, Arc<dyn PluginBackend>>>,

    state: AtomicU8,
    sample_rate: AtomicF64,
    input_channels: AtomicUsize,
    output_channels: AtomicUsize,
    input_clip_detection: AtomicBool,
    output_clip_detection: AtomicBool,
    command_timeout: Duration,

    rt: Mutex<RtCore>,
}

impl AudioEngine {
    pub fn new(config: EngineConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let timings = Arc::new(TimingRegistry::new(config.sample_rate));
        let transport = Transport::new(config.sample_rate);
        let transport_view = transport.view();
        let sync_input = transport.sync_input();
        let core = RtCore {
            graph: AudioGraph::new(config.cpu_cores, timings.log().clone()),
            transport,
            clip_detector: ClipDetector::new(
                config.sample_rate,
                config.input_channels,
                config.output_channels,
            ),
            in_chunk: SampleBuffer::new(config.input_channels.max(1)),
            out_chunk: SampleBuffer::new(config.output_channels.max(1)),
            sample_position: 0,
        };

        Ok(Arc::new(Self {
            registry: Arc::new(ProcessorRegistry::new()),
            rt_in: Arc::new(RtEventQueue::new(RT_QUEUE_CAPACITY)),
            control_in: Arc::new(RtEventQueue::new(CONTROL_QUEUE_CAPACITY)),
            rt_out: Arc::new(RtEventFifo::new(OUT_QUEUE_CAPACITY)),
            completions: Arc::new(CompletionListener::new()),
            timings,
            notifications: Arc::new(NotificationHub::new()),
            transport_view,
            sync_input,
            input_connections: ConnectionTable::new(),
            output_connections: ConnectionTable::new(),
            internal_factory: InternalProcessorFactory::new(),
            plugin_backends: Mutex::new(HashMap::new()),
            state: AtomicU8::new(RealtimeState::Stopped as u8),
            sample_rate: AtomicF64::new(config.sample_rate),
            input_channels: AtomicUsize::new(config.input_channels),
            output_channels: AtomicUsize::new(config.output_channels),
            input_clip_detection: AtomicBool::new(config.input_clip_detection),
            output_clip_detection: AtomicBool::new(config.output_clip_detection),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            rt: Mutex::new(core),
        }))
    }

    // ------------------------------------------------------------------
    // Shared accessors
    // ------------------------------------------------------------------

    pub fn registry(&self) -> &Arc<ProcessorRegistry> {
        &self.registry
    }

    pub fn timings(&self) -> &Arc<TimingRegistry> {
        &self.timings
    }

    pub fn notifications(&self) -> &Arc<NotificationHub> {
        &self.notifications
    }

    pub fn transport_view(&self) -> &Arc<TransportView> {
        &self.transport_view
    }

    pub fn sync_input(&self) -> &Arc<SyncInput> {
        &self.sync_input
    }

    pub fn rt_in_queue(&self) -> &Arc<RtEventQueue<RtEvent>> {
        &self.rt_in
    }

    pub fn rt_out_queue(&self) -> &Arc<RtEventFifo<RtEvent>> {
        &self.rt_out
    }

    pub fn completions(&self) -> &Arc<CompletionListener> {
        &self.completions
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate.load(Ordering::Acquire)
    }

    pub fn input_channel_count(&self) -> usize {
        self.input_channels.load(Ordering::Acquire)
    }

    pub fn output_channel_count(&self) -> usize {
        self.output_channels.load(Ordering::Acquire)
    }

    pub fn set_input_clip_detection(&self, enabled: bool) {
        self.input_clip_detection.store(enabled, Ordering::Release);
    }

    pub fn set_output_clip_detection(&self, enabled: bool) {
        self.output_clip_detection.store(enabled, Ordering::Release);
    }

    pub fn realtime_state(&self) -> RealtimeState {
        RealtimeState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether structural changes must go through the realtime thread.
    pub fn realtime(&self) -> bool {
        self.realtime_state() != RealtimeState::Stopped
    }

    pub fn enable_realtime(&self, enabled: bool) {
        if enabled {
            self.state
                .store(RealtimeState::Starting as u8, Ordering::Release);
        } else if self.realtime() {
            let event_id = next_returnable_id();
            self.control_in
                .push(RtEvent::new(0, 0, RtEventPayload::StopEngine { event_id }));
        } else {
            self.state
                .store(RealtimeState::Stopped as u8, Ordering::Release);
        }
    }

    /// Change the sample rate. Only valid while not realtime.
    pub fn set_sample_rate(&self, sample_rate: f64) -> Result<()> {
        if self.realtime() {
            return Err(Error::InvalidConfig(
                "sample rate cannot change while the engine is realtime".into(),
            ));
        }
        self.sample_rate.store(sample_rate, Ordering::Release);
        self.timings.log().set_sample_rate(sample_rate);
        let mut core = self.rt.lock();
        core.transport.set_sample_rate(sample_rate);
        core.clip_detector = ClipDetector::new(
            sample_rate,
            self.input_channel_count(),
            self.output_channel_count(),
        );
        for handle in self.registry.all_processors() {
            // SAFETY: the engine is not realtime and the block lock is held.
            unsafe { handle.rt_processor() }.configure(sample_rate);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Block processing (audio backend interface)
    // ------------------------------------------------------------------

    /// Process `frames` of interleaved audio. `frames` must be a multiple of
    /// [`AUDIO_CHUNK_SIZE`]; the call is split into chunk renders.
    pub fn process(&self, input: &[f32], output: &mut [f32]) -> Result<()> {
        let in_channels = self.input_channel_count();
        let out_channels = self.output_channel_count();
        if out_channels == 0 {
            return Ok(());
        }
        let frames = output.len() / out_channels;
        if frames == 0 || frames % AUDIO_CHUNK_SIZE != 0 {
            return Err(Error::InvalidBufferSize(frames));
        }
        if in_channels > 0 && input.len() < frames * in_channels {
            return Err(Error::InvalidBufferSize(input.len() / in_channels.max(1)));
        }

        let mut core = self.rt.lock();
        for chunk_start in (0..frames).step_by(AUDIO_CHUNK_SIZE) {
            if in_channels > 0 {
                core.in_chunk.read_interleaved(input, in_channels, chunk_start);
            }
            self.process_chunk(&mut core);
            core.out_chunk.write_interleaved(output, out_channels, chunk_start);
        }
        Ok(())
    }

    fn process_chunk(&self, core: &mut RtCore) {
        let started = Instant::now();

        let position = core.sample_position;
        let wall_time = position as f64 / core.transport.sample_rate();
        core.transport.set_time(position, wall_time);
        core.sample_position = position + AUDIO_CHUNK_SIZE as u64;

        let rt_table = self.registry.load_rt_table();

        // Control ops first, then processor events: everything queued at
        // block start is delivered before any audio is rendered.
        while let Some(event) = self.control_in.pop() {
            self.handle_control_event(core, &rt_table, &event);
        }
        while let Some(event) = self.rt_in.pop() {
            if event.is_control_event() {
                self.handle_control_event(core, &rt_table, &event);
            } else {
                self.deliver_event(&rt_table, &event);
            }
        }

        if self.input_clip_detection.load(Ordering::Acquire) {
            core.clip_detector.detect(&core.in_chunk, &self.rt_out, true);
        }

        // Engine input channels onto track input busses.
        for connection in self.input_connections.load().iter() {
            let Some(GraphNode::Track(track)) = rt_table.get(&connection.track) else {
                continue;
            };
            // SAFETY: workers are parked between blocks.
            let track_rt = unsafe { track.rt_track() };
            if connection.engine_channel < core.in_chunk.channel_count()
                && connection.track_channel < track_rt.data().input_channels()
            {
                track_rt.input_buffer_mut().copy_channel_from(
                    connection.track_channel,
                    &core.in_chunk,
                    connection.engine_channel,
                );
            }
        }

        core.graph.render();

        // Collect events the tracks produced this block.
        core.graph.for_each_track(|track| {
            while let Some(event) = track.event_output().pop() {
                self.rt_out.push(event);
            }
        });

        // Track output busses onto engine output channels.
        core.out_chunk.clear();
        for connection in self.output_connections.load().iter() {
            let Some(GraphNode::Track(track)) = rt_table.get(&connection.track) else {
                continue;
            };
            // SAFETY: workers are parked between blocks.
            let track_rt = unsafe { track.rt_track() };
            if connection.engine_channel < core.out_chunk.channel_count()
                && connection.track_channel < track_rt.output_buffer().channel_count()
            {
                core.out_chunk.add_channel_from(
                    connection.engine_channel,
                    track_rt.output_buffer(),
                    connection.track_channel,
                );
            }
        }

        if self.output_clip_detection.load(Ordering::Acquire) {
            core.clip_detector.detect(&core.out_chunk, &self.rt_out, false);
        }

        let state = self.realtime_state();
        self.state.store(state.advance() as u8, Ordering::Release);

        self.timings.log().record(ENGINE_TIMING_ID, started.elapsed());
    }

    fn handle_control_event(&self, core: &mut RtCore, rt_table: &RtNodeTable, event: &RtEvent) {
        match event.payload {
            RtEventPayload::StopEngine { event_id } => {
                self.state
                    .store(RealtimeState::Stopping as u8, Ordering::Release);
                self.rt_out.push(RtEvent::completion(event_id, true));
            }
            RtEventPayload::Tempo { .. }
            | RtEventPayload::TimeSignatureChange { .. }
            | RtEventPayload::PlayingModeChange { .. }
            | RtEventPayload::SyncModeChange { .. } => {
                core.transport.process_event(event);
                self.rt_out
                    .push(RtEvent::new(0, 0, RtEventPayload::TransportChange));
            }
            RtEventPayload::AddTrack { event_id, core: target_core } => {
                let handled = match rt_table.get(&event.processor_id) {
                    Some(GraphNode::Track(track)) => match target_core {
                        Some(index) => core.graph.add_to_core(track.clone(), index),
                        None => core.graph.add(track.clone()),
                    },
                    _ => false,
                };
                self.rt_out.push(RtEvent::completion(event_id, handled));
            }
            RtEventPayload::RemoveTrack { event_id } => {
                let handled = core.graph.remove(event.processor_id);
                self.rt_out.push(RtEvent::completion(event_id, handled));
            }
            RtEventPayload::AddProcessorToTrack { event_id, track_id, before } => {
                let handled = match (rt_table.get(&track_id), rt_table.get(&event.processor_id)) {
                    (Some(GraphNode::Track(track)), Some(GraphNode::Processor(processor))) => {
                        // SAFETY: block-top, workers parked.
                        unsafe { track.rt_track() }.add(processor.clone(), before)
                    }
                    _ => false,
                };
                self.rt_out.push(RtEvent::completion(event_id, handled));
            }
            RtEventPayload::RemoveProcessorFromTrack { event_id, track_id } => {
                let handled = match rt_table.get(&track_id) {
                    Some(GraphNode::Track(track)) => {
                        // SAFETY: block-top, workers parked.
                        unsafe { track.rt_track() }.remove(event.processor_id)
                    }
                    _ => false,
                };
                self.rt_out.push(RtEvent::completion(event_id, handled));
            }
            RtEventPayload::MoveProcessorOnTrack { event_id, track_id, before } => {
                let handled = match rt_table.get(&track_id) {
                    Some(GraphNode::Track(track)) => {
                        // SAFETY: block-top, workers parked.
                        unsafe { track.rt_track() }.move_processor(event.processor_id, before)
                    }
                    _ => false,
                };
                self.rt_out.push(RtEvent::completion(event_id, handled));
            }
            RtEventPayload::WidenTrackOutput { event_id } => {
                let handled = match rt_table.get(&event.processor_id) {
                    Some(GraphNode::Track(track)) => {
                        // SAFETY: block-top, workers parked.
                        unsafe { track.rt_track() }.widen_output_to_stereo();
                        true
                    }
                    _ => false,
                };
                self.rt_out.push(RtEvent::completion(event_id, handled));
            }
            RtEventPayload::Fence { event_id } => {
                self.rt_out.push(RtEvent::completion(event_id, true));
            }
            _ => {}
        }
    }

    fn deliver_event(&self, rt_table: &RtNodeTable, event: &RtEvent) {
        match rt_table.get(&event.processor_id) {
            Some(GraphNode::Track(track)) => {
                // SAFETY: block-top, workers parked.
                unsafe { track.rt_track() }.process_event(*event);
            }
            Some(GraphNode::Processor(processor)) => {
                // SAFETY: block-top, workers parked.
                unsafe { processor.rt_processor() }.process_event(*event);
            }
            None => return,
        }
        if matches!(event.payload, RtEventPayload::ParameterChange { .. }) {
            self.rt_out.push(*event);
        }
    }

    // ------------------------------------------------------------------
    // Control helpers
    // ------------------------------------------------------------------

    fn post_and_wait(&self, event: RtEvent, event_id: u64) -> Result<()> {
        let rx = self.completions.expect(event_id);
        if !self.control_in.push(event) {
            self.completions.complete(event_id, false);
            return Err(Error::QueueFull);
        }
        match self.completions.wait(event_id, &rx, self.command_timeout) {
            ControlStatus::Ok => Ok(()),
            ControlStatus::Timeout => Err(Error::RtTimeout),
            _ => Err(Error::ShuttingDown),
        }
    }

    /// Post a fence and wait for the realtime thread to pass one block
    /// boundary. Used before retiring read-copy-updated state.
    pub fn fence(&self) -> Result<()> {
        if !self.realtime() {
            return Ok(());
        }
        let event_id = next_returnable_id();
        self.post_and_wait(
            RtEvent::new(0, 0, RtEventPayload::Fence { event_id }),
            event_id,
        )
    }

    /// Post an event to the processor event queue.
    pub fn send_rt_event(&self, event: RtEvent) -> Result<()> {
        if self.rt_in.push(event) {
            Ok(())
        } else {
            Err(Error::QueueFull)
        }
    }

    // ------------------------------------------------------------------
    // Tracks
    // ------------------------------------------------------------------

    pub fn create_track(&self, name: &str, channels: usize) -> Result<ObjectId> {
        if channels > 2 {
            return Err(Error::InvalidChannelCount(channels));
        }
        let track = Track::new(channels, self.sample_rate());
        self.register_track(TrackHandle::new(track), name, None)
    }

    pub fn create_multibus_track(
        &self,
        name: &str,
        input_busses: usize,
        output_busses: usize,
    ) -> Result<ObjectId> {
        if input_busses > TRACK_MAX_BUSSES || output_busses > TRACK_MAX_BUSSES {
            return Err(Error::InvalidChannelCount(input_busses.max(output_busses) * 2));
        }
        let track = Track::new_multibus(input_busses, output_busses, self.sample_rate());
        self.register_track(TrackHandle::new(track), name, None)
    }

    /// Create a track pinned to a specific worker core.
    pub fn create_track_on_core(&self, name: &str, channels: usize, worker: usize) -> Result<ObjectId> {
        if channels > 2 {
            return Err(Error::InvalidChannelCount(channels));
        }
        let track = Track::new(channels, self.sample_rate());
        self.register_track(TrackHandle::new(track), name, Some(worker))
    }

    fn register_track(
        &self,
        handle: Arc<TrackHandle>,
        name: &str,
        worker: Option<usize>,
    ) -> Result<ObjectId> {
        let track_id = handle.id();
        self.registry.add_track(handle.clone(), name)?;
        self.registry.publish_rt_table();

        let added = if self.realtime() {
            let event_id = next_returnable_id();
            self.post_and_wait(
                RtEvent::new(
                    track_id,
                    0,
                    RtEventPayload::AddTrack { event_id, core: worker },
                ),
                event_id,
            )
            .is_ok()
        } else {
            let mut core = self.rt.lock();
            match worker {
                Some(index) => core.graph.add_to_core(handle.clone(), index),
                None => core.graph.add(handle.clone()),
            }
        };
        if !added {
            self.registry.remove_track(track_id);
            self.registry.publish_rt_table();
            return Err(Error::InvalidConfig(format!(
                "could not place track {name:?} in the graph"
            )));
        }

        info!(track = name, id = track_id, "track created");
        self.notifications.notify(
            NotificationKind::TrackUpdate,
            Notification::Track {
                change: GraphChange::TrackCreated,
                track_id,
            },
        );
        Ok(track_id)
    }

    pub fn delete_track(&self, track_id: ObjectId) -> Result<()> {
        let track = self
            .registry
            .track(track_id)
            .ok_or_else(|| Error::NotFound(format!("track {track_id}")))?;
        if !self.registry.processors_on_track(track_id).is_empty() {
            return Err(Error::InvalidConfig("track is not empty".into()));
        }

        self.input_connections.remove_track(track_id);
        self.output_connections.remove_track(track_id);

        if self.realtime() {
            let event_id = next_returnable_id();
            self.post_and_wait(
                RtEvent::new(track_id, 0, RtEventPayload::RemoveTrack { event_id }),
                event_id,
            )?;
        } else {
            let mut core = self.rt.lock();
            if !core.graph.remove(track_id) {
                warn!(track = track_id, "track was not in the graph");
            }
        }

        self.registry.remove_track(track_id);
        self.registry.publish_rt_table();
        self.fence()?;
        drop(track);

        self.notifications.notify(
            NotificationKind::TrackUpdate,
            Notification::Track {
                change: GraphChange::TrackDeleted,
                track_id,
            },
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Processors
    // ------------------------------------------------------------------

    pub fn register_plugin_backend(&self, backend: Arc<dyn PluginBackend>) {
        self.plugin_backends
            .lock()
            .insert(backend.format().to_owned(), backend);
    }

    pub fn create_processor(&self, info: &PluginInfo, name: &str) -> Result<ObjectId> {
        let sample_rate = self.sample_rate();
        let processor: Box<dyn crate::processor::Processor> = if info.format.is_empty() {
            self.internal_factory.create(&info.uid, sample_rate)?
        } else {
            let backend = self
                .plugin_backends
                .lock()
                .get(&info.format)
                .cloned()
                .ok_or_else(|| Error::Backend(format!("no backend for format {:?}", info.format)))?;
            let instance = backend.load(&info.uid, &info.path, sample_rate)?;
            Box::new(PluginProcessor::new(&info.uid, &info.uid, instance))
        };

        let handle = ProcessorHandle::new(processor);
        let processor_id = handle.id();
        self.registry.add_processor(handle.clone(), name)?;
        handle.data().set_enabled(true);
        self.registry.publish_rt_table();

        debug!(processor = name, id = processor_id, uid = %info.uid, "processor created");
        self.notifications.notify(
            NotificationKind::ProcessorUpdate,
            Notification::Processor {
                change: GraphChange::ProcessorCreated,
                processor_id,
                track_id: 0,
            },
        );
        Ok(processor_id)
    }

    pub fn add_processor_to_track(
        &self,
        processor_id: ObjectId,
        track_id: ObjectId,
        before: Option<ObjectId>,
    ) -> Result<()> {
        let track = self
            .registry
            .track(track_id)
            .ok_or_else(|| Error::NotFound(format!("track {track_id}")))?;
        let processor = self
            .registry
            .processor(processor_id)
            .ok_or_else(|| Error::NotFound(format!("processor {processor_id}")))?;
        if processor.data().active_on_track() {
            return Err(Error::InvalidConfig(
                "processor is already active on a track".into(),
            ));
        }

        let added = if self.realtime() {
            let event_id = next_returnable_id();
            self.post_and_wait(
                RtEvent::new(
                    processor_id,
                    0,
                    RtEventPayload::AddProcessorToTrack { event_id, track_id, before },
                ),
                event_id,
            )
            .is_ok()
        } else {
            let _core = self.rt.lock();
            // SAFETY: block lock held, engine not realtime.
            unsafe { track.rt_track() }.add(processor.clone(), before)
        };
        if !added {
            return Err(Error::InvalidConfig(format!(
                "could not insert processor {processor_id} into track {track_id}"
            )));
        }

        self.registry.mirror_add_to_track(track_id, processor_id, before);
        self.notifications.notify(
            NotificationKind::ProcessorUpdate,
            Notification::Processor {
                change: GraphChange::ProcessorAddedToTrack,
                processor_id,
                track_id,
            },
        );
        Ok(())
    }

    pub fn remove_processor_from_track(
        &self,
        processor_id: ObjectId,
        track_id: ObjectId,
    ) -> Result<()> {
        let track = self
            .registry
            .track(track_id)
            .ok_or_else(|| Error::NotFound(format!("track {track_id}")))?;
        self.registry
            .processor(processor_id)
            .ok_or_else(|| Error::NotFound(format!("processor {processor_id}")))?;

        let removed = if self.realtime() {
            let event_id = next_returnable_id();
            self.post_and_wait(
                RtEvent::new(
                    processor_id,
                    0,
                    RtEventPayload::RemoveProcessorFromTrack { event_id, track_id },
                ),
                event_id,
            )
            .is_ok()
        } else {
            let _core = self.rt.lock();
            // SAFETY: block lock held, engine not realtime.
            unsafe { track.rt_track() }.remove(processor_id)
        };
        if !removed {
            return Err(Error::NotFound(format!(
                "processor {processor_id} not on track {track_id}"
            )));
        }

        self.registry.mirror_remove_from_track(track_id, processor_id);
        self.notifications.notify(
            NotificationKind::ProcessorUpdate,
            Notification::Processor {
                change: GraphChange::ProcessorRemovedFromTrack,
                processor_id,
                track_id,
            },
        );
        Ok(())
    }

    /// Move a processor between tracks, or reorder it within one.
    pub fn move_processor(
        &self,
        processor_id: ObjectId,
        source_track_id: ObjectId,
        dest_track_id: ObjectId,
        before: Option<ObjectId>,
    ) -> Result<()> {
        if source_track_id == dest_track_id {
            let track = self
                .registry
                .track(source_track_id)
                .ok_or_else(|| Error::NotFound(format!("track {source_track_id}")))?;
            let moved = if self.realtime() {
                let event_id = next_returnable_id();
                self.post_and_wait(
                    RtEvent::new(
                        processor_id,
                        0,
                        RtEventPayload::MoveProcessorOnTrack {
                            event_id,
                            track_id: source_track_id,
                            before,
                        },
                    ),
                    event_id,
                )
                .is_ok()
            } else {
                let _core = self.rt.lock();
                // SAFETY: block lock held, engine not realtime.
                unsafe { track.rt_track() }.move_processor(processor_id, before)
            };
            if !moved {
                return Err(Error::NotFound(format!(
                    "processor {processor_id} not on track {source_track_id}"
                )));
            }
            self.registry.mirror_remove_from_track(source_track_id, processor_id);
            self.registry.mirror_add_to_track(source_track_id, processor_id, before);
            return Ok(());
        }

        self.remove_processor_from_track(processor_id, source_track_id)?;
        if let Err(error) = self.add_processor_to_track(processor_id, dest_track_id, before) {
            // Put it back at the end of the source chain.
            let _ = self.add_processor_to_track(processor_id, source_track_id, None);
            return Err(error);
        }
        Ok(())
    }

    pub fn delete_processor(&self, processor_id: ObjectId) -> Result<()> {
        let processor = self
            .registry
            .processor(processor_id)
            .ok_or_else(|| Error::NotFound(format!("processor {processor_id}")))?;
        if processor.data().active_on_track() {
            return Err(Error::InvalidConfig(
                "processor is still active on a track".into(),
            ));
        }

        self.registry.remove_processor(processor_id);
        self.registry.publish_rt_table();
        self.fence()?;
        drop(processor);

        self.notifications.notify(
            NotificationKind::ProcessorUpdate,
            Notification::Processor {
                change: GraphChange::ProcessorDeleted,
                processor_id,
                track_id: 0,
            },
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Audio routing
    // ------------------------------------------------------------------

    pub fn connect_audio_input_channel(
        &self,
        engine_channel: usize,
        track_channel: usize,
        track_id: ObjectId,
    ) -> Result<()> {
        let track = self
            .registry
            .track(track_id)
            .ok_or_else(|| Error::NotFound(format!("track {track_id}")))?;
        if engine_channel >= self.input_channel_count()
            || track_channel >= track.data().input_channels()
        {
            return Err(Error::InvalidChannelCount(engine_channel.max(track_channel)));
        }
        let connection = AudioConnection {
            engine_channel,
            track_channel,
            track: track_id,
        };
        if !self.input_connections.add(connection) {
            return Err(Error::InvalidConfig("connection already exists".into()));
        }
        Ok(())
    }

    pub fn connect_audio_output_channel(
        &self,
        engine_channel: usize,
        track_channel: usize,
        track_id: ObjectId,
    ) -> Result<()> {
        let track = self
            .registry
            .track(track_id)
            .ok_or_else(|| Error::NotFound(format!("track {track_id}")))?;
        if engine_channel >= self.output_channel_count() {
            return Err(Error::InvalidChannelCount(engine_channel));
        }
        if track_channel >= track.data().output_channels() {
            let widenable = track_channel == 1
                && track.data().max_output_channels() >= 2
                && track.data().output_channels() <= 1;
            if !widenable {
                return Err(Error::InvalidChannelCount(track_channel));
            }
            // A mono track with stereo capacity grows when its second
            // output channel gets connected.
            if self.realtime() {
                let event_id = next_returnable_id();
                self.post_and_wait(
                    RtEvent::new(track_id, 0, RtEventPayload::WidenTrackOutput { event_id }),
                    event_id,
                )?;
            } else {
                let _core = self.rt.lock();
                // SAFETY: block lock held, engine not realtime.
                unsafe { track.rt_track() }.widen_output_to_stereo();
            }
        }
        let connection = AudioConnection {
            engine_channel,
            track_channel,
            track: track_id,
        };
        if !self.output_connections.add(connection) {
            return Err(Error::InvalidConfig("connection already exists".into()));
        }
        Ok(())
    }

    pub fn connect_audio_input_bus(
        &self,
        engine_bus: usize,
        track_bus: usize,
        track_id: ObjectId,
    ) -> Result<()> {
        self.connect_audio_input_channel(engine_bus * 2, track_bus * 2, track_id)?;
        self.connect_audio_input_channel(engine_bus * 2 + 1, track_bus * 2 + 1, track_id)
    }

    pub fn connect_audio_output_bus(
        &self,
        engine_bus: usize,
        track_bus: usize,
        track_id: ObjectId,
    ) -> Result<()> {
        self.connect_audio_output_channel(engine_bus * 2, track_bus * 2, track_id)?;
        self.connect_audio_output_channel(engine_bus * 2 + 1, track_bus * 2 + 1, track_id)
    }

    pub fn disconnect_audio_input_channel(
        &self,
        engine_channel: usize,
        track_channel: usize,
        track_id: ObjectId,
    ) -> Result<()> {
        let connection = AudioConnection {
            engine_channel,
            track_channel,
            track: track_id,
        };
        if self.input_connections.remove(connection) {
            Ok(())
        } else {
            Err(Error::NotFound("no such input connection".into()))
        }
    }

    pub fn disconnect_audio_output_channel(
        &self,
        engine_channel: usize,
        track_channel: usize,
        track_id: ObjectId,
    ) -> Result<()> {
        let connection = AudioConnection {
            engine_channel,
            track_channel,
            track: track_id,
        };
        if self.output_connections.remove(connection) {
            Ok(())
        } else {
            Err(Error::NotFound("no such output connection".into()))
        }
    }

    pub fn audio_input_connections(&self) -> Vec<AudioConnection> {
        self.input_connections.connections()
    }

    pub fn audio_output_connections(&self) -> Vec<AudioConnection> {
        self.output_connections.connections()
    }

    pub fn audio_input_connections_for_track(&self, track_id: ObjectId) -> Vec<AudioConnection> {
        self.input_connections.connections_for_track(track_id)
    }

    pub fn audio_output_connections_for_track(&self, track_id: ObjectId) -> Vec<AudioConnection> {
        self.output_connections.connections_for_track(track_id)
    }

    pub fn disconnect_all_inputs_from_track(&self, track_id: ObjectId) -> usize {
        self.input_connections.remove_track(track_id)
    }

    pub fn disconnect_all_outputs_from_track(&self, track_id: ObjectId) -> usize {
        self.output_connections.remove_track(track_id)
    }

    // ------------------------------------------------------------------
    // Transport control
    // ------------------------------------------------------------------

    pub fn set_tempo(&self, bpm: f32, at_bar_boundary: bool) {
        self.transport_control(RtEventPayload::Tempo { bpm, at_bar_boundary }, |transport| {
            transport.set_tempo(bpm, at_bar_boundary)
        });
    }

    pub fn set_time_signature(&self, signature: TimeSignature, at_bar_boundary: bool) {
        self.transport_control(
            RtEventPayload::TimeSignatureChange { signature, at_bar_boundary },
            |transport| transport.set_time_signature(signature, at_bar_boundary),
        );
    }

    pub fn set_playing_mode(&self, mode: PlayingMode) {
        self.transport_control(RtEventPayload::PlayingModeChange { mode }, |transport| {
            transport.set_playing_mode(mode)
        });
    }

    pub fn set_sync_mode(&self, mode: SyncMode) {
        self.transport_control(RtEventPayload::SyncModeChange { mode }, |transport| {
            transport.set_sync_mode(mode)
        });
    }

    fn transport_control(
        &self,
        payload: RtEventPayload,
        direct: impl FnOnce(&mut Transport),
    ) {
        if self.realtime() {
            self.control_in.push(RtEvent::new(0, 0, payload));
        } else {
            let mut core = self.rt.lock();
            direct(&mut core.transport);
            let view = &self.transport_view;
            self.notifications.notify(
                NotificationKind::TransportUpdate,
                Notification::Transport {
                    playing_mode: view.playing_mode(),
                    tempo: view.tempo(),
                    time_signature: view.time_signature(),
                    current_beats: view.current_beats(),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::GAIN_UID;

    fn offline_engine() -> Arc<AudioEngine> {
        AudioEngine::new(EngineConfig::default()).unwrap()
    }

    fn process_blocks(engine: &AudioEngine, blocks: usize) {
        let input = vec![0.0f32; AUDIO_CHUNK_SIZE * 2 * blocks];
        let mut output = vec![0.0f32; AUDIO_CHUNK_SIZE * 2 * blocks];
        engine.process(&input, &mut output).unwrap();
    }

    #[test]
    fn test_create_and_delete_track() {
        let engine = offline_engine();
        let track_id = engine.create_track("main", 2).unwrap();
        assert_eq!(engine.registry().track_id_by_name("main"), Some(track_id));
        engine.delete_track(track_id).unwrap();
        assert_eq!(engine.registry().track_id_by_name("main"), None);
    }

    #[test]
    fn test_duplicate_track_name_rejected() {
        let engine = offline_engine();
        engine.create_track("main", 2).unwrap();
        assert!(engine.create_track("main", 2).is_err());
    }

    #[test]
    fn test_create_processor_and_add_to_track() {
        let engine = offline_engine();
        let track_id = engine.create_track("main", 2).unwrap();
        let processor_id = engine
            .create_processor(&PluginInfo::internal(GAIN_UID), "gain")
            .unwrap();
        engine.add_processor_to_track(processor_id, track_id, None).unwrap();
        assert_eq!(engine.registry().processors_on_track(track_id), vec![processor_id]);

        // Deleting a track that still hosts processors fails.
        assert!(engine.delete_track(track_id).is_err());

        engine.remove_processor_from_track(processor_id, track_id).unwrap();
        engine.delete_processor(processor_id).unwrap();
        engine.delete_track(track_id).unwrap();
    }

    #[test]
    fn test_delete_active_processor_rejected() {
        let engine = offline_engine();
        let track_id = engine.create_track("main", 2).unwrap();
        let processor_id = engine
            .create_processor(&PluginInfo::internal(GAIN_UID), "gain")
            .unwrap();
        engine.add_processor_to_track(processor_id, track_id, None).unwrap();
        assert!(engine.delete_processor(processor_id).is_err());
    }

    #[test]
    fn test_process_rejects_partial_chunks() {
        let engine = offline_engine();
        let input = vec![0.0f32; 100];
        let mut output = vec![0.0f32; 100];
        assert!(matches!(
            engine.process(&input, &mut output),
            Err(Error::InvalidBufferSize(_))
        ));
    }

    #[test]
    fn test_audio_passes_through_connected_track() {
        let engine = offline_engine();
        let track_id = engine.create_track("main", 2).unwrap();
        engine.connect_audio_input_bus(0, 0, track_id).unwrap();
        engine.connect_audio_output_bus(0, 0, track_id).unwrap();

        let frames = AUDIO_CHUNK_SIZE * 4;
        let input = vec![0.5f32; frames * 2];
        let mut output = vec![0.0f32; frames * 2];
        engine.process(&input, &mut output).unwrap();

        // After the gain smoothers settle the last frames match the input.
        let last = output[output.len() - 1];
        assert!((last - 0.5).abs() < 1e-3, "expected passthrough, got {last}");
    }

    #[test]
    fn test_unconnected_engine_outputs_silence() {
        let engine = offline_engine();
        engine.create_track("main", 2).unwrap();
        let input = vec![1.0f32; AUDIO_CHUNK_SIZE * 2];
        let mut output = vec![9.0f32; AUDIO_CHUNK_SIZE * 2];
        engine.process(&input, &mut output).unwrap();
        assert!(output.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_mono_track_widens_on_second_output_connection() {
        let engine = offline_engine();
        let track_id = engine.create_track("mono", 1).unwrap();
        assert_eq!(engine.registry().data(track_id).unwrap().output_channels(), 1);
        engine.connect_audio_output_channel(0, 0, track_id).unwrap();
        engine.connect_audio_output_channel(1, 1, track_id).unwrap();
        assert_eq!(engine.registry().data(track_id).unwrap().output_channels(), 2);
    }

    #[test]
    fn test_invalid_channel_connection_rejected() {
        let engine = offline_engine();
        let track_id = engine.create_track("main", 2).unwrap();
        assert!(engine.connect_audio_input_channel(99, 0, track_id).is_err());
        assert!(engine.connect_audio_input_channel(0, 99, track_id).is_err());
        assert!(engine.connect_audio_input_channel(0, 0, 7777).is_err());
    }

    #[test]
    fn test_parameter_event_reaches_processor() {
        let engine = offline_engine();
        let track_id = engine.create_track("main", 2).unwrap();
        let processor_id = engine
            .create_processor(&PluginInfo::internal(GAIN_UID), "gain")
            .unwrap();
        engine.add_processor_to_track(processor_id, track_id, None).unwrap();

        let data = engine.registry().data(processor_id).unwrap();
        let parameter_id = data.parameters().parameter_id("gain").unwrap();
        engine
            .send_rt_event(RtEvent::parameter_change(processor_id, 0, parameter_id, 0.25))
            .unwrap();
        process_blocks(&engine, 1);
        assert_eq!(data.parameters().normalized(parameter_id), Some(0.25));

        // The engine reports the change on the outbound queue.
        let mut saw_notification = false;
        while let Some(event) = engine.rt_out_queue().pop() {
            if matches!(event.payload, RtEventPayload::ParameterChange { .. }) {
                saw_notification = true;
            }
        }
        assert!(saw_notification);
    }

    #[test]
    fn test_transport_advances_only_when_playing() {
        let engine = offline_engine();
        process_blocks(&engine, 4);
        assert_eq!(engine.transport_view().current_beats(), 0.0);

        engine.set_playing_mode(PlayingMode::Playing);
        process_blocks(&engine, 4);
        assert!(engine.transport_view().current_beats() > 0.0);
    }

    #[test]
    fn test_realtime_state_machine() {
        let engine = offline_engine();
        assert_eq!(engine.realtime_state(), RealtimeState::Stopped);
        engine.enable_realtime(true);
        assert_eq!(engine.realtime_state(), RealtimeState::Starting);
        process_blocks(&engine, 1);
        assert_eq!(engine.realtime_state(), RealtimeState::Running);

        engine.enable_realtime(false);
        process_blocks(&engine, 2);
        assert_eq!(engine.realtime_state(), RealtimeState::Stopped);
    }

    #[test]
    fn test_structural_change_while_realtime_uses_events() {
        let engine = offline_engine();
        engine.enable_realtime(true);

        // Drive the engine from a backend thread while the controller
        // creates a track.
        let backend_engine = engine.clone();
        let running = Arc::new(AtomicBool::new(true));
        let backend_running = running.clone();
        let backend = std::thread::spawn(move || {
            let input = vec![0.0f32; AUDIO_CHUNK_SIZE * 2];
            let mut output = vec![0.0f32; AUDIO_CHUNK_SIZE * 2];
            while backend_running.load(Ordering::Acquire) {
                backend_engine.process(&input, &mut output).unwrap();
                std::thread::sleep(Duration::from_micros(200));
            }
        });

        // The dispatcher normally resolves completions; emulate it here.
        let dispatcher_engine = engine.clone();
        let dispatcher_running = running.clone();
        let dispatcher = std::thread::spawn(move || {
            while dispatcher_running.load(Ordering::Acquire) {
                while let Some(event) = dispatcher_engine.rt_out_queue().pop() {
                    if let RtEventPayload::Completion { event_id, handled } = event.payload {
                        dispatcher_engine.completions().complete(event_id, handled);
                    }
                }
                std::thread::sleep(Duration::from_micros(100));
            }
        });

        let track_id = engine.create_track("live", 2).unwrap();
        let processor_id = engine
            .create_processor(&PluginInfo::internal(GAIN_UID), "gain")
            .unwrap();
        engine.add_processor_to_track(processor_id, track_id, None).unwrap();
        assert_eq!(engine.registry().processors_on_track(track_id), vec![processor_id]);

        running.store(false, Ordering::Release);
        backend.join().unwrap();
        dispatcher.join().unwrap();
    }
}
