//! The non-realtime event dispatcher.
//!
//! A single worker thread bridges the realtime world to everything else: it
//! drains the outbound realtime queue, resolves returnable-event
//! completions, fans notifications out to subscribers, runs a
//! timestamp-ordered heap of scheduled events and aggregates timing
//! statistics.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::event::{RtEvent, RtEventPayload};
use crate::fifo::{RtEventFifo, RtEventQueue};
use crate::midi::MidiDispatcher;
use crate::notifications::{Notification, NotificationHub, NotificationKind};
use crate::timings::{TimingRegistry, ENGINE_TIMING_ID};
use crate::transport::TransportView;
use crate::types::ControlStatus;

/// Default deadline for commands that wait on the realtime thread.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(500);

const LOOP_PERIOD: Duration = Duration::from_millis(1);
const TIMING_UPDATE_INTERVAL: Duration = Duration::from_secs(1);

static NEXT_RETURNABLE_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);

/// Allocate an id for a returnable control event.
pub fn next_returnable_id() -> u64 {
    NEXT_RETURNABLE_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
}

/// Pending-completion registry shared between command callers and the
/// dispatcher thread.
#[derive(Default)]
pub struct CompletionListener {
    pending: Mutex<HashMap<u64, Sender<bool>>>,
}

impl CompletionListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in a completion before posting the event.
    pub fn expect(&self, event_id: u64) -> Receiver<bool> {
        let (tx, rx) = bounded(1);
        self.pending.lock().insert(event_id, tx);
        rx
    }

    /// Resolve a completion from the realtime thread. A completion whose
    /// waiter already timed out is dropped.
    pub fn complete(&self, event_id: u64, handled: bool) {
        match self.pending.lock().remove(&event_id) {
            Some(tx) => {
                let _ = tx.send(handled);
            }
            None => debug!(event_id, "late completion discarded"),
        }
    }

    /// Wait for a completion, giving up (and de-registering) at the
    /// deadline.
    pub fn wait(&self, event_id: u64, rx: &Receiver<bool>, timeout: Duration) -> ControlStatus {
        match rx.recv_timeout(timeout) {
            Ok(true) => ControlStatus::Ok,
            Ok(false) => ControlStatus::Error,
            Err(RecvTimeoutError::Timeout) => {
                self.pending.lock().remove(&event_id);
                warn!(event_id, "realtime thread missed the command deadline");
                ControlStatus::Timeout
            }
            Err(RecvTimeoutError::Disconnected) => ControlStatus::Error,
        }
    }

    /// Fail everything still outstanding (engine shutdown).
    pub fn fail_all(&self) {
        for (_, tx) in self.pending.lock().drain() {
            let _ = tx.send(false);
        }
    }
}

struct ScheduledEvent {
    deliver_at: Instant,
    event: RtEvent,
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.deliver_at == other.deliver_at
    }
}
impl Eq for ScheduledEvent {}
impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reverse: BinaryHeap is a max-heap, we want the earliest first.
        other.deliver_at.cmp(&self.deliver_at)
    }
}

/// Everything the dispatcher thread needs to run.
pub struct DispatcherContext {
    pub rt_out: Arc<RtEventFifo<RtEvent>>,
    pub rt_in: Arc<RtEventQueue<RtEvent>>,
    pub completions: Arc<CompletionListener>,
    pub notifications: Arc<NotificationHub>,
    pub timings: Arc<TimingRegistry>,
    pub midi: Arc<MidiDispatcher>,
    pub transport_view: Arc<TransportView>,
}

/// The dispatcher worker.
pub struct EventDispatcher {
    running: Arc<AtomicBool>,
    scheduled_tx: Sender<ScheduledEvent>,
    thread: Option<JoinHandle<()>>,
}

impl EventDispatcher {
    /// Spawn the dispatcher thread.
    pub fn run(context: DispatcherContext) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let (scheduled_tx, scheduled_rx) = unbounded::<ScheduledEvent>();
        let loop_running = running.clone();
        let thread = std::thread::Builder::new()
            .name("ensemble-dispatcher".into())
            .spawn(move || event_loop(context, scheduled_rx, loop_running))
            .expect("failed to spawn dispatcher thread");
        Self {
            running,
            scheduled_tx,
            thread: Some(thread),
        }
    }

    /// Queue a realtime event for delivery at a later point in time.
    pub fn post_scheduled(&self, event: RtEvent, deliver_in: Duration) {
        let _ = self.scheduled_tx.send(ScheduledEvent {
            deliver_at: Instant::now() + deliver_in,
            event,
        });
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn event_loop(
    context: DispatcherContext,
    scheduled_rx: Receiver<ScheduledEvent>,
    running: Arc<AtomicBool>,
) {
    let mut heap = BinaryHeap::<ScheduledEvent>::new();
    let mut last_timing_update = Instant::now();

    while running.load(Ordering::Acquire) {
        let loop_started = Instant::now();

        // Newly scheduled events.
        while let Ok(scheduled) = scheduled_rx.try_recv() {
            heap.push(scheduled);
        }
        // Due events move into the realtime queue.
        while let Some(scheduled) = heap.peek() {
            if scheduled.deliver_at > loop_started {
                break;
            }
            if let Some(scheduled) = heap.pop() {
                context.rt_in.push(scheduled.event);
            }
        }

        // Everything the realtime thread produced.
        while let Some(event) = context.rt_out.pop() {
            handle_rt_output(&context, &event);
        }

        // Program changes requested through pc-in routes.
        for request in context.midi.take_program_requests() {
            context.rt_in.push(RtEvent::new(
                request.processor,
                0,
                RtEventPayload::ProgramChange {
                    program: request.program as u32,
                },
            ));
        }

        if loop_started.duration_since(last_timing_update) >= TIMING_UPDATE_INTERVAL {
            last_timing_update = loop_started;
            context.timings.process_pending();
            if context.timings.enabled() {
                if let Some(timings) = context.timings.timings_for_node(ENGINE_TIMING_ID) {
                    context
                        .notifications
                        .notify(NotificationKind::CpuTimingUpdate, Notification::CpuTiming { timings });
                }
            }
        }

        let elapsed = loop_started.elapsed();
        if elapsed < LOOP_PERIOD {
            std::thread::sleep(LOOP_PERIOD - elapsed);
        }
    }

    context.completions.fail_all();
    context.notifications.notify_shutdown();
}

fn handle_rt_output(context: &DispatcherContext, event: &RtEvent) {
    match event.payload {
        RtEventPayload::Completion { event_id, handled } => {
            context.completions.complete(event_id, handled);
        }
        RtEventPayload::ParameterChange { parameter_id, value } => {
            context.notifications.notify(
                NotificationKind::ParameterChange,
                Notification::ParameterChange {
                    processor_id: event.processor_id,
                    parameter_id,
                    normalized_value: value,
                },
            );
        }
        RtEventPayload::ClipNotification { channel, input } => {
            warn!(channel, input, "clipping detected");
            context.notifications.notify(
                NotificationKind::TrackUpdate,
                Notification::Clip { channel, input },
            );
        }
        RtEventPayload::TransportChange => {
            let view = &context.transport_view;
            context.notifications.notify(
                NotificationKind::TransportUpdate,
                Notification::Transport {
                    playing_mode: view.playing_mode(),
                    tempo: view.tempo(),
                    time_signature: view.time_signature(),
                    current_beats: view.current_beats(),
                },
            );
        }
        _ if event.is_keyboard_event() => {
            context.midi.process_track_output(event);
        }
        _ => debug!(?event, "unhandled realtime output event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ProcessorRegistry;

    fn test_context() -> DispatcherContext {
        let rt_in: Arc<RtEventQueue<RtEvent>> = Arc::new(RtEventQueue::new(256));
        let registry = Arc::new(ProcessorRegistry::new());
        DispatcherContext {
            rt_out: Arc::new(RtEventFifo::new(256)),
            rt_in: rt_in.clone(),
            completions: Arc::new(CompletionListener::new()),
            notifications: Arc::new(NotificationHub::new()),
            timings: Arc::new(TimingRegistry::new(48000.0)),
            midi: Arc::new(MidiDispatcher::new(rt_in, registry, 1, 1)),
            transport_view: {
                let transport = crate::transport::Transport::new(48000.0);
                transport.view()
            },
        }
    }

    #[test]
    fn test_completion_round_trip() {
        let listener = CompletionListener::new();
        let id = next_returnable_id();
        let rx = listener.expect(id);
        listener.complete(id, true);
        assert_eq!(listener.wait(id, &rx, Duration::from_millis(50)), ControlStatus::Ok);
    }

    #[test]
    fn test_completion_timeout_discards_late_result() {
        let listener = CompletionListener::new();
        let id = next_returnable_id();
        let rx = listener.expect(id);
        assert_eq!(
            listener.wait(id, &rx, Duration::from_millis(10)),
            ControlStatus::Timeout
        );
        // The late completion finds no waiter and is dropped.
        listener.complete(id, true);
        assert!(listener.pending.lock().is_empty());
    }

    #[test]
    fn test_failed_completion_maps_to_error() {
        let listener = CompletionListener::new();
        let id = next_returnable_id();
        let rx = listener.expect(id);
        listener.complete(id, false);
        assert_eq!(
            listener.wait(id, &rx, Duration::from_millis(50)),
            ControlStatus::Error
        );
    }

    #[test]
    fn test_dispatcher_resolves_completions_from_rt_queue() {
        let context = test_context();
        let completions = context.completions.clone();
        let rt_out = context.rt_out.clone();

        let mut dispatcher = EventDispatcher::run(context);
        let id = next_returnable_id();
        let rx = completions.expect(id);
        rt_out.push(RtEvent::completion(id, true));
        assert_eq!(
            completions.wait(id, &rx, Duration::from_millis(500)),
            ControlStatus::Ok
        );
        dispatcher.stop();
    }

    #[test]
    fn test_dispatcher_fans_out_parameter_notifications() {
        let context = test_context();
        let notifications = context.notifications.clone();
        let rt_out = context.rt_out.clone();

        let subscription = notifications.subscribe(NotificationKind::ParameterChange);
        let mut dispatcher = EventDispatcher::run(context);
        rt_out.push(RtEvent::parameter_change(5, 0, 7, 0.25));

        let notification = subscription
            .recv_timeout(Duration::from_millis(500))
            .expect("expected a notification");
        assert_eq!(
            notification,
            Notification::ParameterChange {
                processor_id: 5,
                parameter_id: 7,
                normalized_value: 0.25
            }
        );
        dispatcher.stop();
    }

    #[test]
    fn test_scheduled_events_reach_rt_queue_in_time_order() {
        let context = test_context();
        let rt_in = context.rt_in.clone();
        let mut dispatcher = EventDispatcher::run(context);

        dispatcher.post_scheduled(RtEvent::note_off(1, 0, 0, 60, 0.5), Duration::from_millis(30));
        dispatcher.post_scheduled(RtEvent::note_on(1, 0, 0, 60, 0.5), Duration::from_millis(5));

        std::thread::sleep(Duration::from_millis(120));
        let first = rt_in.pop().expect("expected first scheduled event");
        let second = rt_in.pop().expect("expected second scheduled event");
        assert!(matches!(first.payload, RtEventPayload::NoteOn { .. }));
        assert!(matches!(second.payload, RtEventPayload::NoteOff { .. }));
        dispatcher.stop();
    }

    #[test]
    fn test_shutdown_notice_on_stop() {
        let context = test_context();
        let notifications = context.notifications.clone();
        let subscription = notifications.subscribe(NotificationKind::TransportUpdate);
        let mut dispatcher = EventDispatcher::run(context);
        dispatcher.stop();
        assert_eq!(
            subscription.recv_timeout(Duration::from_millis(500)),
            Some(Notification::Shutdown)
        );
    }
}
