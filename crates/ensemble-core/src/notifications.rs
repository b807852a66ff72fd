//! Notification fan-out.
//!
//! Subscribers register per notification kind and own a bounded queue each.
//! Delivery never blocks: the registry lock is only held to walk the
//! subscriber list, and a full subscriber queue drops the notification for
//! that subscriber alone.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::debug;

use crate::timings::ProcessTimings;
use crate::types::{ObjectId, PlayingMode, TimeSignature};

const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

/// What happened to the audio graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphChange {
    TrackCreated,
    TrackDeleted,
    ProcessorCreated,
    ProcessorAddedToTrack,
    ProcessorRemovedFromTrack,
    ProcessorDeleted,
}

/// A notification delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Transport {
        playing_mode: PlayingMode,
        tempo: f32,
        time_signature: TimeSignature,
        current_beats: f64,
    },
    CpuTiming {
        timings: ProcessTimings,
    },
    Track {
        change: GraphChange,
        track_id: ObjectId,
    },
    Processor {
        change: GraphChange,
        processor_id: ObjectId,
        track_id: ObjectId,
    },
    ParameterChange {
        processor_id: ObjectId,
        parameter_id: ObjectId,
        normalized_value: f32,
    },
    Clip {
        channel: usize,
        input: bool,
    },
    /// Final notice before the engine goes away.
    Shutdown,
}

/// Notification categories a subscriber can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    TransportUpdate = 0,
    CpuTimingUpdate = 1,
    TrackUpdate = 2,
    ProcessorUpdate = 3,
    ParameterChange = 4,
}

const KIND_COUNT: usize = 5;

/// A live subscription; dropping or cancelling it stops further deliveries.
pub struct Subscription {
    id: u64,
    receiver: Receiver<Notification>,
    cancelled: Arc<AtomicBool>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn try_recv(&self) -> Option<Notification> {
        self.receiver.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<Notification> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Prevent further deliveries. In-flight notifications may still be
    /// read from the queue.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

struct Subscriber {
    id: u64,
    sender: Sender<Notification>,
    cancelled: Arc<AtomicBool>,
}

/// Kind-indexed subscription registry.
pub struct NotificationHub {
    subscribers: [Mutex<Vec<Subscriber>>; KIND_COUNT],
    next_id: AtomicU64,
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationHub {
    pub fn new() -> Self {
        Self {
            subscribers: std::array::from_fn(|_| Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self, kind: NotificationKind) -> Subscription {
        let (sender, receiver) = bounded(SUBSCRIBER_QUEUE_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancelled = Arc::new(AtomicBool::new(false));
        self.subscribers[kind as usize].lock().push(Subscriber {
            id,
            sender,
            cancelled: cancelled.clone(),
        });
        Subscription {
            id,
            receiver,
            cancelled,
        }
    }

    /// Remove a subscriber. Idempotent and safe against concurrent notify.
    pub fn unsubscribe(&self, kind: NotificationKind, id: u64) {
        self.subscribers[kind as usize].lock().retain(|s| s.id != id);
    }

    pub fn subscriber_count(&self, kind: NotificationKind) -> usize {
        self.subscribers[kind as usize].lock().len()
    }

    /// Deliver to every live subscriber of `kind` without blocking.
    pub fn notify(&self, kind: NotificationKind, notification: Notification) {
        let mut subscribers = self.subscribers[kind as usize].lock();
        subscribers.retain(|s| {
            if s.cancelled.load(Ordering::Acquire) {
                return false;
            }
            match s.sender.try_send(notification.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    // Non-critical: that subscriber misses this update.
                    debug!(subscriber = s.id, "notification queue full, dropping update");
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            }
        });
    }

    /// Emit the final shutdown notice on every kind.
    pub fn notify_shutdown(&self) {
        for kind_index in 0..KIND_COUNT {
            let mut subscribers = self.subscribers[kind_index].lock();
            subscribers.retain(|s| {
                !s.cancelled.load(Ordering::Acquire)
                    && s.sender.try_send(Notification::Shutdown).is_ok()
            });
        }
    }
}
