//! Notification subscription surface: one streaming endpoint per kind.

use std::sync::Arc;

use crate::engine::AudioEngine;
use crate::notifications::{NotificationKind, Subscription};

pub struct NotificationController {
    engine: Arc<AudioEngine>,
}

impl NotificationController {
    pub(super) fn new(engine: Arc<AudioEngine>) -> Self {
        Self { engine }
    }

    pub fn subscribe_to_transport_changes(&self) -> Subscription {
        self.engine
            .notifications()
            .subscribe(NotificationKind::TransportUpdate)
    }

    pub fn subscribe_to_cpu_timing_updates(&self) -> Subscription {
        self.engine
            .notifications()
            .subscribe(NotificationKind::CpuTimingUpdate)
    }

    pub fn subscribe_to_track_changes(&self) -> Subscription {
        self.engine
            .notifications()
            .subscribe(NotificationKind::TrackUpdate)
    }

    pub fn subscribe_to_processor_changes(&self) -> Subscription {
        self.engine
            .notifications()
            .subscribe(NotificationKind::ProcessorUpdate)
    }

    pub fn subscribe_to_parameter_updates(&self) -> Subscription {
        self.engine
            .notifications()
            .subscribe(NotificationKind::ParameterChange)
    }

    pub fn unsubscribe(&self, kind: NotificationKind, id: u64) {
        self.engine.notifications().unsubscribe(kind, id);
    }
}
