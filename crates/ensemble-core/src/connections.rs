//! Audio channel routing between the engine and tracks.
//!
//! The controller mutates a master list under a mutex; every mutation
//! publishes an immutable snapshot through `arc-swap` that the realtime
//! thread loads at the top of a block. The old snapshot is retired once the
//! block fence has passed.

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::types::ObjectId;

/// One engine-channel to track-channel mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConnection {
    pub engine_channel: usize,
    pub track_channel: usize,
    pub track: ObjectId,
}

/// Routing table with a lock-free realtime view.
pub struct ConnectionTable {
    connections: Mutex<Vec<AudioConnection>>,
    snapshot: ArcSwap<Vec<AudioConnection>>,
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(Vec::new()),
            snapshot: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Add a connection. Duplicates of the full key are rejected.
    pub fn add(&self, connection: AudioConnection) -> bool {
        let mut connections = self.connections.lock();
        if connections.contains(&connection) {
            return false;
        }
        connections.push(connection);
        self.snapshot.store(Arc::new(connections.clone()));
        true
    }

    pub fn remove(&self, connection: AudioConnection) -> bool {
        let mut connections = self.connections.lock();
        let before = connections.len();
        connections.retain(|c| *c != connection);
        let removed = connections.len() != before;
        if removed {
            self.snapshot.store(Arc::new(connections.clone()));
        }
        removed
    }

    /// Remove every connection touching `track`. Returns how many went away.
    pub fn remove_track(&self, track: ObjectId) -> usize {
        let mut connections = self.connections.lock();
        let before = connections.len();
        connections.retain(|c| c.track != track);
        let removed = before - connections.len();
        if removed > 0 {
            self.snapshot.store(Arc::new(connections.clone()));
        }
        removed
    }

    /// Controller-side copy of the table.
    pub fn connections(&self) -> Vec<AudioConnection> {
        self.connections.lock().clone()
    }

    pub fn connections_for_track(&self, track: ObjectId) -> Vec<AudioConnection> {
        self.connections
            .lock()
            .iter()
            .copied()
            .filter(|c| c.track == track)
            .collect()
    }

    /// Load the current snapshot. RT-safe; hold it for the whole block.
    pub fn load(&self) -> Arc<Vec<AudioConnection>> {
        self.snapshot.load_full()
    }
}
