//! Registry of live processors and tracks.
//!
//! The registry is the controller-world source of truth: nodes by id, name
//! lookups per kind, the creation-ordered track list and a non-realtime
//! mirror of every track's chain. It also publishes the read-copy-updated
//! node table the realtime thread resolves event targets against.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::processor::{ProcessorData, ProcessorHandle};
use crate::track::TrackHandle;
use crate::types::ObjectId;

/// A node in the processing graph: a plain processor or a track.
#[derive(Clone)]
pub enum GraphNode {
    Processor(Arc<ProcessorHandle>),
    Track(Arc<TrackHandle>),
}

impl GraphNode {
    pub fn data(&self) -> &Arc<ProcessorData> {
        match self {
            GraphNode::Processor(handle) => handle.data(),
            GraphNode::Track(handle) => handle.data(),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.data().id()
    }
}

/// Immutable node table for realtime event target resolution.
pub type RtNodeTable = HashMap<ObjectId, GraphNode>;

#[derive(Default)]
pub struct ProcessorRegistry {
    nodes: DashMap<ObjectId, GraphNode>,
    processor_names: DashMap<String, ObjectId>,
    track_names: DashMap<String, ObjectId>,
    track_order: Mutex<Vec<ObjectId>>,
    track_chains: DashMap<ObjectId, Vec<ObjectId>>,
    rt_table: ArcSwap<RtNodeTable>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
            processor_names: DashMap::new(),
            track_names: DashMap::new(),
            track_order: Mutex::new(Vec::new()),
            track_chains: DashMap::new(),
            rt_table: ArcSwap::from_pointee(RtNodeTable::new()),
        }
    }

    /// Register a processor under a unique name.
    pub fn add_processor(&self, handle: Arc<ProcessorHandle>, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidName(name.to_owned()));
        }
        if self.processor_names.contains_key(name) {
            return Err(Error::InvalidName(format!("processor name {name:?} already in use")));
        }
        handle.data().set_name(name);
        self.processor_names.insert(name.to_owned(), handle.id());
        self.nodes.insert(handle.id(), GraphNode::Processor(handle));
        Ok(())
    }

    /// Register a track under a unique name.
    pub fn add_track(&self, handle: Arc<TrackHandle>, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidName(name.to_owned()));
        }
        if self.track_names.contains_key(name) {
            return Err(Error::InvalidName(format!("track name {name:?} already in use")));
        }
        handle.data().set_name(name);
        self.track_names.insert(name.to_owned(), handle.id());
        self.track_order.lock().push(handle.id());
        self.track_chains.insert(handle.id(), Vec::new());
        self.nodes.insert(handle.id(), GraphNode::Track(handle));
        Ok(())
    }

    pub fn remove_processor(&self, id: ObjectId) -> bool {
        let Some((_, node)) = self.nodes.remove(&id) else {
            return false;
        };
        self.processor_names.retain(|_, v| *v != id);
        drop(node);
        true
    }

    pub fn remove_track(&self, id: ObjectId) -> bool {
        let Some((_, node)) = self.nodes.remove(&id) else {
            return false;
        };
        self.track_names.retain(|_, v| *v != id);
        self.track_order.lock().retain(|t| *t != id);
        self.track_chains.remove(&id);
        drop(node);
        true
    }

    pub fn node(&self, id: ObjectId) -> Option<GraphNode> {
        self.nodes.get(&id).map(|n| n.clone())
    }

    pub fn data(&self, id: ObjectId) -> Option<Arc<ProcessorData>> {
        self.nodes.get(&id).map(|n| n.data().clone())
    }

    pub fn processor(&self, id: ObjectId) -> Option<Arc<ProcessorHandle>> {
        match self.nodes.get(&id).map(|n| n.clone()) {
            Some(GraphNode::Processor(handle)) => Some(handle),
            _ => None,
        }
    }

    pub fn track(&self, id: ObjectId) -> Option<Arc<TrackHandle>> {
        match self.nodes.get(&id).map(|n| n.clone()) {
            Some(GraphNode::Track(handle)) => Some(handle),
            _ => None,
        }
    }

    pub fn processor_id_by_name(&self, name: &str) -> Option<ObjectId> {
        self.processor_names.get(name).map(|id| *id)
    }

    pub fn track_id_by_name(&self, name: &str) -> Option<ObjectId> {
        self.track_names.get(name).map(|id| *id)
    }

    /// Tracks in creation order.
    pub fn all_tracks(&self) -> Vec<Arc<TrackHandle>> {
        self.track_order
            .lock()
            .iter()
            .filter_map(|id| self.track(*id))
            .collect()
    }

    /// Every registered non-track processor.
    pub fn all_processors(&self) -> Vec<Arc<ProcessorHandle>> {
        self.nodes
            .iter()
            .filter_map(|entry| match entry.value() {
                GraphNode::Processor(handle) => Some(handle.clone()),
                GraphNode::Track(_) => None,
            })
            .collect()
    }

    /// Non-realtime mirror of a track's chain, in chain order.
    pub fn processors_on_track(&self, track_id: ObjectId) -> Vec<ObjectId> {
        self.track_chains
            .get(&track_id)
            .map(|chain| chain.clone())
            .unwrap_or_default()
    }

    pub(crate) fn mirror_add_to_track(
        &self,
        track_id: ObjectId,
        processor_id: ObjectId,
        before: Option<ObjectId>,
    ) {
        if let Some(mut chain) = self.track_chains.get_mut(&track_id) {
            let position = before
                .and_then(|b| chain.iter().position(|p| *p == b))
                .unwrap_or(chain.len());
            chain.insert(position, processor_id);
        }
    }

    pub(crate) fn mirror_remove_from_track(&self, track_id: ObjectId, processor_id: ObjectId) {
        if let Some(mut chain) = self.track_chains.get_mut(&track_id) {
            chain.retain(|p| *p != processor_id);
        }
    }

    /// Track owning a processor, according to the mirror.
    pub fn track_of_processor(&self, processor_id: ObjectId) -> Option<ObjectId> {
        self.track_chains
            .iter()
            .find(|entry| entry.value().contains(&processor_id))
            .map(|entry| *entry.key())
    }

    /// Rebuild and swap the realtime node table. Called after registration
    /// changes, before any control event referencing the new node is posted.
    pub fn publish_rt_table(&self) {
        let mut table = RtNodeTable::with_capacity(self.nodes.len());
        for entry in self.nodes.iter() {
            table.insert(*entry.key(), entry.value().clone());
        }
        self.rt_table.store(Arc::new(table));
    }

    /// Load the current realtime node table. RT-safe.
    pub fn load_rt_table(&self) -> Arc<RtNodeTable> {
        self.rt_table.load_full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::PassthroughProcessor;
    use crate::track::Track;

    fn processor_handle() -> Arc<ProcessorHandle> {
        ProcessorHandle::new(Box::new(PassthroughProcessor::new()))
    }

    fn track_handle() -> Arc<TrackHandle> {
        TrackHandle::new(Track::new(2, 48000.0))
    }

    #[test]
    fn test_name_uniqueness_per_kind() {
        let registry = ProcessorRegistry::new();
        registry.add_processor(processor_handle(), "reverb").unwrap();
        assert!(registry.add_processor(processor_handle(), "reverb").is_err());
        // A track may share a name with a processor, kinds are separate.
        registry.add_track(track_handle(), "reverb").unwrap();
        assert!(registry.add_track(track_handle(), "reverb").is_err());
    }

    #[test]
    fn test_empty_name_rejected() {
        let registry = ProcessorRegistry::new();
        assert!(registry.add_processor(processor_handle(), "").is_err());
    }

    #[test]
    fn test_lookup_by_name_and_id() {
        let registry = ProcessorRegistry::new();
        let processor = processor_handle();
        let id = processor.id();
        registry.add_processor(processor, "filter").unwrap();

        assert_eq!(registry.processor_id_by_name("filter"), Some(id));
        assert!(registry.processor(id).is_some());
        assert!(registry.track(id).is_none());
        assert_eq!(registry.data(id).unwrap().name(), "filter");
    }

    #[test]
    fn test_track_order_preserved() {
        let registry = ProcessorRegistry::new();
        let a = track_handle();
        let b = track_handle();
        let (a_id, b_id) = (a.id(), b.id());
        registry.add_track(a, "one").unwrap();
        registry.add_track(b, "two").unwrap();
        let ids: Vec<_> = registry.all_tracks().iter().map(|t| t.id()).collect();
        assert_eq!(ids, vec![a_id, b_id]);
    }

    #[test]
    fn test_chain_mirror() {
        let registry = ProcessorRegistry::new();
        let track = track_handle();
        let track_id = track.id();
        registry.add_track(track, "main").unwrap();

        registry.mirror_add_to_track(track_id, 100, None);
        registry.mirror_add_to_track(track_id, 200, Some(100));
        assert_eq!(registry.processors_on_track(track_id), vec![200, 100]);
        assert_eq!(registry.track_of_processor(200), Some(track_id));

        registry.mirror_remove_from_track(track_id, 100);
        assert_eq!(registry.processors_on_track(track_id), vec![200]);
    }

    #[test]
    fn test_rt_table_publication() {
        let registry = ProcessorRegistry::new();
        let processor = processor_handle();
        let id = processor.id();
        registry.add_processor(processor, "gain").unwrap();

        assert!(registry.load_rt_table().get(&id).is_none());
        registry.publish_rt_table();
        assert!(registry.load_rt_table().get(&id).is_some());

        registry.remove_processor(id);
        registry.publish_rt_table();
        assert!(registry.load_rt_table().get(&id).is_none());
    }
}
