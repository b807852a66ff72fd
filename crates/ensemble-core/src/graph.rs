//! The processing graph: tracks partitioned across CPU cores.
//!
//! Every live track sits in exactly one worker's list. With one core the
//! calling thread renders everything; with N cores, N-1 parked worker
//! threads are signalled per block and the caller renders worker 0's list
//! before waiting on the barrier.

use std::cell::UnsafeCell;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::timings::TimingLog;
use crate::track::TrackHandle;
use crate::types::ObjectId;

/// Maximum number of tracks the graph reserves space for. Add and remove can
/// run on the realtime thread, so the partitions never reallocate.
pub const MAX_TRACKS: usize = 32;

/// One worker's track list.
///
/// The list is mutated only between blocks (while every worker is parked)
/// and read only by its worker during render, so plain interior mutability
/// with that protocol is sufficient.
struct WorkerSlot {
    tracks: UnsafeCell<Vec<Arc<TrackHandle>>>,
}

// SAFETY: access follows the render protocol above.
unsafe impl Send for WorkerSlot {}
unsafe impl Sync for WorkerSlot {}

impl WorkerSlot {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            tracks: UnsafeCell::new(Vec::with_capacity(MAX_TRACKS)),
        })
    }
}

enum WorkerCommand {
    Render,
    Shutdown,
}

struct Worker {
    command_tx: Sender<WorkerCommand>,
    ack_rx: Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(index: usize, slot: Arc<WorkerSlot>, timings: Arc<TimingLog>) -> Self {
        let (command_tx, command_rx) = bounded::<WorkerCommand>(1);
        let (ack_tx, ack_rx) = bounded::<()>(1);
        let thread = std::thread::Builder::new()
            .name(format!("ensemble-worker-{index}"))
            .spawn(move || {
                while let Ok(command) = command_rx.recv() {
                    match command {
                        WorkerCommand::Render => {
                            // SAFETY: this worker is the only accessor of its
                            // slot between the signal and the ack.
                            let tracks = unsafe { &*slot.tracks.get() };
                            for track in tracks {
                                // SAFETY: same single-accessor contract.
                                unsafe { track.rt_track() }.render(&timings);
                            }
                            // An empty list still acknowledges the barrier.
                            let _ = ack_tx.send(());
                        }
                        WorkerCommand::Shutdown => break,
                    }
                }
            })
            .expect("failed to spawn graph worker");
        Self {
            command_tx,
            ack_rx,
            thread: Some(thread),
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let _ = self.command_tx.send(WorkerCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// The track partitioning and its multicore render barrier.
pub struct AudioGraph {
    slots: Vec<Arc<WorkerSlot>>,
    workers: Vec<Worker>,
    cores: usize,
    next_core: usize,
    track_count: usize,
    timings: Arc<TimingLog>,
}

impl AudioGraph {
    pub fn new(cores: usize, timings: Arc<TimingLog>) -> Self {
        let cores = cores.max(1);
        let slots: Vec<_> = (0..cores).map(|_| WorkerSlot::new()).collect();
        // Worker 0 is the calling thread; spawn one thread per extra core.
        let workers = slots
            .iter()
            .enumerate()
            .skip(1)
            .map(|(index, slot)| Worker::spawn(index, slot.clone(), timings.clone()))
            .collect();
        Self {
            slots,
            workers,
            cores,
            next_core: 0,
            track_count: 0,
            timings,
        }
    }

    pub fn cores(&self) -> usize {
        self.cores
    }

    pub fn track_count(&self) -> usize {
        self.track_count
    }

    /// Add a track on a round-robin core. Must not be called concurrently
    /// with `render` (the engine fences structural changes at block
    /// boundaries).
    pub fn add(&mut self, track: Arc<TrackHandle>) -> bool {
        let core = self.next_core;
        if self.add_to_core(track, core) {
            self.next_core = (self.next_core + 1) % self.cores;
            return true;
        }
        false
    }

    /// Add a track to a specific core. Same constraints as `add`.
    pub fn add_to_core(&mut self, track: Arc<TrackHandle>, core: usize) -> bool {
        if core >= self.cores || self.track_count >= MAX_TRACKS {
            return false;
        }
        // SAFETY: &mut self guarantees no render is in flight.
        let tracks = unsafe { &mut *self.slots[core].tracks.get() };
        tracks.push(track);
        self.track_count += 1;
        true
    }

    /// Remove a track. Same constraints as `add`.
    pub fn remove(&mut self, track_id: ObjectId) -> bool {
        for slot in &self.slots {
            // SAFETY: &mut self guarantees no render is in flight.
            let tracks = unsafe { &mut *slot.tracks.get() };
            if let Some(index) = tracks.iter().position(|t| t.id() == track_id) {
                tracks.remove(index);
                self.track_count -= 1;
                return true;
            }
        }
        false
    }

    /// Render every track once. Single-core renders in the calling thread;
    /// multicore signals the workers, renders worker 0's list locally, then
    /// waits for every worker to acknowledge. A worker that overshoots the
    /// block period is still awaited, never abandoned.
    pub fn render(&mut self) {
        for worker in &self.workers {
            let _ = worker.command_tx.send(WorkerCommand::Render);
        }

        // SAFETY: worker 0's slot belongs to the calling thread.
        let tracks = unsafe { &*self.slots[0].tracks.get() };
        for track in tracks {
            // SAFETY: single-accessor during render.
            unsafe { track.rt_track() }.render(&self.timings);
        }

        for worker in &self.workers {
            let _ = worker.ack_rx.recv();
        }
    }

    /// Visit every track. Must not run concurrently with `render`; the
    /// engine calls this between the barrier and the next block.
    pub fn for_each_track(&self, mut f: impl FnMut(&Arc<TrackHandle>)) {
        for slot in &self.slots {
            // SAFETY: no render in flight while the engine walks the graph.
            let tracks = unsafe { &*slot.tracks.get() };
            for track in tracks {
                f(track);
            }
        }
    }

    /// Look up a track in the partitions.
    pub fn contains(&self, track_id: ObjectId) -> bool {
        let mut found = false;
        self.for_each_track(|t| found |= t.id() == track_id);
        found
    }
}
