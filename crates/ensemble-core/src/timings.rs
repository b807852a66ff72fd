//! CPU timing statistics for the engine, tracks and processors.
//!
//! Realtime code records per-node durations as fractions of the block period
//! into a lock-free queue; the dispatcher drains the queue into per-node
//! rolling windows from which {avg, min, max} are read.

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use atomic_float::AtomicF32;
use parking_lot::Mutex;

use crate::buffer::AUDIO_CHUNK_SIZE;
use crate::fifo::RtEventQueue;
use crate::types::ObjectId;

/// Node id used for the whole-engine timing entry.
pub const ENGINE_TIMING_ID: ObjectId = 0;

/// Rolling window length in blocks.
pub const TIMING_WINDOW_BLOCKS: usize = 1024;

const TIMING_QUEUE_CAPACITY: usize = 8192;

#[derive(Debug, Clone, Copy)]
struct TimingEntry {
    id: ObjectId,
    fraction: f32,
}

/// Realtime-side timing recorder.
pub struct TimingLog {
    queue: RtEventQueue<TimingEntry>,
    enabled: AtomicBool,
    block_period_secs: AtomicF32,
}

impl TimingLog {
    pub fn new(sample_rate: f64) -> Self {
        let log = Self {
            queue: RtEventQueue::new(TIMING_QUEUE_CAPACITY),
            enabled: AtomicBool::new(false),
            block_period_secs: AtomicF32::new(0.0),
        };
        log.set_sample_rate(sample_rate);
        log
    }

    pub fn set_sample_rate(&self, sample_rate: f64) {
        self.block_period_secs
            .store((AUDIO_CHUNK_SIZE as f64 / sample_rate) as f32, Ordering::Release);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Record one node's processing time for the current block. RT-safe.
    #[inline]
    pub fn record(&self, id: ObjectId, elapsed: Duration) {
        if !self.enabled.load(Ordering::Acquire) {
            return;
        }
        let period = self.block_period_secs.load(Ordering::Relaxed);
        if period <= 0.0 {
            return;
        }
        let fraction = elapsed.as_secs_f32() / period;
        self.queue.push(TimingEntry { id, fraction });
    }
}

/// Aggregated timings for one node over the rolling window, as fractions of
/// the block period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessTimings {
    pub avg: f32,
    pub min: f32,
    pub max: f32,
}

struct NodeWindow {
    samples: Vec<f32>,
    next: usize,
    filled: usize,
}

impl NodeWindow {
    fn new() -> Self {
        Self {
            samples: vec![0.0; TIMING_WINDOW_BLOCKS],
            next: 0,
            filled: 0,
        }
    }

    fn push(&mut self, fraction: f32) {
        self.samples[self.next] = fraction;
        self.next = (self.next + 1) % TIMING_WINDOW_BLOCKS;
        self.filled = (self.filled + 1).min(TIMING_WINDOW_BLOCKS);
    }

    fn timings(&self) -> Option<ProcessTimings> {
        if self.filled == 0 {
            return None;
        }
        let window = &self.samples[..self.filled];
        let mut min = f32::MAX;
        let mut max = f32::MIN;
        let mut sum = 0.0;
        for &v in window {
            min = min.min(v);
            max = max.max(v);
            sum += v;
        }
        Some(ProcessTimings {
            avg: sum / self.filled as f32,
            min,
            max,
        })
    }
}

/// Non-realtime aggregation of timing records.
pub struct TimingRegistry {
    log: std::sync::Arc<TimingLog>,
    windows: Mutex<HashMap<ObjectId, NodeWindow>>,
}

impl TimingRegistry {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            log: std::sync::Arc::new(TimingLog::new(sample_rate)),
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn log(&self) -> &std::sync::Arc<TimingLog> {
        &self.log
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.log.set_enabled(enabled);
    }

    pub fn enabled(&self) -> bool {
        self.log.enabled()
    }

    /// Drain pending realtime records into the rolling windows. Called
    /// periodically by the dispatcher.
    pub fn process_pending(&self) {
        let mut windows = self.windows.lock();
        while let Some(entry) = self.log.queue.pop() {
            windows.entry(entry.id).or_insert_with(NodeWindow::new).push(entry.fraction);
        }
    }

    pub fn timings_for_node(&self, id: ObjectId) -> Option<ProcessTimings> {
        self.windows.lock().get(&id).and_then(|w| w.timings())
    }

    pub fn reset(&self) {
        self.windows.lock().clear();
    }

    pub fn reset_node(&self, id: ObjectId) {
        self.windows.lock().remove(&id);
    }

    /// Write the current statistics for the given nodes to `out`.
    pub fn write_report(
        &self,
        out: &mut dyn Write,
        nodes: &[(ObjectId, String)],
    ) -> std::io::Result<()> {
        writeln!(out, "Processing timings in percent of the block period")?;
        writeln!(out, "{:<24}{:>12}{:>12}{:>12}", "", "average", "minimum", "maximum")?;
        for (id, name) in nodes {
            if let Some(t) = self.timings_for_node(*id) {
                writeln!(
                    out,
                    "{:<24}{:>11.2}%{:>11.2}%{:>11.2}%",
                    name,
                    t.avg * 100.0,
                    t.min * 100.0,
                    t.max * 100.0
                )?;
            }
        }
        if let Some(t) = self.timings_for_node(ENGINE_TIMING_ID) {
            writeln!(
                out,
                "{:<24}{:>11.2}%{:>11.2}%{:>11.2}%",
                "Engine total",
                t.avg * 100.0,
                t.min * 100.0,
                t.max * 100.0
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_log_records_nothing() {
        let registry = TimingRegistry::new(48000.0);
        registry.log().record(1, Duration::from_micros(100));
        registry.process_pending();
        assert_eq!(registry.timings_for_node(1), None);
    }

    #[test]
    fn test_statistics_over_window() {
        let registry = TimingRegistry::new(48000.0);
        registry.set_enabled(true);
        // Block period at 48 kHz / 64 frames is ~1333 us.
        registry.log().record(1, Duration::from_micros(666));
        registry.log().record(1, Duration::from_micros(1333));
        registry.process_pending();

        let timings = registry.timings_for_node(1).unwrap();
        assert!((timings.min - 0.5).abs() < 0.01);
        assert!((timings.max - 1.0).abs() < 0.01);
        assert!((timings.avg - 0.75).abs() < 0.01);
    }

    #[test]
    fn test_overrun_is_recorded_above_one() {
        let registry = TimingRegistry::new(48000.0);
        registry.set_enabled(true);
        registry.log().record(ENGINE_TIMING_ID, Duration::from_micros(2666));
        registry.process_pending();
        let timings = registry.timings_for_node(ENGINE_TIMING_ID).unwrap();
        assert!(timings.max > 1.5);
    }

    #[test]
    fn test_reset_clears_windows() {
        let registry = TimingRegistry::new(48000.0);
        registry.set_enabled(true);
        registry.log().record(1, Duration::from_micros(100));
        registry.process_pending();
        assert!(registry.timings_for_node(1).is_some());
        registry.reset();
        assert_eq!(registry.timings_for_node(1), None);
    }

    #[test]
    fn test_report_contains_nodes() {
        let registry = TimingRegistry::new(48000.0);
        registry.set_enabled(true);
        registry.log().record(5, Duration::from_micros(500));
        registry.log().record(ENGINE_TIMING_ID, Duration::from_micros(700));
        registry.process_pending();

        let mut out = Vec::new();
        registry
            .write_report(&mut out, &[(5, "main".to_owned())])
            .unwrap();
        let report = String::from_utf8(out).unwrap();
        assert!(report.contains("main"));
        assert!(report.contains("Engine total"));
    }
}
