//! Lock-free fixed-slot ring buffers for the realtime event bridge.
//!
//! Two flavors, both with power-of-two capacities, no allocation on push and
//! drop-newest overflow behavior with a drop counter:
//!
//! - [`RtEventFifo`]: single producer, single consumer. Two atomic indices
//!   with cache-line padding.
//! - [`RtEventQueue`]: multiple producers, single consumer. Per-slot sequence
//!   counters with a CAS-claimed tail.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use crossbeam_utils::CachePadded;

/// Single-producer single-consumer ring buffer.
pub struct RtEventFifo<T: Copy> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
    dropped: AtomicU64,
}

// SAFETY: slot access is coordinated through the head/tail indices. A slot is
// written only by the producer before publishing tail, and read only by the
// consumer before publishing head.
unsafe impl<T: Copy + Send> Send for RtEventFifo<T> {}
unsafe impl<T: Copy + Send> Sync for RtEventFifo<T> {}

impl<T: Copy> RtEventFifo<T> {
    /// `capacity` must be a power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "fifo capacity must be a power of two");
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            mask: capacity - 1,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            dropped: AtomicU64::new(0),
        }
    }

    /// Push from the producer side. On overflow the newest value is dropped
    /// and the drop counter incremented.
    #[inline]
    pub fn push(&self, value: T) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) > self.mask {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        unsafe {
            (*self.slots[tail & self.mask].get()).write(value);
        }
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        true
    }

    /// Pop from the consumer side.
    #[inline]
    pub fn pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let value = unsafe { (*self.slots[head & self.mask].get()).assume_init() };
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(value)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    /// Number of events dropped due to overflow.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

struct Slot<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Multi-producer single-consumer bounded queue.
///
/// Producers claim a slot with a CAS on the tail counter and publish it by
/// advancing the slot's sequence; the consumer observes slots in order.
pub struct RtEventQueue<T: Copy> {
    slots: Box<[Slot<T>]>,
    mask: usize,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
    dropped: AtomicU64,
}

// SAFETY: a slot's value is written only by the producer that claimed its
// sequence number and read only by the consumer once the sequence marks it
// published.
unsafe impl<T: Copy + Send> Send for RtEventQueue<T> {}
unsafe impl<T: Copy + Send> Sync for RtEventQueue<T> {}

impl<T: Copy> RtEventQueue<T> {
    /// `capacity` must be a power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "queue capacity must be a power of two");
        let slots = (0..capacity)
            .map(|i| Slot {
                sequence: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            mask: capacity - 1,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            dropped: AtomicU64::new(0),
        }
    }

    /// Push from any producer thread. Returns false (dropping the value) when
    /// the queue is full.
    pub fn push(&self, value: T) -> bool {
        let mut tail = self.tail.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[tail & self.mask];
            let sequence = slot.sequence.load(Ordering::Acquire);
            if sequence == tail {
                match self.tail.compare_exchange_weak(
                    tail,
                    tail.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe {
                            (*slot.value.get()).write(value);
                        }
                        slot.sequence.store(tail.wrapping_add(1), Ordering::Release);
                        return true;
                    }
                    Err(current) => tail = current,
                }
            } else if (sequence as isize).wrapping_sub(tail as isize) < 0 {
                // Slot still occupied by an unconsumed value: queue full.
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return false;
            } else {
                tail = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Pop from the single consumer thread.
    pub fn pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        let slot = &self.slots[head & self.mask];
        let sequence = slot.sequence.load(Ordering::Acquire);
        if sequence != head.wrapping_add(1) {
            return None;
        }
        let value = unsafe { (*slot.value.get()).assume_init() };
        slot.sequence
            .store(head.wrapping_add(self.mask).wrapping_add(1), Ordering::Release);
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(value)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        let head = self.head.load(Ordering::Acquire);
        let slot = &self.slots[head & self.mask];
        slot.sequence.load(Ordering::Acquire) != head.wrapping_add(1)
    }

    /// Number of events dropped due to overflow.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fifo_order() {
        let fifo = RtEventFifo::new(8);
        for i in 0..5 {
            assert!(fifo.push(i));
        }
        for i in 0..5 {
            assert_eq!(fifo.pop(), Some(i));
        }
        assert_eq!(fifo.pop(), None);
    }

    #[test]
    fn test_fifo_overflow_drops_newest() {
        let fifo = RtEventFifo::new(4);
        for i in 0..4 {
            assert!(fifo.push(i));
        }
        assert!(!fifo.push(99));
        assert_eq!(fifo.dropped_count(), 1);
        // The oldest values survive.
        assert_eq!(fifo.pop(), Some(0));
    }

    #[test]
    fn test_fifo_wraps() {
        let fifo = RtEventFifo::new(4);
        for round in 0..10 {
            assert!(fifo.push(round));
            assert_eq!(fifo.pop(), Some(round));
        }
        assert!(fifo.is_empty());
    }

    #[test]
    fn test_queue_single_thread_order() {
        let queue = RtEventQueue::new(8);
        for i in 0..8 {
            assert!(queue.push(i));
        }
        assert!(!queue.push(8));
        assert_eq!(queue.dropped_count(), 1);
        for i in 0..8 {
            assert_eq!(queue.pop(), Some(i));
        }
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_queue_concurrent_producers() {
        let queue = Arc::new(RtEventQueue::new(1024));
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let q = queue.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        while !q.push(p * 1000 + i) {
                            std::thread::yield_now();
                        }
                    }
                })
            })
            .collect();

        let mut seen = Vec::new();
        while seen.len() < 400 {
            if let Some(v) = queue.pop() {
                seen.push(v);
            }
        }
        for handle in producers {
            handle.join().expect("producer panicked");
        }

        // Per-producer FIFO order is preserved.
        for p in 0..4 {
            let values: Vec<_> = seen.iter().filter(|v| *v / 1000 == p).collect();
            assert_eq!(values.len(), 100);
            assert!(values.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
