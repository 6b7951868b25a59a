// Fixed-capacity ring used for the display and prediction windows
//
// A full ring evicts its oldest sample on push. The lock is held only for the
// VecDeque operation itself, so snapshots never observe a half-applied push.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Metrics for ring buffer monitoring
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RingMetrics {
    pub total_pushed: u64,
    pub total_evicted: u64,
    pub current_size: usize,
    pub peak_size: usize,
    pub capacity: usize,
}

pub struct RingBuffer<T: Clone> {
    buffer: Mutex<VecDeque<T>>,
    capacity: usize,

    total_pushed: AtomicU64,
    total_evicted: AtomicU64,
    peak_size: AtomicUsize,
}

impl<T: Clone> RingBuffer<T> {
    /// Capacity is clamped to at least one slot
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            total_pushed: AtomicU64::new(0),
            total_evicted: AtomicU64::new(0),
            peak_size: AtomicUsize::new(0),
        }
    }

    /// Push a value, dropping the oldest one if the ring is full
    ///
    /// Returns the evicted value, if any
    pub fn push(&self, item: T) -> Option<T> {
        let (evicted, size) = {
            let mut buffer = self.buffer.lock();
            let evicted = if buffer.len() >= self.capacity {
                buffer.pop_front()
            } else {
                None
            };
            buffer.push_back(item);
            (evicted, buffer.len())
        };

        self.total_pushed.fetch_add(1, Ordering::Relaxed);
        if evicted.is_some() {
            self.total_evicted.fetch_add(1, Ordering::Relaxed);
        }
        self.peak_size.fetch_max(size, Ordering::Relaxed);

        evicted
    }

    /// Copy the contents, oldest first
    pub fn snapshot(&self) -> Vec<T> {
        self.buffer.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.buffer.lock().clear();
    }

    pub fn get_metrics(&self) -> RingMetrics {
        RingMetrics {
            total_pushed: self.total_pushed.load(Ordering::Relaxed),
            total_evicted: self.total_evicted.load(Ordering::Relaxed),
            current_size: self.len(),
            peak_size: self.peak_size.load(Ordering::Relaxed),
            capacity: self.capacity,
        }
    }
}
