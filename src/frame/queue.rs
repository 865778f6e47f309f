//! Bounded drop-oldest frame queue
//!
//! Live video values freshness over completeness: when the queue is full a
//! push evicts the oldest buffered frame instead of rejecting the new one.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::Frame;

/// Default number of buffered frames
pub const DEFAULT_QUEUE_CAPACITY: usize = 4;

/// Bounded FIFO of encoded frames
///
/// Internally synchronized; `push` and `pop` never block beyond the short
/// critical section and may be called from any thread.
#[derive(Debug)]
pub struct FrameQueue {
    frames: Mutex<VecDeque<Frame>>,
    capacity: AtomicUsize,
    dropped: AtomicU64,
}

impl FrameQueue {
    /// Create a queue with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a queue holding at most `capacity` frames (minimum 1)
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: AtomicUsize::new(capacity),
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Frame>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a frame, evicting the oldest ones if the queue is full
    ///
    /// Returns the number of frames evicted.
    pub fn push(&self, frame: Frame) -> usize {
        let mut frames = self.lock();
        frames.push_back(frame);
        let evicted = self.trim(&mut frames);
        drop(frames);

        if evicted > 0 {
            tracing::trace!(evicted = evicted, "Frame queue full, dropped oldest");
        }
        evicted
    }

    /// Change the capacity (minimum 1), evicting the oldest frames if needed
    pub fn set_capacity(&self, capacity: usize) {
        let mut frames = self.lock();
        self.capacity.store(capacity.max(1), Ordering::Relaxed);
        self.trim(&mut frames);
    }

    fn trim(&self, frames: &mut VecDeque<Frame>) -> usize {
        let capacity = self.capacity();
        let mut evicted = 0;
        while frames.len() > capacity {
            frames.pop_front();
            evicted += 1;
        }
        if evicted > 0 {
            self.dropped.fetch_add(evicted as u64, Ordering::Relaxed);
        }
        evicted
    }

    /// Remove and return the oldest frame, if any
    pub fn pop(&self) -> Option<Frame> {
        self.lock().pop_front()
    }

    /// Drop every buffered frame
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of buffered frames
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no frame is buffered
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Maximum number of buffered frames
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Total frames evicted since creation
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new()
    }
}
