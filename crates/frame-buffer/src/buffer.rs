//! Shared Ring Buffer Implementation

use crate::{BufferError, Sequenced};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Default buffer capacity (250 frames = ~10 s at 25 fps)
pub const DEFAULT_CAPACITY: usize = 250;

/// Result of waiting for new elements
#[derive(Debug)]
pub enum WaitOutcome<T> {
    /// Elements newer than the cursor, oldest first
    Items(Vec<Arc<T>>),
    /// Nothing new arrived before the timeout
    Timeout,
    /// Producer closed the buffer and everything was consumed
    Closed,
}

struct RingState<T> {
    items: VecDeque<Arc<T>>,
    total_written: u64,
    evicted: u64,
    closed: bool,
}

/// Bounded ring of sequenced elements shared between one producer and
/// several consumers.
///
/// Pushing onto a full ring evicts the oldest element. One mutex guards the
/// storage; `new_element` wakes consumers on every push and `full` wakes
/// anyone waiting for the ring to fill up.
pub struct RingBuffer<T> {
    state: Mutex<RingState<T>>,
    new_element: Condvar,
    full: Condvar,
    capacity: usize,
}

impl<T: Sequenced> RingBuffer<T> {
    /// Create a new ring buffer with given capacity
    pub fn new(capacity: usize) -> Result<Self, BufferError> {
        if capacity == 0 {
            return Err(BufferError::InvalidCapacity(capacity));
        }
        Ok(Self::allocate(capacity))
    }

    /// Create a buffer with default capacity
    pub fn with_default_capacity() -> Self {
        Self::allocate(DEFAULT_CAPACITY)
    }

    fn allocate(capacity: usize) -> Self {
        Self {
            state: Mutex::new(RingState {
                items: VecDeque::with_capacity(capacity),
                total_written: 0,
                evicted: 0,
                closed: false,
            }),
            new_element: Condvar::new(),
            full: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RingState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push an element, overwriting the oldest when full.
    ///
    /// Returns the sequence number of the evicted element, if any.
    pub fn push(&self, item: T) -> Option<u64> {
        let mut state = self.lock();
        let evicted = if state.items.len() == self.capacity {
            state.evicted += 1;
            state.items.pop_front().map(|old| old.sequence())
        } else {
            None
        };
        state.items.push_back(Arc::new(item));
        state.total_written += 1;
        let now_full = state.items.len() == self.capacity;
        drop(state);

        self.new_element.notify_all();
        if now_full {
            self.full.notify_all();
        }
        evicted
    }

    /// Get the number of elements currently in the buffer
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if buffer is full
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    /// Get the buffer capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get fill ratio (0.0 to 1.0)
    pub fn fill_ratio(&self) -> f64 {
        self.len() as f64 / self.capacity as f64
    }

    /// Total elements ever pushed
    pub fn total_written(&self) -> u64 {
        self.lock().total_written
    }

    /// Total elements dropped by overwrite
    pub fn evicted(&self) -> u64 {
        self.lock().evicted
    }

    /// Sequence number of the oldest element still present
    pub fn oldest_sequence(&self) -> Option<u64> {
        self.lock().items.front().map(|i| i.sequence())
    }

    /// Sequence number of the newest element
    pub fn newest_sequence(&self) -> Option<u64> {
        self.lock().items.back().map(|i| i.sequence())
    }

    /// Most recent element
    pub fn latest(&self) -> Option<Arc<T>> {
        self.lock().items.back().cloned()
    }

    /// Read the last N elements (most recent first)
    pub fn read_last(&self, count: usize) -> Vec<Arc<T>> {
        self.lock().items.iter().rev().take(count).cloned().collect()
    }

    /// Elements with sequence in `[first, last]`, oldest first.
    ///
    /// The range is clamped to what is still present; elements already
    /// evicted are silently missing.
    pub fn range(&self, first: u64, last: u64) -> Vec<Arc<T>> {
        if first > last {
            return Vec::new();
        }
        self.lock()
            .items
            .iter()
            .filter(|i| (first..=last).contains(&i.sequence()))
            .cloned()
            .collect()
    }

    /// Elements newer than `cursor` (all of them when `cursor` is `None`), oldest first
    pub fn newer_than(&self, cursor: Option<u64>) -> Vec<Arc<T>> {
        Self::collect_newer(&self.lock(), cursor)
    }

    fn collect_newer(state: &RingState<T>, cursor: Option<u64>) -> Vec<Arc<T>> {
        state
            .items
            .iter()
            .filter(|i| cursor.map_or(true, |c| i.sequence() > c))
            .cloned()
            .collect()
    }

    /// Block until elements newer than `cursor` are available, the buffer is
    /// closed, or `timeout` elapses.
    pub fn wait_newer_than(&self, cursor: Option<u64>, timeout: Duration) -> WaitOutcome<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            let items = Self::collect_newer(&state, cursor);
            if !items.is_empty() {
                return WaitOutcome::Items(items);
            }
            if state.closed {
                return WaitOutcome::Closed;
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::Timeout;
            }
            state = self
                .new_element
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Block until an element with sequence `>= sequence` has been pushed.
    ///
    /// Returns `false` on timeout or when the buffer closed first.
    pub fn wait_for_sequence(&self, sequence: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.items.back().map_or(false, |i| i.sequence() >= sequence) {
                return true;
            }
            if state.closed {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .new_element
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Block until the buffer is full. Returns `false` on timeout or close.
    pub fn wait_until_full(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.items.len() == self.capacity {
                return true;
            }
            if state.closed {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .full
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Mark the producer as finished and wake every waiter
    pub fn close(&self) {
        self.lock().closed = true;
        self.new_element.notify_all();
        self.full.notify_all();
    }

    /// Whether the producer has finished
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Clear the buffer
    pub fn clear(&self) {
        self.lock().items.clear();
    }
}
