//! Hand-off queue between detection and the recorder thread

use detection::ConfirmedEvent;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::warn;

/// Result of a blocking pop
#[derive(Debug)]
pub enum Popped {
    Event(Box<ConfirmedEvent>),
    Timeout,
    /// Queue closed and drained
    Closed,
}

struct QueueState {
    events: VecDeque<ConfirmedEvent>,
    closed: bool,
}

/// Bounded FIFO of confirmed events. Pushing never blocks: when full, the
/// oldest pending event is dropped.
pub struct RecorderQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    capacity: usize,
}

impl RecorderQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                events: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue an event; returns `false` when the queue is closed
    pub fn push(&self, event: ConfirmedEvent) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        if state.events.len() >= self.capacity {
            if let Some(dropped) = state.events.pop_front() {
                warn!(
                    "Recorder queue full, dropping track {} (frames {}..={})",
                    dropped.event.id, dropped.window.first, dropped.window.last
                );
                metrics::counter!("recorder_events_dropped_total").increment(1);
            }
        }
        state.events.push_back(event);
        drop(state);
        self.available.notify_one();
        true
    }

    /// Wait up to `timeout` for the next event
    pub fn pop(&self, timeout: Duration) -> Popped {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(event) = state.events.pop_front() {
                return Popped::Event(Box::new(event));
            }
            if state.closed {
                return Popped::Closed;
            }
            let now = Instant::now();
            if now >= deadline {
                return Popped::Timeout;
            }
            state = self
                .available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Refuse further events; pending ones are still handed out
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
