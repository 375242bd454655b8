//! Bounded inbound event backlog.
//!
//! Events for one (cluster, kind) wait here until they are applied to
//! subscribed stores. When the backlog would grow past its threshold, the
//! queued events are discarded and the caller is told to fully resynchronize
//! instead.

use std::collections::VecDeque;

/// Result of pushing an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The event was queued.
    Queued,
    /// The threshold was exceeded; every queued event (including this one)
    /// was discarded and subscribers must reload.
    Overflowed {
        /// Number of events discarded.
        discarded: usize,
    },
}

/// FIFO queue that resets itself instead of growing past `threshold`.
#[derive(Debug)]
pub struct Backlog<T> {
    /// Maximum number of queued events.
    threshold: usize,
    /// Events waiting to be applied.
    queue: VecDeque<T>,
}

impl<T> Backlog<T> {
    /// Create a backlog with the given threshold (at least 1).
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            queue: VecDeque::new(),
        }
    }

    /// Append an event.
    pub fn push(&mut self, item: T) -> PushOutcome {
        if self.queue.len() >= self.threshold {
            let discarded = self.queue.len() + 1;
            self.queue.clear();
            return PushOutcome::Overflowed { discarded };
        }
        self.queue.push_back(item);
        PushOutcome::Queued
    }

    /// Remove and return every queued event in arrival order.
    pub fn drain(&mut self) -> Vec<T> {
        self.queue.drain(..).collect()
    }

    /// Drop every queued event.
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
