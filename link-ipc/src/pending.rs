//! Correlation table for in-flight requests.
//!
//! Every request gets an entry keyed by its correlation id. An entry leaves
//! the table exactly once: when its reply arrives, when its deadline passes,
//! or when the requester goes away. Whichever removes it settles it; the
//! others find nothing and do nothing.

use crate::error::IpcError;
use link_types::{CorrelationId, FaultKind, ReplyOutcome};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Result delivered to a waiting requester.
pub type Settlement = Result<Value, IpcError>;

struct PendingEntry {
    channel: String,
    issued: Instant,
    deadline: Instant,
    resolver: oneshot::Sender<Settlement>,
}

/// Table of requests awaiting a reply.
pub struct PendingRequests {
    next_id: AtomicU64,
    entries: Mutex<HashMap<CorrelationId, PendingEntry>>,
}

impl PendingRequests {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CorrelationId, PendingEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a correlation id and register its resolver.
    pub fn register(
        &self,
        channel: &str,
        deadline: Instant,
    ) -> (CorrelationId, oneshot::Receiver<Settlement>) {
        let id = CorrelationId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (resolver, rx) = oneshot::channel();
        self.entries().insert(
            id,
            PendingEntry {
                channel: channel.to_string(),
                issued: Instant::now(),
                deadline,
                resolver,
            },
        );
        (id, rx)
    }

    /// Settle `id` with a reply from the responder.
    ///
    /// Returns `false` when the entry is already gone (late or duplicate
    /// reply).
    pub fn settle(&self, id: CorrelationId, outcome: ReplyOutcome) -> bool {
        let Some(entry) = self.entries().remove(&id) else {
            return false;
        };

        let settlement = match outcome {
            ReplyOutcome::Resolved(value) => Ok(value),
            ReplyOutcome::Rejected(fault) => match fault.kind {
                FaultKind::NotHandled => Err(IpcError::NotHandled {
                    channel: entry.channel,
                }),
                FaultKind::HandlerFailed => Err(IpcError::Remote {
                    channel: entry.channel,
                    message: fault.message,
                }),
            },
        };
        // Requester may have stopped listening; the entry is settled either way
        let _ = entry.resolver.send(settlement);
        true
    }

    /// Remove `id` without settling it, returning its channel if it was
    /// still pending.
    pub fn expire(&self, id: CorrelationId) -> Option<String> {
        self.entries().remove(&id).map(|entry| entry.channel)
    }

    /// Settle every entry whose deadline is at or before `now` with
    /// [`IpcError::Timeout`].
    pub fn evict_expired(&self, now: Instant) -> usize {
        let expired: Vec<PendingEntry> = {
            let mut entries = self.entries();
            let ids: Vec<CorrelationId> = entries
                .iter()
                .filter(|(_, e)| e.deadline <= now)
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| entries.remove(id)).collect()
        };

        let count = expired.len();
        for entry in expired {
            let after = entry.deadline.saturating_duration_since(entry.issued);
            let _ = entry.resolver.send(Err(IpcError::Timeout {
                channel: entry.channel,
                after,
            }));
        }
        count
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Check if no request is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PendingRequests {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequests")
            .field("pending", &self.len())
            .finish_non_exhaustive()
    }
}
