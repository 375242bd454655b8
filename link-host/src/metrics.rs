//! Operational counters of the owning process.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the manager and every session.
///
/// Thread-safe via `AtomicU64`; all counters are monotonic since startup.
#[derive(Debug, Default)]
pub struct HostMetrics {
    /// Activation attempts that reached Ready.
    pub activations: AtomicU64,
    /// Activation attempts that ended in Error.
    pub activation_failures: AtomicU64,
    /// Upstream watches started.
    pub watch_starts: AtomicU64,
    /// Upstream watches stopped, explicitly or by disconnect.
    pub watch_stops: AtomicU64,
    /// Watch events broadcast to display processes.
    pub events_published: AtomicU64,
    /// Upstream events dropped because their version did not advance.
    pub stale_events: AtomicU64,
    /// Watch stream failures.
    pub stream_errors: AtomicU64,
    /// Stream restarts announced to subscribers.
    pub resyncs: AtomicU64,
    /// Kinds given up on after exhausting recovery.
    pub unavailable: AtomicU64,
    /// Clusters disconnected by the idle task.
    pub idle_disconnects: AtomicU64,
}

impl HostMetrics {
    /// Increment `counter` by one.
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read `counter`.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let metrics = HostMetrics::default();
        assert_eq!(HostMetrics::get(&metrics.activations), 0);
        assert_eq!(HostMetrics::get(&metrics.events_published), 0);
    }

    #[test]
    fn bump_increments() {
        let metrics = HostMetrics::default();
        HostMetrics::bump(&metrics.watch_starts);
        HostMetrics::bump(&metrics.watch_starts);
        assert_eq!(HostMetrics::get(&metrics.watch_starts), 2);
    }
}
