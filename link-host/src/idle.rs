//! Background task that disconnects clusters no frame shows.
//!
//! Opt-in: a Ready cluster with no mapped frame for longer than
//! `disconnect_after_secs` is disconnected. Unregistering a frame alone never
//! disconnects anything.

use crate::config::IdleConfig;
use crate::manager::ClusterManager;
use crate::metrics::HostMetrics;
use link_types::{ClusterId, ClusterStatus};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant};

/// Tracks how long each cluster has been idle.
#[derive(Debug, Clone)]
pub struct IdleTracker {
    after: Duration,
    since: HashMap<ClusterId, Instant>,
}

impl IdleTracker {
    /// Report clusters idle for at least `after`.
    pub fn new(after: Duration) -> Self {
        Self {
            after,
            since: HashMap::new(),
        }
    }

    /// Record whether `cluster_id` is idle at `now`.
    ///
    /// Returns `true` once it has been idle for the whole period; tracking
    /// then starts over.
    pub fn observe(&mut self, cluster_id: &ClusterId, idle: bool, now: Instant) -> bool {
        if !idle {
            self.since.remove(cluster_id);
            return false;
        }
        let since = *self.since.entry(cluster_id.clone()).or_insert(now);
        if now.duration_since(since) >= self.after {
            self.since.remove(cluster_id);
            return true;
        }
        false
    }

    /// Number of clusters currently tracked as idle.
    pub fn tracked(&self) -> usize {
        self.since.len()
    }

    /// Forget clusters not in `present`.
    pub fn retain(&mut self, present: &[ClusterId]) {
        self.since.retain(|id, _| present.contains(id));
    }
}

/// Spawn the idle disconnect task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_idle_task(
    manager: Arc<ClusterManager>,
    config: IdleConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("idle disconnect disabled");
            return;
        }

        let after = Duration::from_secs(config.disconnect_after_secs);
        tracing::info!(
            "idle disconnect started (after: {}s, interval: {}s)",
            config.disconnect_after_secs,
            config.check_interval_secs
        );

        let mut tracker = IdleTracker::new(after);
        let mut timer = interval(Duration::from_secs(config.check_interval_secs.max(1)));

        loop {
            timer.tick().await;
            sweep(&manager, &mut tracker, Instant::now());
        }
    })
}

fn sweep(manager: &ClusterManager, tracker: &mut IdleTracker, now: Instant) {
    let snapshots = manager.snapshot();
    let present: Vec<_> = snapshots.iter().map(|s| s.cluster.id.clone()).collect();
    tracker.retain(&present);

    for snapshot in snapshots {
        let id = &snapshot.cluster.id;
        let idle = snapshot.status == ClusterStatus::Ready && snapshot.frames.is_empty();
        if !tracker.observe(id, idle, now) {
            continue;
        }
        match manager.disconnect(id) {
            Ok(_) => {
                HostMetrics::bump(&manager.metrics().idle_disconnects);
                tracing::info!(cluster = %id, "disconnected idle cluster");
            }
            Err(e) => tracing::debug!(cluster = %id, "idle disconnect skipped: {}", e),
        }
    }
}
