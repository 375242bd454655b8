//! Health check endpoint.

use crate::manager::ClusterManager;
use axum::{Extension, Json};
use link_types::ClusterStatus;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Global start time for uptime calculation.
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize the start time (call once at startup).
pub fn init_start_time() {
    START_TIME.get_or_init(Instant::now);
}

/// Health status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Overall status.
    pub status: String,
    /// Crate version.
    pub version: String,
    /// Registered clusters.
    pub clusters: usize,
    /// Clusters in Ready.
    pub ready: usize,
    /// Attached display links.
    pub displays: usize,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
}

/// Health check handler.
pub async fn health_handler(Extension(manager): Extension<Arc<ClusterManager>>) -> Json<HealthStatus> {
    let uptime = START_TIME
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0);

    let snapshots = manager.snapshot();
    Json(HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        clusters: snapshots.len(),
        ready: snapshots
            .iter()
            .filter(|s| s.status == ClusterStatus::Ready)
            .count(),
        displays: manager.endpoint().peer_count(),
        uptime_seconds: uptime,
    })
}
