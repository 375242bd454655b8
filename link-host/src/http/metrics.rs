//! Prometheus metrics endpoint.

use crate::manager::ClusterManager;
use crate::metrics::HostMetrics;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use link_types::ClusterStatus;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Gauges describe current state; counters are monotonic since startup.
pub async fn metrics_handler(Extension(manager): Extension<Arc<ClusterManager>>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        render(&manager),
    )
}

pub(crate) fn render(manager: &ClusterManager) -> String {
    let m = manager.metrics();
    let snapshots = manager.snapshot();

    // Gauges
    let count = |status: ClusterStatus| snapshots.iter().filter(|s| s.status == status).count();
    let disconnected = count(ClusterStatus::Disconnected);
    let activating = count(ClusterStatus::Activating);
    let ready = count(ClusterStatus::Ready);
    let errored = count(ClusterStatus::Error);
    let watches: usize = snapshots.iter().map(|s| s.watches.len()).sum();
    let frames = manager.frames().len();
    let displays = manager.endpoint().peer_count();

    // Counters
    let activations = HostMetrics::get(&m.activations);
    let activation_failures = HostMetrics::get(&m.activation_failures);
    let watch_starts = HostMetrics::get(&m.watch_starts);
    let watch_stops = HostMetrics::get(&m.watch_stops);
    let events = HostMetrics::get(&m.events_published);
    let stale = HostMetrics::get(&m.stale_events);
    let stream_errors = HostMetrics::get(&m.stream_errors);
    let resyncs = HostMetrics::get(&m.resyncs);
    let unavailable = HostMetrics::get(&m.unavailable);
    let idle = HostMetrics::get(&m.idle_disconnects);

    format!(
        r#"# HELP clusterlink_clusters Registered clusters by status
# TYPE clusterlink_clusters gauge
clusterlink_clusters{{status="disconnected"}} {disconnected}
clusterlink_clusters{{status="activating"}} {activating}
clusterlink_clusters{{status="ready"}} {ready}
clusterlink_clusters{{status="error"}} {errored}

# HELP clusterlink_watches_active Running upstream watches
# TYPE clusterlink_watches_active gauge
clusterlink_watches_active {watches}

# HELP clusterlink_frames Mapped display frames
# TYPE clusterlink_frames gauge
clusterlink_frames {frames}

# HELP clusterlink_displays Attached display links
# TYPE clusterlink_displays gauge
clusterlink_displays {displays}

# HELP clusterlink_info Build information
# TYPE clusterlink_info gauge
clusterlink_info{{version="{version}"}} 1

# HELP clusterlink_activations_total Activation attempts that reached ready
# TYPE clusterlink_activations_total counter
clusterlink_activations_total {activations}

# HELP clusterlink_activation_failures_total Activation attempts that failed
# TYPE clusterlink_activation_failures_total counter
clusterlink_activation_failures_total {activation_failures}

# HELP clusterlink_watch_starts_total Upstream watches started
# TYPE clusterlink_watch_starts_total counter
clusterlink_watch_starts_total {watch_starts}

# HELP clusterlink_watch_stops_total Upstream watches stopped
# TYPE clusterlink_watch_stops_total counter
clusterlink_watch_stops_total {watch_stops}

# HELP clusterlink_events_published_total Watch events broadcast to displays
# TYPE clusterlink_events_published_total counter
clusterlink_events_published_total {events}

# HELP clusterlink_stale_events_total Upstream events dropped as stale
# TYPE clusterlink_stale_events_total counter
clusterlink_stale_events_total {stale}

# HELP clusterlink_stream_errors_total Watch stream failures
# TYPE clusterlink_stream_errors_total counter
clusterlink_stream_errors_total {stream_errors}

# HELP clusterlink_resyncs_total Watch stream restarts
# TYPE clusterlink_resyncs_total counter
clusterlink_resyncs_total {resyncs}

# HELP clusterlink_unavailable_total Kinds given up on after recovery failed
# TYPE clusterlink_unavailable_total counter
clusterlink_unavailable_total {unavailable}

# HELP clusterlink_idle_disconnects_total Clusters disconnected while idle
# TYPE clusterlink_idle_disconnects_total counter
clusterlink_idle_disconnects_total {idle}
"#,
        version = env!("CARGO_PKG_VERSION"),
    )
}
