//! HTTP endpoints for the owning process.
//!
//! Provides health checks, metrics and a cluster overview.

pub mod health;
mod metrics;

use crate::config::HttpConfig;
use crate::error::HostResult;
use crate::manager::{ClusterManager, ClusterSnapshot};
use axum::{routing::get, Extension, Json, Router};
use std::sync::Arc;
use tokio::net::TcpListener;

pub use health::HealthStatus;

/// Build the HTTP router with all endpoints.
pub fn build_router(manager: Arc<ClusterManager>, config: &HttpConfig) -> Router {
    let mut router = Router::new()
        .route("/health", get(health::health_handler))
        .route("/clusters", get(clusters_handler));
    if config.metrics_enabled {
        router = router.route("/metrics", get(metrics::metrics_handler));
    }
    router.layer(Extension(manager))
}

/// Status, frames and watches of every cluster.
async fn clusters_handler(
    Extension(manager): Extension<Arc<ClusterManager>>,
) -> Json<Vec<ClusterSnapshot>> {
    Json(manager.snapshot())
}

/// Bind `config.bind_address` and serve the router until the task is aborted.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or serving fails.
pub async fn serve(manager: Arc<ClusterManager>, config: &HttpConfig) -> HostResult<()> {
    health::init_start_time();
    let listener = TcpListener::bind(&config.bind_address).await?;
    tracing::info!("HTTP endpoints listening on {}", listener.local_addr()?);
    axum::serve(listener, build_router(manager, config)).await?;
    Ok(())
}
