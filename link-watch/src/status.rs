//! Observable cluster status on the display side.

use link_ipc::{BroadcastSubscription, IpcEndpoint};
use link_types::{channels, ClusterId, ClusterStatus, ClusterStatusReport};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

type Reports = BTreeMap<ClusterId, ClusterStatusReport>;

/// Latest [`ClusterStatusReport`] of every cluster, fed by the
/// `cluster-status` broadcast.
///
/// Presentation reads status from here and never talks to sessions.
pub struct ClusterStatusBoard {
    reports: Arc<watch::Sender<Reports>>,
    _subscription: BroadcastSubscription,
}

impl ClusterStatusBoard {
    /// Follow status broadcasts arriving at `endpoint`.
    pub fn follow(endpoint: &IpcEndpoint) -> Arc<Self> {
        let (tx, _) = watch::channel(Reports::new());
        let reports = Arc::new(tx);

        let sink = reports.clone();
        let subscription = endpoint.subscribe_to_broadcast(channels::CLUSTER_STATUS, move |payload| {
            match serde_json::from_value::<ClusterStatusReport>(payload.clone()) {
                Ok(report) => record_into(&sink, report),
                Err(e) => tracing::warn!("ignoring malformed status report: {}", e),
            }
        });

        Arc::new(Self {
            reports,
            _subscription: subscription,
        })
    }

    /// Last known status of `cluster_id`; `Disconnected` when never reported.
    pub fn status(&self, cluster_id: &ClusterId) -> ClusterStatus {
        self.reports
            .borrow()
            .get(cluster_id)
            .map(|r| r.status)
            .unwrap_or_default()
    }

    /// Last report of `cluster_id`.
    pub fn report(&self, cluster_id: &ClusterId) -> Option<ClusterStatusReport> {
        self.reports.borrow().get(cluster_id).cloned()
    }

    /// Receiver notified on every recorded report.
    pub fn changes(&self) -> watch::Receiver<Reports> {
        self.reports.subscribe()
    }

    /// Record a report obtained by other means, e.g. a status request.
    pub fn record(&self, report: ClusterStatusReport) {
        record_into(&self.reports, report);
    }

    /// Wait until `cluster_id` reports `status`.
    ///
    /// Returns `None` if the board stops receiving reports first.
    pub async fn wait_for(
        &self,
        cluster_id: &ClusterId,
        status: ClusterStatus,
    ) -> Option<ClusterStatusReport> {
        let mut rx = self.reports.subscribe();
        let reports = rx
            .wait_for(|reports| reports.get(cluster_id).is_some_and(|r| r.status == status))
            .await
            .ok()?;
        reports.get(cluster_id).cloned()
    }
}

fn record_into(reports: &watch::Sender<Reports>, report: ClusterStatusReport) {
    tracing::debug!(cluster = %report.cluster_id, status = %report.status, "status recorded");
    reports.send_modify(|all| {
        all.insert(report.cluster_id.clone(), report);
    });
}

impl std::fmt::Debug for ClusterStatusBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterStatusBoard")
            .field("clusters", &self.reports.borrow().len())
            .finish_non_exhaustive()
    }
}
