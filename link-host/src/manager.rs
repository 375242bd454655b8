//! Cluster-scoped context of the owning process.
//!
//! The [`ClusterManager`] owns one [`ClusterSession`] per registered cluster
//! plus the authoritative [`FrameRegistry`], and answers every request
//! channel display processes use. It is threaded explicitly through the
//! APIs that need it; there is no process-wide instance.

use crate::cluster::Cluster;
use crate::error::{HostError, HostResult};
use crate::metrics::HostMetrics;
use crate::session::{ClusterSession, SessionSettings};
use crate::upstream::ApiConnector;
use async_trait::async_trait;
use dashmap::DashMap;
use link_ipc::{Caller, IpcEndpoint, PeerId};
use link_types::{
    channels, ClusterId, ClusterStatus, ClusterStatusReport, FrameId, ResourceKind, WorkspaceId,
};
use link_watch::{ControlError, FrameRegistry, ResourceLister, WatchControl};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;

/// Point-in-time view of one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSnapshot {
    /// Cluster definition.
    pub cluster: Cluster,
    /// Current status.
    pub status: ClusterStatus,
    /// Most recent connection failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Frames showing the cluster.
    pub frames: Vec<FrameId>,
    /// Kinds with a running upstream watch.
    pub watches: Vec<ResourceKind>,
}

/// Registry of cluster sessions.
pub struct ClusterManager {
    sessions: DashMap<ClusterId, Arc<ClusterSession>>,
    frames: Arc<FrameRegistry>,
    endpoint: IpcEndpoint,
    connector: Arc<dyn ApiConnector>,
    metrics: Arc<HostMetrics>,
    settings: SessionSettings,
}

impl ClusterManager {
    /// Create a manager with no clusters, publishing on `endpoint`.
    pub fn new(
        endpoint: IpcEndpoint,
        connector: Arc<dyn ApiConnector>,
        settings: SessionSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            frames: FrameRegistry::new(),
            endpoint,
            connector,
            metrics: Arc::new(HostMetrics::default()),
            settings,
        })
    }

    /// Endpoint requests are served on.
    pub fn endpoint(&self) -> &IpcEndpoint {
        &self.endpoint
    }

    /// Authoritative frame table.
    pub fn frames(&self) -> &Arc<FrameRegistry> {
        &self.frames
    }

    /// Counters shared by every session.
    pub fn metrics(&self) -> &Arc<HostMetrics> {
        &self.metrics
    }

    // ===== Cluster registry =====

    /// Register `cluster`. It starts Disconnected.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::DuplicateCluster`] if the id is taken.
    pub fn add_cluster(&self, cluster: Cluster) -> HostResult<Arc<ClusterSession>> {
        match self.sessions.entry(cluster.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(HostError::DuplicateCluster(cluster.id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                tracing::info!(cluster = %cluster.id, name = %cluster.name, "cluster added");
                let session = ClusterSession::new(
                    cluster,
                    self.connector.clone(),
                    self.endpoint.clone(),
                    self.metrics.clone(),
                    self.settings.clone(),
                );
                slot.insert(session.clone());
                Ok(session)
            }
        }
    }

    /// Disconnect and forget `cluster_id`, dropping every frame showing it.
    pub fn remove_cluster(&self, cluster_id: &ClusterId) -> HostResult<Cluster> {
        let (_, session) = self
            .sessions
            .remove(cluster_id)
            .ok_or_else(|| HostError::UnknownCluster(cluster_id.clone()))?;
        session.disconnect();
        let frames = self.frames.remove_cluster(cluster_id);
        tracing::info!(cluster = %cluster_id, frames = frames.len(), "cluster removed");
        Ok(session.cluster().clone())
    }

    /// Session of `cluster_id`.
    pub fn session(&self, cluster_id: &ClusterId) -> HostResult<Arc<ClusterSession>> {
        self.sessions
            .get(cluster_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| HostError::UnknownCluster(cluster_id.clone()))
    }

    /// Registered cluster ids, sorted.
    pub fn cluster_ids(&self) -> Vec<ClusterId> {
        let mut ids: Vec<_> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Clusters grouped under `workspace`, sorted by id.
    pub fn clusters_in(&self, workspace: &WorkspaceId) -> Vec<Cluster> {
        let mut clusters: Vec<_> = self
            .sessions
            .iter()
            .filter(|e| &e.value().cluster().workspace == workspace)
            .map(|e| e.value().cluster().clone())
            .collect();
        clusters.sort_by(|a, b| a.id.cmp(&b.id));
        clusters
    }

    /// Status, frames and watches of every cluster, sorted by id.
    pub fn snapshot(&self) -> Vec<ClusterSnapshot> {
        let sessions: Vec<_> = self.sessions.iter().map(|e| e.value().clone()).collect();
        let mut snapshots: Vec<_> = sessions
            .into_iter()
            .map(|session| {
                let report = session.status_report();
                ClusterSnapshot {
                    cluster: session.cluster().clone(),
                    status: report.status,
                    last_error: report.last_error,
                    frames: self.frames.frames_for(session.id()),
                    watches: session.watched_kinds(),
                }
            })
            .collect();
        snapshots.sort_by(|a, b| a.cluster.id.cmp(&b.cluster.id));
        snapshots
    }

    // ===== Session operations =====

    /// Activate `cluster_id` and wait for the outcome.
    pub async fn activate(&self, cluster_id: &ClusterId) -> HostResult<ClusterStatusReport> {
        let session = self.session(cluster_id)?;
        session.activate().await?;
        Ok(session.status_report())
    }

    /// Disconnect `cluster_id`.
    pub fn disconnect(&self, cluster_id: &ClusterId) -> HostResult<ClusterStatusReport> {
        Ok(self.session(cluster_id)?.disconnect())
    }

    /// Current status of `cluster_id`.
    pub fn status(&self, cluster_id: &ClusterId) -> HostResult<ClusterStatusReport> {
        Ok(self.session(cluster_id)?.status_report())
    }

    /// Start or reuse the upstream watch for `kind` in `cluster_id`, held by
    /// `holder`.
    pub fn open_watch(
        &self,
        cluster_id: &ClusterId,
        kind: &ResourceKind,
        holder: Caller,
    ) -> HostResult<u64> {
        self.session(cluster_id)?.open_watch(kind, holder)
    }

    /// Release one of `holder`'s holds on the upstream watch for `kind` in
    /// `cluster_id`.
    pub fn close_watch(
        &self,
        cluster_id: &ClusterId,
        kind: &ResourceKind,
        holder: Caller,
    ) -> HostResult<bool> {
        Ok(self.session(cluster_id)?.close_watch(kind, holder))
    }

    /// Drop every watch hold of a display whose link went away. Returns how
    /// many upstream watches were stopped.
    pub fn release_display(&self, peer: PeerId) -> usize {
        let sessions: Vec<_> = self.sessions.iter().map(|e| e.value().clone()).collect();
        let stopped: usize = sessions
            .iter()
            .map(|session| session.release_holder(Caller::Peer(peer)))
            .sum();
        tracing::debug!(?peer, stopped, "display watches released");
        stopped
    }

    /// Every object of `kind` in `cluster_id`.
    pub async fn list(&self, cluster_id: &ClusterId, kind: &ResourceKind) -> HostResult<Vec<Value>> {
        self.session(cluster_id)?.list(kind).await
    }

    // ===== Request channels =====

    /// Answer every request channel on the manager's endpoint.
    ///
    /// # Errors
    ///
    /// Fails if a channel already has a handler.
    pub fn serve(self: &Arc<Self>) -> HostResult<()> {
        self.route(channels::CLUSTER_ACTIVATE, |manager, _, args| async move {
            let cluster_id: ClusterId = arg(&args, 0)?;
            Ok(json!(manager.activate(&cluster_id).await?))
        })?;
        self.route(channels::CLUSTER_DISCONNECT, |manager, _, args| async move {
            let cluster_id: ClusterId = arg(&args, 0)?;
            Ok(json!(manager.disconnect(&cluster_id)?))
        })?;
        self.route(channels::CLUSTER_STATUS_QUERY, |manager, _, args| async move {
            let cluster_id: ClusterId = arg(&args, 0)?;
            Ok(json!(manager.status(&cluster_id)?))
        })?;
        self.route(channels::WATCH_OPEN, |manager, caller, args| async move {
            let (cluster_id, kind) = watch_args(&args)?;
            Ok(json!(manager.open_watch(&cluster_id, &kind, caller)?))
        })?;
        self.route(channels::WATCH_CLOSE, |manager, caller, args| async move {
            let (cluster_id, kind) = watch_args(&args)?;
            Ok(json!(manager.close_watch(&cluster_id, &kind, caller)?))
        })?;
        self.route(channels::RESOURCE_LIST, |manager, _, args| async move {
            let (cluster_id, kind) = watch_args(&args)?;
            Ok(json!(manager.list(&cluster_id, &kind).await?))
        })?;
        self.frames.serve(&self.endpoint)?;

        let manager = Arc::downgrade(self);
        self.endpoint.on_detach(move |peer| {
            if let Some(manager) = manager.upgrade() {
                manager.release_display(peer);
            }
        });

        tracing::info!(endpoint = %self.endpoint.name(), "serving cluster requests");
        Ok(())
    }

    fn route<F, Fut>(self: &Arc<Self>, channel: &'static str, handler: F) -> HostResult<()>
    where
        F: Fn(Arc<ClusterManager>, Caller, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HostResult<Value>> + Send + 'static,
    {
        let manager = Arc::downgrade(self);
        self.endpoint.handle_with_caller(channel, move |caller, args| {
            let call = manager.upgrade().map(|manager| handler(manager, caller, args));
            async move {
                let Some(call) = call else {
                    return Err("cluster manager dropped".to_string());
                };
                call.await.map_err(|e| {
                    tracing::debug!(%channel, "request failed: {}", e);
                    e.to_string()
                })
            }
        })?;
        Ok(())
    }
}

fn arg<T: DeserializeOwned>(args: &[Value], index: usize) -> HostResult<T> {
    let value = args
        .get(index)
        .ok_or_else(|| HostError::InvalidRequest(format!("missing argument {index}")))?;
    serde_json::from_value(value.clone())
        .map_err(|e| HostError::InvalidRequest(format!("argument {index}: {e}")))
}

fn watch_args(args: &[Value]) -> HostResult<(ClusterId, ResourceKind)> {
    Ok((arg(args, 0)?, arg(args, 1)?))
}

#[async_trait]
impl WatchControl for ClusterManager {
    async fn open_watch(
        &self,
        cluster_id: &ClusterId,
        kind: &ResourceKind,
    ) -> Result<(), ControlError> {
        self.session(cluster_id)?.open_watch(kind, Caller::Local)?;
        Ok(())
    }

    async fn close_watch(
        &self,
        cluster_id: &ClusterId,
        kind: &ResourceKind,
    ) -> Result<(), ControlError> {
        self.session(cluster_id)?.close_watch(kind, Caller::Local);
        Ok(())
    }
}

#[async_trait]
impl ResourceLister for ClusterManager {
    async fn list(
        &self,
        cluster_id: &ClusterId,
        kind: &ResourceKind,
    ) -> Result<Vec<Value>, ControlError> {
        Ok(self.session(cluster_id)?.list(kind).await?)
    }
}

impl std::fmt::Debug for ClusterManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterManager")
            .field("endpoint", &self.endpoint.name())
            .field("clusters", &self.sessions.len())
            .field("frames", &self.frames.len())
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}
