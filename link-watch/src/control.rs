//! Seams between the display side and the cluster sessions.
//!
//! [`WatchControl`] opens and closes upstream watches, [`ResourceLister`]
//! lists a kind for a full reload. In the owning process both are
//! implemented directly by the cluster manager; display processes use
//! [`RemoteControl`], which forwards every call over IPC.

use crate::error::ControlError;
use async_trait::async_trait;
use link_ipc::IpcEndpoint;
use link_types::{channels, ClusterId, ClusterStatusReport, FrameId, FrameRegistration, ResourceKind};
use serde_json::{json, Value};

/// Opens and closes upstream watches.
///
/// The multiplexer calls `open_watch` only on a 0→1 refcount transition and
/// `close_watch` only on 1→0.
#[async_trait]
pub trait WatchControl: Send + Sync {
    /// Start (or reuse) the upstream watch for `kind` in `cluster_id`.
    async fn open_watch(&self, cluster_id: &ClusterId, kind: &ResourceKind)
        -> Result<(), ControlError>;

    /// Stop the upstream watch for `kind` in `cluster_id`.
    async fn close_watch(
        &self,
        cluster_id: &ClusterId,
        kind: &ResourceKind,
    ) -> Result<(), ControlError>;
}

/// Lists every object of a kind.
#[async_trait]
pub trait ResourceLister: Send + Sync {
    /// Current objects of `kind` in `cluster_id`.
    async fn list(&self, cluster_id: &ClusterId, kind: &ResourceKind)
        -> Result<Vec<Value>, ControlError>;
}

/// IPC client for the owning process's request channels.
#[derive(Debug, Clone)]
pub struct RemoteControl {
    endpoint: IpcEndpoint,
}

impl RemoteControl {
    /// Send requests through `endpoint`.
    pub fn new(endpoint: IpcEndpoint) -> Self {
        Self { endpoint }
    }

    /// Endpoint the requests go through.
    pub fn endpoint(&self) -> &IpcEndpoint {
        &self.endpoint
    }

    /// Activate `cluster_id` and wait for the outcome.
    pub async fn activate(&self, cluster_id: &ClusterId) -> Result<ClusterStatusReport, ControlError> {
        Ok(self
            .endpoint
            .request_as(channels::CLUSTER_ACTIVATE, vec![json!(cluster_id)])
            .await?)
    }

    /// Disconnect `cluster_id`.
    pub async fn disconnect(&self, cluster_id: &ClusterId) -> Result<ClusterStatusReport, ControlError> {
        Ok(self
            .endpoint
            .request_as(channels::CLUSTER_DISCONNECT, vec![json!(cluster_id)])
            .await?)
    }

    /// Current status of `cluster_id`.
    pub async fn status(&self, cluster_id: &ClusterId) -> Result<ClusterStatusReport, ControlError> {
        Ok(self
            .endpoint
            .request_as(channels::CLUSTER_STATUS_QUERY, vec![json!(cluster_id)])
            .await?)
    }

    /// Tell the owning process that `frame_id` now shows `cluster_id`.
    pub async fn set_frame_id(&self, frame_id: FrameId, cluster_id: &ClusterId) -> Result<(), ControlError> {
        let registration = FrameRegistration {
            frame_id,
            cluster_id: cluster_id.clone(),
        };
        self.endpoint
            .request(channels::CLUSTER_SET_FRAME_ID, vec![json!(registration)])
            .await?;
        Ok(())
    }

    /// Tell the owning process that `frame_id` went away.
    pub async fn unset_frame_id(&self, frame_id: FrameId) -> Result<(), ControlError> {
        self.endpoint
            .request(channels::CLUSTER_UNSET_FRAME_ID, vec![json!(frame_id)])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl WatchControl for RemoteControl {
    async fn open_watch(
        &self,
        cluster_id: &ClusterId,
        kind: &ResourceKind,
    ) -> Result<(), ControlError> {
        self.endpoint
            .request(channels::WATCH_OPEN, vec![json!(cluster_id), json!(kind)])
            .await?;
        Ok(())
    }

    async fn close_watch(
        &self,
        cluster_id: &ClusterId,
        kind: &ResourceKind,
    ) -> Result<(), ControlError> {
        self.endpoint
            .request(channels::WATCH_CLOSE, vec![json!(cluster_id), json!(kind)])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ResourceLister for RemoteControl {
    async fn list(
        &self,
        cluster_id: &ClusterId,
        kind: &ResourceKind,
    ) -> Result<Vec<Value>, ControlError> {
        Ok(self
            .endpoint
            .request_as(channels::RESOURCE_LIST, vec![json!(cluster_id), json!(kind)])
            .await?)
    }
}
