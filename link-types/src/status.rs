//! Cluster connection status as seen from outside the session.

use crate::ids::ClusterId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection lifecycle status of one cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClusterStatus {
    /// No upstream client
    #[default]
    Disconnected,
    /// Connection attempt in flight
    Activating,
    /// Upstream client open; watches may run
    Ready,
    /// Last attempt failed; waits for an explicit retry
    Error,
}

impl ClusterStatus {
    /// Whether watches of this cluster must be dropped on entering this status.
    pub fn invalidates_watches(&self) -> bool {
        matches!(self, ClusterStatus::Disconnected | ClusterStatus::Error)
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClusterStatus::Disconnected => "disconnected",
            ClusterStatus::Activating => "activating",
            ClusterStatus::Ready => "ready",
            ClusterStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// Payload of the `cluster-status` broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatusReport {
    /// Cluster the report is about
    pub cluster_id: ClusterId,
    /// Status after the transition
    pub status: ClusterStatus,
    /// Message of the most recent connection failure, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}
