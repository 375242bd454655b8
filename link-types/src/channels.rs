//! Channel names shared by both sides of the process boundary.
//!
//! Request channels are prefixed with `request:`; watch events travel on one
//! broadcast channel per resource kind.

use crate::error::WireError;
use crate::ids::ResourceKind;

const WATCH_PREFIX: &str = "cluster-watch:";
const WATCH_CONTROL_PREFIX: &str = "cluster-watch-control:";
const REQUEST_PREFIX: &str = "request:";

/// Broadcast channel carrying [`ClusterStatusReport`](crate::ClusterStatusReport)s.
pub const CLUSTER_STATUS: &str = "cluster-status";

/// Broadcast channel carrying [`FrameUpdate`](crate::FrameUpdate)s.
pub const CLUSTER_FRAME: &str = "cluster-frame";

/// Activate a cluster. Args: `[clusterId]`.
pub const CLUSTER_ACTIVATE: &str = "request:cluster-activate";

/// Disconnect a cluster. Args: `[clusterId]`.
pub const CLUSTER_DISCONNECT: &str = "request:cluster-disconnect";

/// Read a cluster's status report. Args: `[clusterId]`.
pub const CLUSTER_STATUS_QUERY: &str = "request:cluster-status";

/// Map a frame to a cluster. Args: `[{frameId, clusterId}]`.
pub const CLUSTER_SET_FRAME_ID: &str = "request:cluster-set-frame-id";

/// Drop a frame mapping. Args: `[frameId]`.
pub const CLUSTER_UNSET_FRAME_ID: &str = "request:cluster-unset-frame-id";

/// Open (or reuse) the upstream watch for a kind. Args: `[clusterId, kind]`.
pub const WATCH_OPEN: &str = "request:watch-open";

/// Close the upstream watch for a kind. Args: `[clusterId, kind]`.
pub const WATCH_CLOSE: &str = "request:watch-close";

/// List every object of a kind. Args: `[clusterId, kind]`.
pub const RESOURCE_LIST: &str = "request:resource-list";

/// Broadcast channel for watch events of `kind`.
pub fn watch(kind: &ResourceKind) -> String {
    format!("{WATCH_PREFIX}{kind}")
}

/// Broadcast channel for stream recovery signals of `kind`.
pub fn watch_control(kind: &ResourceKind) -> String {
    format!("{WATCH_CONTROL_PREFIX}{kind}")
}

/// Request channel for `name`.
pub fn request(name: &str) -> String {
    format!("{REQUEST_PREFIX}{name}")
}

/// Extract the resource kind from a watch channel name.
pub fn parse_watch(channel: &str) -> Result<ResourceKind, WireError> {
    match channel.strip_prefix(WATCH_PREFIX) {
        Some(kind) if !kind.is_empty() => Ok(ResourceKind::new(kind)),
        _ => Err(WireError::InvalidChannel(channel.to_string())),
    }
}

/// Whether `channel` is a request channel.
pub fn is_request(channel: &str) -> bool {
    channel.starts_with(REQUEST_PREFIX)
}
