//! Error types for the connection-owning process.

use crate::config::ConfigError;
use crate::upstream::UpstreamError;
use link_ipc::IpcError;
use link_types::{ClusterId, ResourceKind};
use link_watch::ControlError;
use thiserror::Error;

/// Errors that can occur in the owning process.
#[derive(Debug, Error)]
pub enum HostError {
    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Opening the upstream client failed; the cluster is in Error.
    #[error("connection to {cluster} failed: {message}")]
    Connection {
        /// Cluster that failed to connect.
        cluster: ClusterId,
        /// Failure reported for the attempt.
        message: String,
    },

    /// No cluster with this id is registered.
    #[error("unknown cluster {0}")]
    UnknownCluster(ClusterId),

    /// A cluster with this id is already registered.
    #[error("cluster {0} is already registered")]
    DuplicateCluster(ClusterId),

    /// The operation needs a Ready session.
    #[error("cluster {0} is not ready")]
    NotReady(ClusterId),

    /// `disconnect()` abandoned the activation this caller was waiting on.
    #[error("cluster {0} was disconnected before activation completed")]
    Disconnected(ClusterId),

    /// An upstream call other than connecting failed.
    #[error("{kind} in {cluster}: {source}")]
    Upstream {
        /// Cluster the call was made against.
        cluster: ClusterId,
        /// Kind the call was made for.
        kind: ResourceKind,
        /// Underlying failure.
        #[source]
        source: UpstreamError,
    },

    /// A request arrived with missing or malformed arguments.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// IPC transport failure.
    #[error(transparent)]
    Ipc(#[from] IpcError),

    /// I/O failure, e.g. binding the HTTP listener.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The tracing subscriber could not be installed.
    #[error("logging setup failed: {0}")]
    Logging(String),
}

/// Result type alias for owning-process operations.
pub type HostResult<T> = std::result::Result<T, HostError>;

impl From<HostError> for ControlError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::NotReady(cluster) => ControlError::NotReady(cluster),
            HostError::UnknownCluster(cluster) => ControlError::UnknownCluster(cluster),
            HostError::Ipc(e) => ControlError::Ipc(e),
            other => ControlError::Other(other.to_string()),
        }
    }
}
