//! Error types for the display side.

use link_core::{SubscriptionKey, TableError};
use link_ipc::IpcError;
use link_types::{ClusterId, ResourceKind};
use thiserror::Error;

/// Failure of a watch or cluster control call.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The cluster is not Ready.
    #[error("cluster {0} is not ready")]
    NotReady(ClusterId),

    /// No such cluster is registered.
    #[error("unknown cluster {0}")]
    UnknownCluster(ClusterId),

    /// The request could not be completed over IPC.
    #[error(transparent)]
    Ipc(#[from] IpcError),

    /// Any other failure reported by the session owner.
    #[error("{0}")]
    Other(String),
}

/// Failure of a store operation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Listing the kind failed.
    #[error("listing {kind} failed: {source}")]
    List {
        /// Kind being listed.
        kind: ResourceKind,
        /// Underlying failure.
        #[source]
        source: ControlError,
    },
}

/// Errors returned by the [`WatchMultiplexer`](crate::WatchMultiplexer).
#[derive(Debug, Error)]
pub enum WatchError {
    /// The subscriber already holds this subscription.
    #[error(transparent)]
    Table(#[from] TableError),

    /// Opening or closing the upstream watch failed.
    #[error("watch {key} failed: {source}")]
    Control {
        /// Entry the call was made for.
        key: SubscriptionKey,
        /// Underlying failure.
        #[source]
        source: ControlError,
    },

    /// The cluster went away while the watch was being opened.
    #[error("watch {key} was invalidated while opening")]
    Invalidated {
        /// Entry that was cleared.
        key: SubscriptionKey,
    },

    /// The subscriber's initial load failed; the subscription was released.
    #[error("preload of {key} failed: {source}")]
    Preload {
        /// Entry the load was made for.
        key: SubscriptionKey,
        /// Underlying failure.
        #[source]
        source: StoreError,
    },
}
