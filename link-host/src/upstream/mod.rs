//! Upstream API client abstraction.
//!
//! The owning process talks to each cluster's API server through an
//! [`ApiClient`] opened by an [`ApiConnector`]. The real client lives outside
//! this crate; [`MockConnector`] drives tests.
//!
//! # Design
//!
//! - `connect()` opens a client for one cluster; sessions call it once per
//!   activation attempt
//! - `list()` returns every object of a kind
//! - `watch()` returns a stream of changes; the stream ending is a failure,
//!   not a normal shutdown

mod mock;

pub use mock::{MockApi, MockConnector};

use crate::cluster::Cluster;
use async_trait::async_trait;
use link_types::{RawWatchEvent, ResourceKind};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Upstream errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    /// The client could not be opened.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The watch stream ended.
    #[error("watch stream closed")]
    StreamClosed,

    /// The watch stream reported a failure.
    #[error("watch stream failed: {0}")]
    Stream(String),

    /// A list or watch request was rejected.
    #[error("request failed: {0}")]
    Request(String),
}

/// Changes of one kind, in upstream order.
pub type WatchStream = mpsc::Receiver<Result<RawWatchEvent, UpstreamError>>;

/// An open connection to one cluster's API server.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Every object of `kind`.
    async fn list(&self, kind: &ResourceKind) -> Result<Vec<Value>, UpstreamError>;

    /// Start a watch on `kind`.
    async fn watch(&self, kind: &ResourceKind) -> Result<WatchStream, UpstreamError>;
}

/// Opens [`ApiClient`]s.
#[async_trait]
pub trait ApiConnector: Send + Sync {
    /// Open a client for `cluster`.
    async fn connect(&self, cluster: &Cluster) -> Result<Arc<dyn ApiClient>, UpstreamError>;
}
