//! # link-host
//!
//! Connection-owning half of clusterlink.
//!
//! Exactly one process owns the upstream connection of every cluster. It
//! runs one [`ClusterSession`] per cluster, streams watch events to display
//! processes over [`link_ipc`] and answers their lifecycle requests.
//!
//! - [`ClusterManager`] - cluster registry, request channels, authoritative frame table
//! - [`ClusterSession`] - activation, watches and disconnect for one cluster
//! - [`upstream`] - API client seam plus [`MockConnector`] for tests
//! - [`Host`] - everything wired together from a [`Config`]
//! - [`http`] - `/health`, `/metrics` and `/clusters`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cluster;
pub mod config;
pub mod error;
pub mod host;
pub mod http;
pub mod idle;
pub mod logging;
pub mod manager;
pub mod metrics;
pub mod session;
pub mod upstream;

pub use cluster::Cluster;
pub use config::{Config, ConfigError};
pub use error::{HostError, HostResult};
pub use host::Host;
pub use manager::{ClusterManager, ClusterSnapshot};
pub use metrics::HostMetrics;
pub use session::{ClusterSession, SessionSettings};
pub use upstream::{ApiClient, ApiConnector, MockApi, MockConnector, UpstreamError};
