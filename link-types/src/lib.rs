//! # link-types
//!
//! Wire format types for clusterlink live cluster state sync.
//!
//! This crate provides the foundational types shared by every clusterlink crate:
//! - [`ClusterId`], [`FrameId`], [`ResourceKind`], [`ResourceVersion`] - Identity and ordering types
//! - [`WatchEvent`] - A single upstream change, as broadcast to display processes
//! - [`Frame`] - IPC frames (request, reply, broadcast)
//! - [`ClusterStatus`] - Connection lifecycle status reported to presentation
//! - [`channels`] - Channel naming shared by both sides of the process boundary
//! - [`WireError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channels;
mod error;
mod event;
mod ids;
mod messages;
mod status;

pub use error::WireError;
pub use event::{ObjectKey, RawWatchEvent, WatchEvent, WatchEventType};
pub use ids::{
    ClusterId, CorrelationId, FrameId, ResourceKind, ResourceVersion, SubscriberId, WorkspaceId,
};
pub use messages::{
    Broadcast, FaultKind, Frame, FrameRegistration, FrameUpdate, RemoteFault, Reply, ReplyOutcome,
    Request, WatchControlMessage, WatchSignal,
};
pub use status::{ClusterStatus, ClusterStatusReport};
