//! # link-watch
//!
//! Display-side half of clusterlink: everything a display process needs to
//! keep per-kind stores in step with the clusters the connection-owning
//! process watches.
//!
//! - [`WatchMultiplexer`] - refcounted subscriptions, one upstream watch per
//!   (cluster, kind), ordered fan-out with bounded backlog
//! - [`FrameRegistry`] - which cluster each display frame shows
//! - [`ResourceStore`] - the contract stores implement; [`MemoryStore`] is the
//!   in-memory reference implementation
//! - [`RemoteControl`] - IPC client for the owner's request channels
//! - [`ClusterStatusBoard`] - observable cluster status

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod control;
pub mod error;
pub mod frames;
pub mod multiplexer;
pub mod status;
pub mod store;

pub use control::{RemoteControl, ResourceLister, WatchControl};
pub use error::{ControlError, StoreError, WatchError};
pub use frames::FrameRegistry;
pub use multiplexer::{
    MultiplexerConfig, MuxStats, ResyncReason, SubscribeOptions, Subscriber, Subscription,
    SubscriptionSet, WatchMultiplexer, WatchNotice, DEFAULT_BACKLOG_THRESHOLD,
};
pub use status::ClusterStatusBoard;
pub use store::{MemoryStore, ResourceStore};
