//! # link-ipc
//!
//! Request/broadcast transport between the connection-owning process and
//! display processes.
//!
//! ## Architecture
//!
//! ```text
//!  display process                         owning process
//! ┌────────────────────┐   Link (frames)  ┌────────────────────┐
//! │ IpcEndpoint        │◄────────────────►│ IpcEndpoint        │
//! │  request() ────────┼── Request ──────►│  handle(channel)   │
//! │  PendingRequests ◄─┼── Reply ─────────┤                    │
//! │  listeners ◄───────┼── Broadcast ─────┤  broadcast()       │
//! └────────────────────┘                  └────────────────────┘
//! ```
//!
//! - [`IpcEndpoint`] - handlers, listeners, pending requests, attached links
//! - [`Link`] - one ordered frame connection ([`MemoryLink`], [`StreamLink`])
//! - [`PendingRequests`] - correlation-id table with timeout eviction

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod endpoint;
pub mod error;
pub mod link;
pub mod pending;

pub use endpoint::{
    BroadcastSubscription, Caller, HandlerFuture, HandlerResult, IpcConfig, IpcEndpoint, PeerId,
};
pub use error::{IpcError, IpcResult};
pub use link::{Link, LinkError, MemoryLink, StreamLink, MAX_FRAME_SIZE};
pub use pending::PendingRequests;
