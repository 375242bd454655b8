//! Error types for the IPC transport.

use crate::link::LinkError;
use link_types::WireError;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by [`IpcEndpoint`](crate::IpcEndpoint) operations.
#[derive(Debug, Error)]
pub enum IpcError {
    /// No reply arrived before the deadline.
    #[error("request to {channel} timed out after {after:?}")]
    Timeout {
        /// Target channel.
        channel: String,
        /// Configured timeout.
        after: Duration,
    },

    /// No handler is registered for the channel.
    #[error("no handler registered for {channel}")]
    NotHandled {
        /// Target channel.
        channel: String,
    },

    /// A handler is already registered for the channel.
    #[error("handler already registered for {channel}")]
    AlreadyHandled {
        /// Channel of the rejected registration.
        channel: String,
    },

    /// The handler ran and failed.
    #[error("{channel} failed: {message}")]
    Remote {
        /// Target channel.
        channel: String,
        /// Error reported by the handler.
        message: String,
    },

    /// The link to the owning process is gone.
    #[error("link to owning process closed")]
    LinkClosed,

    /// Link-level failure.
    #[error(transparent)]
    Link(#[from] LinkError),

    /// Frame encoding failure.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// A reply payload did not have the expected shape.
    #[error("unexpected reply payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl IpcError {
    /// Whether the error is a request timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, IpcError::Timeout { .. })
    }
}

/// Result type for IPC operations.
pub type IpcResult<T> = std::result::Result<T, IpcError>;
