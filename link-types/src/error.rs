//! Error types for clusterlink wire handling.

use thiserror::Error;

/// Errors that can occur while encoding or decoding wire data.
#[derive(Debug, Error)]
pub enum WireError {
    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// A JSON payload did not match the expected shape
    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// A channel name did not follow the expected layout
    #[error("invalid channel: {0}")]
    InvalidChannel(String),
}
