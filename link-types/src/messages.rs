//! IPC frames exchanged between the owning process and display processes.
//!
//! All frames are serialized using MessagePack for efficiency; payloads are
//! JSON values so handlers and listeners stay schema-agnostic.

use crate::error::WireError;
use crate::ids::{ClusterId, CorrelationId, FrameId, ResourceKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One unit on an IPC link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Correlated call to the handler of a channel
    Request(Request),
    /// Answer to a request, matched by correlation id
    Reply(Reply),
    /// Fire-and-forget message to every listener of a channel
    Broadcast(Broadcast),
}

impl Frame {
    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        rmp_serde::to_vec_named(self).map_err(WireError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        rmp_serde::from_slice(bytes).map_err(WireError::Deserialization)
    }

    /// Channel this frame addresses, if any (replies are routed by id).
    pub fn channel(&self) -> Option<&str> {
        match self {
            Frame::Request(req) => Some(&req.channel),
            Frame::Reply(_) => None,
            Frame::Broadcast(b) => Some(&b.channel),
        }
    }
}

/// Correlated call to a request channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id, echoed in the reply
    pub id: CorrelationId,
    /// Target channel (`request:<name>`)
    pub channel: String,
    /// Positional arguments
    pub args: Vec<Value>,
}

/// Answer to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Correlation id of the request being answered
    pub id: CorrelationId,
    /// Handler result
    pub outcome: ReplyOutcome,
}

/// Result carried by a [`Reply`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyOutcome {
    /// The handler returned a value
    Resolved(Value),
    /// The call failed on the responding side
    Rejected(RemoteFault),
}

/// Why a request failed on the responding side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFault {
    /// Failure category
    pub kind: FaultKind,
    /// Human-readable detail
    pub message: String,
}

impl RemoteFault {
    /// No handler is registered for the requested channel.
    pub fn not_handled(channel: &str) -> Self {
        Self {
            kind: FaultKind::NotHandled,
            message: format!("no handler for {channel}"),
        }
    }

    /// The handler ran and returned an error.
    pub fn handler_failed(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::HandlerFailed,
            message: message.into(),
        }
    }
}

/// Category of a [`RemoteFault`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// No handler registered
    NotHandled,
    /// Handler returned an error
    HandlerFailed,
}

/// Fire-and-forget message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Broadcast {
    /// Target channel
    pub channel: String,
    /// Channel-specific payload
    pub payload: Value,
}

/// Argument of the frame registration request: `{frameId, clusterId}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameRegistration {
    /// Frame being mapped
    pub frame_id: FrameId,
    /// Cluster the frame now shows
    pub cluster_id: ClusterId,
}

/// Payload of the `cluster-frame` broadcast: a frame was mapped or unmapped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameUpdate {
    /// Frame whose mapping changed
    pub frame_id: FrameId,
    /// New cluster, or `None` when the mapping was removed
    pub cluster_id: Option<ClusterId>,
}

/// Payload of the `cluster-watch-control:<kind>` broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchControlMessage {
    /// Cluster whose stream changed state
    pub cluster_id: ClusterId,
    /// Resource kind of the stream
    pub kind: ResourceKind,
    /// What subscribers must do
    pub signal: WatchSignal,
}

/// Stream recovery signal for subscribers of one (cluster, kind).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WatchSignal {
    /// The stream restarted; cached state must be fully reloaded
    Resync {
        /// Recovery attempt number (1-based)
        attempt: u32,
    },
    /// Recovery gave up; the kind receives no further events
    Unavailable {
        /// Last stream error
        reason: String,
    },
}
