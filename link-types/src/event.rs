//! Watch events as produced upstream and as broadcast to display processes.

use crate::ids::{ClusterId, ResourceKind, ResourceVersion};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Borrow;
use std::fmt;

/// The kind of change a watch event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchEventType {
    /// Object appeared
    Add,
    /// Object changed
    Update,
    /// Object disappeared
    Delete,
}

/// An event as delivered by the upstream watch stream, before it is scoped
/// to a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawWatchEvent {
    /// What happened
    #[serde(rename = "type")]
    pub event_type: WatchEventType,
    /// Object snapshot after the change (last known state for deletes)
    pub object: Value,
    /// Upstream version of this change
    pub resource_version: ResourceVersion,
}

impl RawWatchEvent {
    /// Scope this event to the cluster and kind it was watched from.
    pub fn scoped(self, cluster_id: ClusterId, kind: ResourceKind) -> WatchEvent {
        WatchEvent {
            cluster_id,
            kind,
            event_type: self.event_type,
            object: self.object,
            resource_version: self.resource_version,
        }
    }
}

/// A single change to one object of one kind in one cluster.
///
/// Serialized as `{clusterId, kind, type, object, resourceVersion}`, which is
/// the payload of the `cluster-watch:<kind>` broadcast channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchEvent {
    /// Cluster the event came from
    pub cluster_id: ClusterId,
    /// Resource kind
    pub kind: ResourceKind,
    /// What happened
    #[serde(rename = "type")]
    pub event_type: WatchEventType,
    /// Object snapshot
    pub object: Value,
    /// Upstream version of this change
    pub resource_version: ResourceVersion,
}

impl WatchEvent {
    /// Identity of the object this event is about, if its metadata carries one.
    pub fn object_key(&self) -> Option<ObjectKey> {
        ObjectKey::of(&self.object)
    }
}

/// Identity of a resource object within one kind.
///
/// Prefers `metadata.uid`; falls back to `namespace/name` (or just `name` for
/// cluster-scoped objects).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Derive the identity of an object snapshot.
    pub fn of(object: &Value) -> Option<Self> {
        let metadata = object.get("metadata")?;

        if let Some(uid) = metadata.get("uid").and_then(Value::as_str) {
            return Some(Self(uid.to_string()));
        }

        let name = metadata.get("name").and_then(Value::as_str)?;
        match metadata.get("namespace").and_then(Value::as_str) {
            Some(ns) => Some(Self(format!("{ns}/{name}"))),
            None => Some(Self(name.to_string())),
        }
    }

    /// Borrow the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Ordering and hashing follow the inner string, so maps keyed by ObjectKey
// can be queried with &str.
impl Borrow<str> for ObjectKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectKey({})", self.0)
    }
}
