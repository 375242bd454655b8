//! Which cluster each display frame currently shows.
//!
//! The owning process keeps the authoritative table: [`FrameRegistry::serve`]
//! answers the set/unset request channels and publishes every change on
//! `cluster-frame`. Display processes keep a [`FrameRegistry::mirror`] that
//! follows those broadcasts, so event scoping never needs a round trip.
//!
//! Changes are published in the order they were applied to the table, so a
//! mirror converges on the owner's state even under concurrent writers.

use link_core::{FrameTable, Unregistered};
use link_ipc::{BroadcastSubscription, IpcEndpoint, IpcResult};
use link_types::{channels, ClusterId, FrameId, FrameRegistration, FrameUpdate};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock, Weak};

/// Shared frameId → clusterId map.
pub struct FrameRegistry {
    table: RwLock<FrameTable>,
    /// Held from table change to publish
    publishing: Mutex<()>,
    publisher: OnceLock<IpcEndpoint>,
    mirror: Mutex<Option<BroadcastSubscription>>,
}

impl FrameRegistry {
    /// Create an empty registry that publishes nothing.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            table: RwLock::new(FrameTable::new()),
            publishing: Mutex::new(()),
            publisher: OnceLock::new(),
            mirror: Mutex::new(None),
        })
    }

    /// Create a registry that follows the owning process's `cluster-frame`
    /// broadcasts on `endpoint`.
    pub fn mirror(endpoint: &IpcEndpoint) -> Arc<Self> {
        let registry = Self::new();
        let weak = Arc::downgrade(&registry);
        let subscription = endpoint.subscribe_to_broadcast(channels::CLUSTER_FRAME, move |payload| {
            let Some(registry) = weak.upgrade() else {
                return;
            };
            match serde_json::from_value::<FrameUpdate>(payload.clone()) {
                Ok(update) => registry.apply(update),
                Err(e) => tracing::warn!("ignoring malformed frame update: {}", e),
            }
        });
        *registry.mirror.lock().unwrap_or_else(PoisonError::into_inner) = Some(subscription);
        registry
    }

    /// Serve the frame request channels on `endpoint` and publish every
    /// change to it.
    pub fn serve(self: &Arc<Self>, endpoint: &IpcEndpoint) -> IpcResult<()> {
        if self.publisher.set(endpoint.clone()).is_err() {
            tracing::warn!("frame registry already publishing; keeping the first endpoint");
        }

        let weak = Arc::downgrade(self);
        endpoint.handle(channels::CLUSTER_SET_FRAME_ID, move |args| {
            let registry = weak.clone();
            async move {
                let registration: FrameRegistration = first_arg(args)?;
                let previous = upgrade(&registry)?
                    .register(registration.frame_id, registration.cluster_id);
                Ok(json!(previous))
            }
        })?;

        let weak = Arc::downgrade(self);
        endpoint.handle(channels::CLUSTER_UNSET_FRAME_ID, move |args| {
            let registry = weak.clone();
            async move {
                let frame_id: FrameId = first_arg(args)?;
                let removed = upgrade(&registry)?.unregister(frame_id);
                Ok(json!(removed.map(|r| r.cluster_id)))
            }
        })?;
        Ok(())
    }

    /// Map `frame_id` to `cluster_id`, replacing any previous mapping.
    pub fn register(&self, frame_id: FrameId, cluster_id: ClusterId) -> Option<ClusterId> {
        let _order = self.publishing();
        let previous = self.write().register(frame_id, cluster_id.clone());
        tracing::debug!(frame = %frame_id, cluster = %cluster_id, ?previous, "frame registered");
        self.publish(frame_id, Some(cluster_id));
        previous
    }

    /// Cluster currently shown by `frame_id`.
    pub fn resolve(&self, frame_id: FrameId) -> Option<ClusterId> {
        self.read().resolve(frame_id).cloned()
    }

    /// Remove the mapping of `frame_id`.
    ///
    /// An idle cluster is reported, never disconnected.
    pub fn unregister(&self, frame_id: FrameId) -> Option<Unregistered> {
        let _order = self.publishing();
        let removed = self.write().unregister(frame_id)?;
        if removed.cluster_idle {
            tracing::debug!(cluster = %removed.cluster_id, "no frame shows cluster any more");
        }
        self.publish(frame_id, None);
        Some(removed)
    }

    /// Frames showing `cluster_id`.
    pub fn frames_for(&self, cluster_id: &ClusterId) -> Vec<FrameId> {
        self.read().frames_for(cluster_id)
    }

    /// Drop every frame showing `cluster_id`.
    pub fn remove_cluster(&self, cluster_id: &ClusterId) -> Vec<FrameId> {
        let _order = self.publishing();
        let frames = self.write().remove_cluster(cluster_id);
        for frame in &frames {
            self.publish(*frame, None);
        }
        frames
    }

    /// Whether no frame shows `cluster_id`.
    pub fn is_idle(&self, cluster_id: &ClusterId) -> bool {
        self.read().is_idle(cluster_id)
    }

    /// Number of mapped frames.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no frame is mapped.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn apply(&self, update: FrameUpdate) {
        let mut table = self.write();
        match update.cluster_id {
            Some(cluster_id) => {
                table.register(update.frame_id, cluster_id);
            }
            None => {
                table.unregister(update.frame_id);
            }
        }
    }

    fn publish(&self, frame_id: FrameId, cluster_id: Option<ClusterId>) {
        let Some(endpoint) = self.publisher.get() else {
            return;
        };
        match serde_json::to_value(FrameUpdate {
            frame_id,
            cluster_id,
        }) {
            Ok(payload) => endpoint.broadcast(channels::CLUSTER_FRAME, payload),
            Err(e) => tracing::warn!(frame = %frame_id, "could not encode frame update: {}", e),
        }
    }

    fn publishing(&self) -> MutexGuard<'_, ()> {
        self.publishing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, FrameTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, FrameTable> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for FrameRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameRegistry")
            .field("frames", &self.len())
            .field("publishing", &self.publisher.get().is_some())
            .finish_non_exhaustive()
    }
}

fn first_arg<T: serde::de::DeserializeOwned>(args: Vec<Value>) -> Result<T, String> {
    let value = args.into_iter().next().ok_or("missing argument")?;
    serde_json::from_value(value).map_err(|e| format!("invalid argument: {e}"))
}

fn upgrade(registry: &Weak<FrameRegistry>) -> Result<Arc<FrameRegistry>, String> {
    registry
        .upgrade()
        .ok_or_else(|| "frame registry dropped".to_string())
}
