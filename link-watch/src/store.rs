//! The store contract the multiplexer feeds, and an in-memory store.

use crate::control::ResourceLister;
use crate::error::StoreError;
use async_trait::async_trait;
use link_types::{ClusterId, ObjectKey, ResourceKind, WatchEvent, WatchEventType};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;

/// Cache of one resource kind, fed by the [`WatchMultiplexer`](crate::WatchMultiplexer).
///
/// `apply_watch_event` and `reset` are called from the multiplexer's drain
/// task and must not block.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Resource kind this store caches.
    fn kind(&self) -> &ResourceKind;

    /// Replace the cache with a fresh full listing.
    async fn reload_all(&self) -> Result<(), StoreError>;

    /// Upsert or delete the object the event is about.
    ///
    /// Applying the same event twice leaves the same state as applying it once.
    fn apply_watch_event(&self, event: &WatchEvent);

    /// Drop every cached object and mark the cache invalid.
    fn reset(&self);
}

/// [`ResourceStore`] holding objects in memory, keyed by [`ObjectKey`].
///
/// Every change bumps a revision number that consumers observe through
/// [`subscribe_changes`](Self::subscribe_changes).
pub struct MemoryStore {
    cluster_id: ClusterId,
    kind: ResourceKind,
    lister: Arc<dyn ResourceLister>,
    items: RwLock<BTreeMap<ObjectKey, Value>>,
    loaded: AtomicBool,
    invalid: AtomicBool,
    revision: watch::Sender<u64>,
}

impl MemoryStore {
    /// Create an empty store for `kind` in `cluster_id`, listing through `lister`.
    pub fn new(cluster_id: ClusterId, kind: ResourceKind, lister: Arc<dyn ResourceLister>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            cluster_id,
            kind,
            lister,
            items: RwLock::new(BTreeMap::new()),
            loaded: AtomicBool::new(false),
            invalid: AtomicBool::new(false),
            revision,
        }
    }

    /// Cluster whose objects this store holds.
    pub fn cluster_id(&self) -> &ClusterId {
        &self.cluster_id
    }

    /// Change signal: the value is bumped after every mutation.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Current revision.
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Snapshot of every cached object, ordered by key.
    pub fn items(&self) -> Vec<Value> {
        self.items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Object cached under `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Number of cached objects.
    pub fn len(&self) -> usize {
        self.items.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a full listing has completed since creation or the last reset.
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Whether the cache was reset and not reloaded since.
    pub fn is_invalid(&self) -> bool {
        self.invalid.load(Ordering::Acquire)
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    async fn reload_all(&self) -> Result<(), StoreError> {
        let objects = self
            .lister
            .list(&self.cluster_id, &self.kind)
            .await
            .map_err(|source| StoreError::List {
                kind: self.kind.clone(),
                source,
            })?;

        let mut fresh = BTreeMap::new();
        for object in objects {
            match ObjectKey::of(&object) {
                Some(key) => {
                    fresh.insert(key, object);
                }
                None => tracing::debug!(kind = %self.kind, "skipping listed object without identity"),
            }
        }

        let count = fresh.len();
        *self.items.write().unwrap_or_else(PoisonError::into_inner) = fresh;
        self.loaded.store(true, Ordering::Release);
        self.invalid.store(false, Ordering::Release);
        self.bump();
        tracing::debug!(cluster = %self.cluster_id, kind = %self.kind, count, "store reloaded");
        Ok(())
    }

    fn apply_watch_event(&self, event: &WatchEvent) {
        if event.cluster_id != self.cluster_id || event.kind != self.kind {
            return;
        }
        let Some(key) = event.object_key() else {
            tracing::debug!(kind = %self.kind, "ignoring event for object without identity");
            return;
        };

        {
            let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
            match event.event_type {
                WatchEventType::Add | WatchEventType::Update => {
                    items.insert(key, event.object.clone());
                }
                WatchEventType::Delete => {
                    items.remove(&key);
                }
            }
        }
        self.bump();
    }

    fn reset(&self) {
        self.items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.loaded.store(false, Ordering::Release);
        self.invalid.store(true, Ordering::Release);
        self.bump();
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("cluster_id", &self.cluster_id)
            .field("kind", &self.kind)
            .field("len", &self.len())
            .field("loaded", &self.is_loaded())
            .field("invalid", &self.is_invalid())
            .finish_non_exhaustive()
    }
}
