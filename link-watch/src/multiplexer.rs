//! Refcounted watch subscriptions with ordered fan-out.
//!
//! ## Lifecycle of an entry
//!
//! ```text
//! subscribe ──► table.subscribe ──Opened──► queue + listeners ──► open_watch
//!                      │
//!                      └─Joined──► (nothing upstream)
//!
//! release ──► table.unsubscribe ──Closed──► retire queue ──► close_watch
//!
//! cluster-status Disconnected/Error ──► clear_cluster ──► store.reset()
//! ```
//!
//! Subscribe and release of one (cluster, kind) are serialized by a per-key
//! async gate, so `open_watch` and `close_watch` calls for a key never
//! overlap and match the 0→1 and 1→0 transitions one for one.
//!
//! Events arrive on `cluster-watch:<kind>` and are pushed into a bounded
//! [`Backlog`] per (cluster, kind). A drain task per entry applies them to
//! the subscribed stores in arrival order. If the backlog overflows, it is
//! discarded and every subscribed store reloads before new events apply.

use crate::control::WatchControl;
use crate::error::WatchError;
use crate::frames::FrameRegistry;
use crate::store::ResourceStore;
use link_core::{
    Backlog, PushOutcome, SubscriptionKey, SubscriptionTable, SubscriptionToken, TableError,
    Transition,
};
use link_ipc::{BroadcastSubscription, IpcEndpoint};
use link_types::{
    channels, ClusterId, ClusterStatus, ClusterStatusReport, FrameId, ResourceKind, SubscriberId,
    WatchControlMessage, WatchEvent, WatchSignal,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{broadcast, Notify};

/// Default number of queued events per (cluster, kind) before a forced reload.
pub const DEFAULT_BACKLOG_THRESHOLD: usize = 1024;

const NOTICE_CAPACITY: usize = 64;

/// Multiplexer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiplexerConfig {
    /// Queued events per (cluster, kind) before the queue is discarded.
    pub backlog_threshold: usize,
}

impl MultiplexerConfig {
    /// Set the backlog threshold.
    pub fn with_backlog_threshold(mut self, threshold: usize) -> Self {
        self.backlog_threshold = threshold;
        self
    }
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            backlog_threshold: DEFAULT_BACKLOG_THRESHOLD,
        }
    }
}

/// One consumer of a (cluster, kind) entry.
#[derive(Clone)]
pub struct Subscriber {
    /// Identity within the entry.
    pub id: SubscriberId,
    /// Display frame the store belongs to; events apply only while the
    /// frame shows the event's cluster.
    pub frame_id: FrameId,
    /// Store the events are applied to.
    pub store: Arc<dyn ResourceStore>,
}

impl Subscriber {
    /// Subscriber with a fresh id.
    pub fn new(frame_id: FrameId, store: Arc<dyn ResourceStore>) -> Self {
        Self {
            id: SubscriberId::new(),
            frame_id,
            store,
        }
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("frame_id", &self.frame_id)
            .field("kind", self.store.kind())
            .finish()
    }
}

/// Per-subscriber options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Run the store's `reload_all` once the watch is open.
    pub preload: bool,
}

impl SubscribeOptions {
    /// Options with preload enabled.
    pub fn preload() -> Self {
        Self { preload: true }
    }
}

/// Why subscribed stores were told to reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResyncReason {
    /// The inbound backlog overflowed.
    Backlog {
        /// Events thrown away.
        discarded: usize,
    },
    /// The upstream stream was restarted by the session owner.
    StreamRestarted {
        /// Recovery attempt number.
        attempt: u32,
    },
}

/// Non-fatal condition reported to whoever watches the multiplexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchNotice {
    /// Subscribed stores of an entry were reloaded.
    Resynced {
        /// Entry that was reloaded.
        key: SubscriptionKey,
        /// What triggered the reload.
        reason: ResyncReason,
    },
    /// A store failed to reload during a resync.
    ReloadFailed {
        /// Entry being reloaded.
        key: SubscriptionKey,
        /// Subscriber whose store failed.
        subscriber: SubscriberId,
        /// Failure detail.
        message: String,
    },
    /// Stream recovery gave up; the entry receives no further events.
    Unavailable {
        /// Affected entry.
        key: SubscriptionKey,
        /// Last stream error.
        reason: String,
    },
    /// Every entry of a cluster was dropped and its stores reset.
    Invalidated {
        /// Cluster that left Ready.
        cluster_id: ClusterId,
        /// Status that triggered the invalidation.
        status: ClusterStatus,
    },
}

/// Counters since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MuxStats {
    /// Watch events received.
    pub events_received: u64,
    /// Events with no live entry.
    pub events_dropped: u64,
    /// Events drained to subscribers.
    pub events_applied: u64,
    /// Backlog overflows.
    pub overflows: u64,
    /// Completed resyncs.
    pub resyncs: u64,
    /// Cluster invalidations.
    pub invalidations: u64,
}

#[derive(Default)]
struct Counters {
    events_received: AtomicU64,
    events_dropped: AtomicU64,
    events_applied: AtomicU64,
    overflows: AtomicU64,
    resyncs: AtomicU64,
    invalidations: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> MuxStats {
        MuxStats {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            events_applied: self.events_applied.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

/// Inbound queue of one entry, drained by its own task.
struct KindQueue {
    key: SubscriptionKey,
    backlog: Mutex<Backlog<WatchEvent>>,
    resync: Mutex<Option<ResyncReason>>,
    wake: Notify,
    closed: AtomicBool,
}

impl KindQueue {
    fn new(key: SubscriptionKey, threshold: usize) -> Self {
        Self {
            key,
            backlog: Mutex::new(Backlog::new(threshold)),
            resync: Mutex::new(None),
            wake: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn backlog(&self) -> MutexGuard<'_, Backlog<WatchEvent>> {
        self.backlog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn request_resync(&self, reason: ResyncReason) {
        *self.resync.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason);
        self.wake.notify_one();
    }

    fn take_resync(&self) -> Option<ResyncReason> {
        self.resync
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.wake.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Broadcast listeners shared by every entry of one kind.
struct KindListeners {
    keys: usize,
    _events: BroadcastSubscription,
    _control: BroadcastSubscription,
}

struct MuxInner {
    endpoint: IpcEndpoint,
    control: Arc<dyn WatchControl>,
    frames: Arc<FrameRegistry>,
    config: MultiplexerConfig,
    table: Mutex<SubscriptionTable<Subscriber>>,
    gates: Mutex<HashMap<SubscriptionKey, Arc<tokio::sync::Mutex<()>>>>,
    queues: Mutex<HashMap<SubscriptionKey, Arc<KindQueue>>>,
    kinds: Mutex<HashMap<ResourceKind, KindListeners>>,
    unavailable: Mutex<HashSet<SubscriptionKey>>,
    notices: broadcast::Sender<WatchNotice>,
    counters: Counters,
    status_listener: Mutex<Option<BroadcastSubscription>>,
}

/// Deduplicates upstream watches and fans events out to stores.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct WatchMultiplexer {
    inner: Arc<MuxInner>,
}

impl WatchMultiplexer {
    /// Create a multiplexer receiving broadcasts on `endpoint`, opening and
    /// closing watches through `control` and scoping delivery with `frames`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        endpoint: IpcEndpoint,
        control: Arc<dyn WatchControl>,
        frames: Arc<FrameRegistry>,
        config: MultiplexerConfig,
    ) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let inner = Arc::new(MuxInner {
            endpoint,
            control,
            frames,
            config,
            table: Mutex::new(SubscriptionTable::new()),
            gates: Mutex::new(HashMap::new()),
            queues: Mutex::new(HashMap::new()),
            kinds: Mutex::new(HashMap::new()),
            unavailable: Mutex::new(HashSet::new()),
            notices,
            counters: Counters::default(),
            status_listener: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let listener = inner
            .endpoint
            .subscribe_to_broadcast(channels::CLUSTER_STATUS, move |payload| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                match serde_json::from_value::<ClusterStatusReport>(payload.clone()) {
                    Ok(report) if report.status.invalidates_watches() => {
                        inner.invalidate(&report.cluster_id, report.status)
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!("ignoring malformed status report: {}", e),
                }
            });
        *inner
            .status_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);

        Self { inner }
    }

    /// Register `subscriber` for `kind` events of `cluster_id`.
    ///
    /// The first subscriber of a (cluster, kind) opens the upstream watch;
    /// later ones join it. With `options.preload` the subscriber's store
    /// reloads once the watch is open. Dropping or releasing the returned
    /// [`Subscription`] leaves the entry, and the last one out closes the
    /// watch.
    pub async fn subscribe(
        &self,
        cluster_id: ClusterId,
        kind: ResourceKind,
        subscriber: Subscriber,
        options: SubscribeOptions,
    ) -> Result<Subscription, WatchError> {
        let inner = &self.inner;
        let key = SubscriptionKey::new(cluster_id, kind);
        let store = subscriber.store.clone();
        let subscriber_id = subscriber.id;

        let held = inner.hold_gate(&key).await;

        let (token, transition) = inner.join(&key, subscriber)?;
        tracing::debug!(%key, subscriber = %subscriber_id, ?transition, "subscribed");

        if transition == Transition::Opened {
            if let Err(source) = inner.control.open_watch(&key.cluster_id, &key.kind).await {
                tracing::warn!(%key, "opening watch failed: {}", source);
                inner.leave(token);
                return Err(WatchError::Control { key, source });
            }
            if !inner.is_live(token) {
                if let Err(e) = inner.control.close_watch(&key.cluster_id, &key.kind).await {
                    tracing::debug!(%key, "closing watch of invalidated entry failed: {}", e);
                }
                return Err(WatchError::Invalidated { key });
            }
            tracing::info!(%key, "upstream watch opened");
        }
        drop(held);

        let subscription = Subscription {
            inner: Arc::downgrade(inner),
            key: key.clone(),
            token,
            released: AtomicBool::new(false),
        };

        if options.preload {
            if let Err(source) = store.reload_all().await {
                tracing::warn!(%key, subscriber = %subscriber_id, "preload failed: {}", source);
                if let Err(e) = subscription.release().await {
                    tracing::debug!(%key, "releasing after failed preload: {}", e);
                }
                return Err(WatchError::Preload { key, source });
            }
        }
        Ok(subscription)
    }

    /// Subscribe several stores of one frame at once.
    ///
    /// Either every store is subscribed or none is.
    pub async fn subscribe_stores(
        &self,
        cluster_id: &ClusterId,
        frame_id: FrameId,
        stores: Vec<Arc<dyn ResourceStore>>,
        options: SubscribeOptions,
    ) -> Result<SubscriptionSet, WatchError> {
        let mut subscriptions = Vec::with_capacity(stores.len());
        for store in stores {
            let kind = store.kind().clone();
            let subscriber = Subscriber::new(frame_id, store);
            match self
                .subscribe(cluster_id.clone(), kind, subscriber, options)
                .await
            {
                Ok(subscription) => subscriptions.push(subscription),
                Err(e) => {
                    for subscription in &subscriptions {
                        if let Err(release) = subscription.release().await {
                            tracing::debug!("rolling back batch subscription: {}", release);
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(SubscriptionSet { subscriptions })
    }

    /// Queue `event` for the subscribers of its (cluster, kind).
    ///
    /// Events arriving on `cluster-watch:<kind>` take this path; calling it
    /// directly is equivalent.
    pub fn dispatch(&self, event: WatchEvent) {
        self.inner.dispatch(event);
    }

    /// Drop every entry of `cluster_id` and reset its stores, as if the
    /// cluster had reported `Disconnected`.
    pub fn invalidate_cluster(&self, cluster_id: &ClusterId) {
        self.inner.invalidate(cluster_id, ClusterStatus::Disconnected);
    }

    /// Reference count of (cluster, kind).
    pub fn subscriber_count(&self, cluster_id: &ClusterId, kind: &ResourceKind) -> usize {
        let key = SubscriptionKey::new(cluster_id.clone(), kind.clone());
        self.inner.table().count(&key)
    }

    /// Whether (cluster, kind) has subscribers.
    pub fn is_watching(&self, cluster_id: &ClusterId, kind: &ResourceKind) -> bool {
        self.subscriber_count(cluster_id, kind) > 0
    }

    /// Whether stream recovery gave up on (cluster, kind).
    pub fn is_unavailable(&self, cluster_id: &ClusterId, kind: &ResourceKind) -> bool {
        let key = SubscriptionKey::new(cluster_id.clone(), kind.clone());
        self.inner.unavailable().contains(&key)
    }

    /// Entries with at least one subscriber, sorted.
    pub fn watched_keys(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<_> = self.inner.table().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Receiver of non-fatal notices.
    pub fn notices(&self) -> broadcast::Receiver<WatchNotice> {
        self.inner.notices.subscribe()
    }

    /// Counters since creation.
    pub fn stats(&self) -> MuxStats {
        self.inner.counters.snapshot()
    }

    /// Registry used to scope delivery.
    pub fn frames(&self) -> &Arc<FrameRegistry> {
        &self.inner.frames
    }
}

impl std::fmt::Debug for WatchMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchMultiplexer")
            .field("entries", &self.inner.table().len())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl MuxInner {
    fn table(&self) -> MutexGuard<'_, SubscriptionTable<Subscriber>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn queues(&self) -> MutexGuard<'_, HashMap<SubscriptionKey, Arc<KindQueue>>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn kinds(&self) -> MutexGuard<'_, HashMap<ResourceKind, KindListeners>> {
        self.kinds.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unavailable(&self) -> MutexGuard<'_, HashSet<SubscriptionKey>> {
        self.unavailable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn gates(&self) -> MutexGuard<'_, HashMap<SubscriptionKey, Arc<tokio::sync::Mutex<()>>>> {
        self.gates.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serialize open/close work on `key` until the hold is dropped.
    async fn hold_gate(&self, key: &SubscriptionKey) -> GateHold<'_> {
        let gate = self.gates().entry(key.clone()).or_default().clone();
        GateHold {
            inner: self,
            key: key.clone(),
            guard: Some(gate.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn gate_count(&self) -> usize {
        self.gates().len()
    }

    fn queue(&self, key: &SubscriptionKey) -> Option<Arc<KindQueue>> {
        self.queues().get(key).cloned()
    }

    fn is_live(&self, token: SubscriptionToken) -> bool {
        self.table().is_live(token)
    }

    fn notify(&self, notice: WatchNotice) {
        // No receivers is fine
        let _ = self.notices.send(notice);
    }

    fn subscribers(&self, key: &SubscriptionKey) -> Vec<Subscriber> {
        self.table().subscribers(key).cloned().collect()
    }

    /// Add a subscriber; on 0→1 install the entry's queue and listeners.
    fn join(
        self: &Arc<Self>,
        key: &SubscriptionKey,
        subscriber: Subscriber,
    ) -> Result<(SubscriptionToken, Transition), TableError> {
        let mut table = self.table();
        let (token, transition) = table.subscribe(key.clone(), subscriber.id, subscriber)?;
        if transition == Transition::Opened {
            self.install(key);
        }
        Ok((token, transition))
    }

    /// Remove a subscription; on 1→0 retire the entry.
    fn leave(&self, token: SubscriptionToken) -> Option<Transition> {
        let mut table = self.table();
        let (key, transition) = table.unsubscribe(token)?;
        let retired = match transition {
            Transition::Closed => self.retire(&key),
            _ => None,
        };
        drop(table);
        drop(retired);
        tracing::debug!(%key, ?transition, "unsubscribed");
        Some(transition)
    }

    async fn release(&self, key: &SubscriptionKey, token: SubscriptionToken) -> Result<(), WatchError> {
        let _held = self.hold_gate(key).await;

        match self.leave(token) {
            None => {
                tracing::debug!(%key, "subscription already invalidated");
                Ok(())
            }
            Some(Transition::Closed) => {
                self.control
                    .close_watch(&key.cluster_id, &key.kind)
                    .await
                    .map_err(|source| WatchError::Control {
                        key: key.clone(),
                        source,
                    })?;
                tracing::info!(%key, "upstream watch closed");
                Ok(())
            }
            Some(_) => Ok(()),
        }
    }

    fn install(self: &Arc<Self>, key: &SubscriptionKey) {
        let queue = Arc::new(KindQueue::new(key.clone(), self.config.backlog_threshold));
        tokio::spawn(drain_loop(Arc::downgrade(self), queue.clone()));
        if let Some(stale) = self.queues().insert(key.clone(), queue) {
            stale.close();
        }
        self.unavailable().remove(key);

        let mut kinds = self.kinds();
        if let Some(listeners) = kinds.get_mut(&key.kind) {
            listeners.keys += 1;
            return;
        }

        let weak = Arc::downgrade(self);
        let events = self
            .endpoint
            .subscribe_to_broadcast(channels::watch(&key.kind), move |payload| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                match serde_json::from_value::<WatchEvent>(payload.clone()) {
                    Ok(event) => inner.dispatch(event),
                    Err(e) => tracing::warn!("ignoring malformed watch event: {}", e),
                }
            });

        let weak = Arc::downgrade(self);
        let control = self
            .endpoint
            .subscribe_to_broadcast(channels::watch_control(&key.kind), move |payload| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                match serde_json::from_value::<WatchControlMessage>(payload.clone()) {
                    Ok(message) => inner.on_control(message),
                    Err(e) => tracing::warn!("ignoring malformed watch control message: {}", e),
                }
            });

        tracing::debug!(kind = %key.kind, "listening for watch events");
        kinds.insert(
            key.kind.clone(),
            KindListeners {
                keys: 1,
                _events: events,
                _control: control,
            },
        );
    }

    /// Tear down an entry's queue. Returns the kind's listeners when no
    /// entry of that kind remains; the caller drops them after unlocking.
    fn retire(&self, key: &SubscriptionKey) -> Option<KindListeners> {
        if let Some(queue) = self.queues().remove(key) {
            queue.close();
        }
        self.unavailable().remove(key);

        let mut kinds = self.kinds();
        let listeners = kinds.get_mut(&key.kind)?;
        listeners.keys = listeners.keys.saturating_sub(1);
        if listeners.keys == 0 {
            tracing::debug!(kind = %key.kind, "no entries left for kind");
            return kinds.remove(&key.kind);
        }
        None
    }

    fn invalidate(&self, cluster_id: &ClusterId, status: ClusterStatus) {
        let mut table = self.table();
        let cleared = table.clear_cluster(cluster_id);
        if cleared.is_empty() {
            return;
        }
        let retired: Vec<KindListeners> =
            cleared.iter().filter_map(|(key, _)| self.retire(key)).collect();
        drop(table);
        drop(retired);

        for (key, subscribers) in &cleared {
            for subscriber in subscribers {
                subscriber.store.reset();
            }
            tracing::info!(%key, subscribers = subscribers.len(), %status, "entry invalidated");
        }
        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        self.notify(WatchNotice::Invalidated {
            cluster_id: cluster_id.clone(),
            status,
        });
    }

    fn dispatch(&self, event: WatchEvent) {
        self.counters.events_received.fetch_add(1, Ordering::Relaxed);
        let key = SubscriptionKey::new(event.cluster_id.clone(), event.kind.clone());
        let Some(queue) = self.queue(&key) else {
            self.counters.events_dropped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(%key, "no subscribers for event");
            return;
        };

        let outcome = queue.backlog().push(event);
        match outcome {
            PushOutcome::Queued => queue.wake.notify_one(),
            PushOutcome::Overflowed { discarded } => {
                self.counters.overflows.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%key, discarded, "event backlog overflowed; forcing full reload");
                queue.request_resync(ResyncReason::Backlog { discarded });
            }
        }
    }

    fn on_control(&self, message: WatchControlMessage) {
        let key = SubscriptionKey::new(message.cluster_id, message.kind);
        let Some(queue) = self.queue(&key) else {
            return;
        };
        match message.signal {
            WatchSignal::Resync { attempt } => {
                tracing::info!(%key, attempt, "upstream stream restarted");
                queue.backlog().clear();
                self.unavailable().remove(&key);
                queue.request_resync(ResyncReason::StreamRestarted { attempt });
            }
            WatchSignal::Unavailable { reason } => {
                tracing::warn!(%key, "watch unavailable: {}", reason);
                self.unavailable().insert(key.clone());
                self.notify(WatchNotice::Unavailable { key, reason });
            }
        }
    }

    /// One pass over a queue: pending resync first, then queued events.
    async fn drain(&self, queue: &KindQueue) {
        if let Some(reason) = queue.take_resync() {
            self.resync(queue, reason).await;
        }

        let events = queue.backlog().drain();
        if events.is_empty() {
            return;
        }
        let subscribers = self.subscribers(&queue.key);
        for event in &events {
            if queue.is_closed() {
                return;
            }
            for subscriber in &subscribers {
                if self.frames.resolve(subscriber.frame_id).as_ref() == Some(&event.cluster_id) {
                    subscriber.store.apply_watch_event(event);
                }
            }
        }
        self.counters
            .events_applied
            .fetch_add(events.len() as u64, Ordering::Relaxed);
    }

    async fn resync(&self, queue: &KindQueue, reason: ResyncReason) {
        let key = &queue.key;
        let subscribers = self.subscribers(key);
        tracing::info!(%key, ?reason, subscribers = subscribers.len(), "reloading subscribed stores");

        for subscriber in &subscribers {
            if let Err(e) = subscriber.store.reload_all().await {
                tracing::warn!(%key, subscriber = %subscriber.id, "reload failed: {}", e);
                self.notify(WatchNotice::ReloadFailed {
                    key: key.clone(),
                    subscriber: subscriber.id,
                    message: e.to_string(),
                });
            }
        }

        if queue.is_closed() {
            // Invalidated mid-reload: undo what the reload brought in
            for subscriber in &subscribers {
                subscriber.store.reset();
            }
            return;
        }
        self.counters.resyncs.fetch_add(1, Ordering::Relaxed);
        self.notify(WatchNotice::Resynced {
            key: key.clone(),
            reason,
        });
    }
}

impl Drop for MuxInner {
    fn drop(&mut self) {
        let queues = self.queues.get_mut().unwrap_or_else(PoisonError::into_inner);
        for queue in queues.values() {
            queue.close();
        }
    }
}

/// Exclusive hold on one key's gate. The gate leaves the map with its last
/// holder or waiter.
struct GateHold<'a> {
    inner: &'a MuxInner,
    key: SubscriptionKey,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for GateHold<'_> {
    fn drop(&mut self) {
        // Unlock before counting; the guard owns a reference to the gate
        drop(self.guard.take());
        let mut gates = self.inner.gates();
        if gates.get(&self.key).is_some_and(|gate| Arc::strong_count(gate) == 1) {
            gates.remove(&self.key);
        }
    }
}

async fn drain_loop(inner: Weak<MuxInner>, queue: Arc<KindQueue>) {
    loop {
        queue.wake.notified().await;
        if queue.is_closed() {
            break;
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.drain(&queue).await;
    }
    tracing::trace!(key = %queue.key, "drain task stopped");
}

/// Disposer of one subscription.
///
/// Releasing (explicitly or by drop) leaves the entry; releasing twice, or
/// after the cluster was invalidated, is a no-op.
#[must_use = "dropping the subscription releases it"]
pub struct Subscription {
    inner: Weak<MuxInner>,
    key: SubscriptionKey,
    token: SubscriptionToken,
    released: AtomicBool,
}

impl Subscription {
    /// Entry this subscription belongs to.
    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    /// Whether the subscription still counts toward its entry.
    pub fn is_active(&self) -> bool {
        !self.released.load(Ordering::Acquire)
            && self
                .inner
                .upgrade()
                .is_some_and(|inner| inner.is_live(self.token))
    }

    /// Leave the entry, closing the upstream watch if this was the last
    /// subscriber.
    pub async fn release(&self) -> Result<(), WatchError> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let Some(inner) = self.inner.upgrade() else {
            return Ok(());
        };
        inner.release(&self.key, self.token).await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        let inner = self.inner.clone();
        let key = self.key.clone();
        let token = self.token;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let Some(inner) = inner.upgrade() else {
                        return;
                    };
                    if let Err(e) = inner.release(&key, token).await {
                        tracing::warn!(%key, "release on drop failed: {}", e);
                    }
                });
            }
            Err(_) => {
                tracing::warn!(key = %self.key, "subscription dropped outside a runtime; not released")
            }
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// Disposer of a batch from [`WatchMultiplexer::subscribe_stores`].
#[must_use = "dropping the set releases every subscription"]
#[derive(Debug)]
pub struct SubscriptionSet {
    subscriptions: Vec<Subscription>,
}

impl SubscriptionSet {
    /// Release every subscription, returning the first failure.
    pub async fn release(&self) -> Result<(), WatchError> {
        let mut first_error = None;
        for subscription in &self.subscriptions {
            if let Err(e) = subscription.release().await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Subscriptions in the order the stores were given.
    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.subscriptions.iter()
    }

    /// Number of subscriptions.
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}
