//! Per-cluster connection lifecycle.
//!
//! A [`ClusterSession`] executes the actions of a
//! [`SessionMachine`](link_core::SessionMachine): it opens the upstream client,
//! wakes activation waiters, runs one watch pump per kind and tears
//! everything down on disconnect.
//!
//! # Concurrency
//!
//! All state sits behind one mutex that is never held across an await.
//! Status reports and watch events are broadcast while the mutex is held, so
//! reports leave in transition order and a pump whose watch was closed can
//! never deliver again. Listeners registered on the owning endpoint therefore
//! must not call back into a session synchronously.

use crate::cluster::Cluster;
use crate::error::{HostError, HostResult};
use crate::metrics::HostMetrics;
use crate::upstream::{ApiClient, ApiConnector, UpstreamError};
use link_core::{
    Action, Event, Freshness, RecoveryDecision, ResyncPolicy, SessionMachine, StreamRecovery,
    VersionTracker,
};
use link_ipc::{Caller, IpcEndpoint};
use link_types::{
    channels, ClusterId, ClusterStatus, ClusterStatusReport, RawWatchEvent, ResourceKind,
    WatchControlMessage, WatchSignal,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Default upper bound on one connection attempt.
pub const DEFAULT_ACTIVATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings shared by every session of a manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Upper bound on one connection attempt.
    pub activation_timeout: Duration,
    /// Watch stream recovery limits.
    pub resync: ResyncPolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            activation_timeout: DEFAULT_ACTIVATION_TIMEOUT,
            resync: ResyncPolicy::default(),
        }
    }
}

/// Result of one activation attempt, as seen by its waiters.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Pending,
    Ready,
    Failed(String),
    Aborted,
}

struct WatchHandle {
    id: u64,
    /// Open holds per caller; never holds a zero count.
    holders: BTreeMap<Caller, usize>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct SessionInner {
    machine: SessionMachine,
    client: Option<Arc<dyn ApiClient>>,
    last_error: Option<String>,
    outcome: Option<watch::Sender<Outcome>>,
    watches: HashMap<ResourceKind, WatchHandle>,
    next_watch: u64,
}

impl SessionInner {
    fn step(&mut self, event: Event) -> Vec<Action> {
        let (machine, actions) = std::mem::take(&mut self.machine).on_event(event);
        self.machine = machine;
        actions
    }

    fn settle(&mut self, outcome: Outcome) {
        if let Some(tx) = self.outcome.take() {
            tx.send_replace(outcome);
        }
    }

    fn current_watch(&self, kind: &ResourceKind, id: u64) -> bool {
        self.watches.get(kind).is_some_and(|handle| handle.id == id)
    }
}

/// Connection lifecycle of one cluster.
pub struct ClusterSession {
    cluster: Cluster,
    connector: Arc<dyn ApiConnector>,
    endpoint: IpcEndpoint,
    metrics: Arc<HostMetrics>,
    settings: SessionSettings,
    inner: Mutex<SessionInner>,
}

impl ClusterSession {
    /// Create a Disconnected session for `cluster`, publishing on `endpoint`.
    pub fn new(
        cluster: Cluster,
        connector: Arc<dyn ApiConnector>,
        endpoint: IpcEndpoint,
        metrics: Arc<HostMetrics>,
        settings: SessionSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            cluster,
            connector,
            endpoint,
            metrics,
            settings,
            inner: Mutex::new(SessionInner::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cluster definition.
    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    /// Cluster id.
    pub fn id(&self) -> &ClusterId {
        &self.cluster.id
    }

    /// Current status.
    pub fn status(&self) -> ClusterStatus {
        self.lock().machine.status()
    }

    /// Current status with the last connection failure.
    pub fn status_report(&self) -> ClusterStatusReport {
        let inner = self.lock();
        self.report(&inner, inner.machine.status())
    }

    /// Message of the most recent connection failure.
    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    /// Connection attempts started so far.
    pub fn attempts(&self) -> u64 {
        self.lock().machine.attempts()
    }

    /// Kinds with a running upstream watch, sorted.
    pub fn watched_kinds(&self) -> Vec<ResourceKind> {
        let mut kinds: Vec<_> = self.lock().watches.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Resolve once the session is Ready.
    ///
    /// Concurrent callers share one connection attempt and observe the same
    /// outcome. A failed attempt leaves the session in Error; only another
    /// call to `activate()` retries.
    ///
    /// # Errors
    ///
    /// - [`HostError::Connection`] if the attempt failed or timed out
    /// - [`HostError::Disconnected`] if `disconnect()` abandoned the attempt
    pub async fn activate(self: &Arc<Self>) -> HostResult<()> {
        let mut outcome = {
            let mut inner = self.lock();
            let mut outcome = None;
            for action in inner.step(Event::ActivateRequested) {
                match action {
                    Action::Connect { attempt } => {
                        let (tx, rx) = watch::channel(Outcome::Pending);
                        inner.outcome = Some(tx);
                        outcome = Some(rx);
                        self.spawn_connect(attempt);
                    }
                    Action::AwaitAttempt { attempt } => {
                        tracing::debug!(cluster = %self.cluster.id, attempt, "joining activation in flight");
                        outcome = inner.outcome.as_ref().map(watch::Sender::subscribe);
                    }
                    Action::AlreadyReady => return Ok(()),
                    Action::EmitStatus(status) => self.emit_status(&inner, status),
                    _ => {}
                }
            }
            match outcome {
                Some(rx) => rx,
                None => return Err(HostError::Disconnected(self.cluster.id.clone())),
            }
        };

        let settled = match outcome.wait_for(|o| *o != Outcome::Pending).await {
            Ok(settled) => Some(settled.clone()),
            Err(_) => None,
        };
        match settled.unwrap_or_else(|| outcome.borrow().clone()) {
            Outcome::Ready => Ok(()),
            Outcome::Failed(message) => Err(HostError::Connection {
                cluster: self.cluster.id.clone(),
                message,
            }),
            Outcome::Pending | Outcome::Aborted => {
                Err(HostError::Disconnected(self.cluster.id.clone()))
            }
        }
    }

    fn spawn_connect(self: &Arc<Self>, attempt: u64) {
        let session = Arc::downgrade(self);
        let connector = self.connector.clone();
        let cluster = self.cluster.clone();
        let timeout = self.settings.activation_timeout;

        tracing::info!(cluster = %cluster.id, attempt, "connecting");
        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, connector.connect(&cluster)).await {
                Ok(Ok(client)) => Ok(client),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("connection attempt timed out after {timeout:?}")),
            };
            if let Some(session) = session.upgrade() {
                session.complete(attempt, result);
            }
        });
    }

    fn complete(&self, attempt: u64, result: Result<Arc<dyn ApiClient>, String>) {
        let mut inner = self.lock();
        let (event, mut client) = match result {
            Ok(client) => (Event::ActivationSucceeded { attempt }, Some(client)),
            Err(error) => (Event::ActivationFailed { attempt, error }, None),
        };

        let actions = inner.step(event);
        if actions.is_empty() {
            tracing::debug!(cluster = %self.cluster.id, attempt, "discarding result of abandoned attempt");
            return;
        }

        for action in actions {
            match action {
                Action::ResolveWaiters { .. } => {
                    inner.client = client.take();
                    inner.last_error = None;
                    inner.settle(Outcome::Ready);
                    HostMetrics::bump(&self.metrics.activations);
                    tracing::info!(cluster = %self.cluster.id, attempt, "cluster ready");
                }
                Action::RejectWaiters { reason, .. } => {
                    tracing::warn!(cluster = %self.cluster.id, attempt, "activation failed: {}", reason);
                    inner.last_error = Some(reason.clone());
                    inner.settle(Outcome::Failed(reason));
                    HostMetrics::bump(&self.metrics.activation_failures);
                }
                Action::EmitStatus(status) => self.emit_status(&inner, status),
                _ => {}
            }
        }
    }

    /// Close every watch, drop the client and enter Disconnected.
    ///
    /// Callers waiting on an unfinished activation fail with
    /// [`HostError::Disconnected`]. Returns the report after the transition.
    pub fn disconnect(&self) -> ClusterStatusReport {
        let mut inner = self.lock();
        for action in inner.step(Event::DisconnectRequested) {
            match action {
                Action::RejectWaiters { attempt, .. } => {
                    tracing::info!(cluster = %self.cluster.id, attempt, "activation abandoned");
                    inner.settle(Outcome::Aborted);
                }
                Action::CloseAllWatches => {
                    for (kind, handle) in inner.watches.drain() {
                        handle.task.abort();
                        HostMetrics::bump(&self.metrics.watch_stops);
                        tracing::debug!(cluster = %self.cluster.id, %kind, "watch stopped");
                    }
                }
                Action::ReleaseClient => inner.client = None,
                Action::EmitStatus(status) => self.emit_status(&inner, status),
                _ => {}
            }
        }
        self.report(&inner, inner.machine.status())
    }

    /// Start the upstream watch for `kind` on behalf of `holder`, or reuse
    /// the running one.
    ///
    /// Every display multiplexer holds the watch once; each `open_watch` must
    /// be paired with one `close_watch` from the same holder, or released in
    /// bulk by [`release_holder`](Self::release_holder). Returns the id of
    /// the watch; a reused watch keeps its id.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::NotReady`] unless the session is Ready.
    pub fn open_watch(self: &Arc<Self>, kind: &ResourceKind, holder: Caller) -> HostResult<u64> {
        let mut inner = self.lock();
        let client = match (&inner.client, inner.machine.is_ready()) {
            (Some(client), true) => client.clone(),
            _ => return Err(HostError::NotReady(self.cluster.id.clone())),
        };
        if let Some(handle) = inner.watches.get_mut(kind) {
            *handle.holders.entry(holder).or_default() += 1;
            tracing::debug!(cluster = %self.cluster.id, %kind, ?holder, "reusing watch");
            return Ok(handle.id);
        }

        inner.next_watch += 1;
        let id = inner.next_watch;
        let task = tokio::spawn(pump(
            Arc::downgrade(self),
            client,
            kind.clone(),
            id,
            self.settings.resync,
        ));
        inner.watches.insert(
            kind.clone(),
            WatchHandle {
                id,
                holders: BTreeMap::from([(holder, 1)]),
                task,
            },
        );
        HostMetrics::bump(&self.metrics.watch_starts);
        tracing::info!(cluster = %self.cluster.id, %kind, watch = id, "watch started");
        Ok(id)
    }

    /// Release one of `holder`'s holds on the upstream watch for `kind`; the
    /// last hold of any holder stops it. A holder without a hold changes
    /// nothing. Returns `true` if the stream was stopped.
    pub fn close_watch(&self, kind: &ResourceKind, holder: Caller) -> bool {
        let mut inner = self.lock();
        let Some(handle) = inner.watches.get_mut(kind) else {
            return false;
        };
        let Some(count) = handle.holders.get_mut(&holder) else {
            tracing::debug!(cluster = %self.cluster.id, %kind, ?holder, "close without a hold");
            return false;
        };
        *count -= 1;
        if *count == 0 {
            handle.holders.remove(&holder);
        }
        if !handle.holders.is_empty() {
            tracing::debug!(cluster = %self.cluster.id, %kind, holders = handle.holders.len(), "watch still held");
            return false;
        }
        let Some(handle) = inner.watches.remove(kind) else {
            return false;
        };
        drop(inner);
        self.stop_watch(kind, handle);
        true
    }

    /// Drop every hold of `holder`, stopping the watches nobody else holds.
    /// Returns how many watches were stopped.
    pub fn release_holder(&self, holder: Caller) -> usize {
        let released: Vec<(ResourceKind, WatchHandle)> = {
            let mut inner = self.lock();
            let idle: Vec<ResourceKind> = inner
                .watches
                .iter_mut()
                .filter_map(|(kind, handle)| {
                    handle.holders.remove(&holder);
                    handle.holders.is_empty().then(|| kind.clone())
                })
                .collect();
            idle.into_iter()
                .filter_map(|kind| inner.watches.remove(&kind).map(|handle| (kind, handle)))
                .collect()
        };

        let stopped = released.len();
        for (kind, handle) in released {
            self.stop_watch(&kind, handle);
        }
        if stopped > 0 {
            tracing::debug!(cluster = %self.cluster.id, ?holder, stopped, "holder released");
        }
        stopped
    }

    fn stop_watch(&self, kind: &ResourceKind, handle: WatchHandle) {
        handle.task.abort();
        HostMetrics::bump(&self.metrics.watch_stops);
        tracing::info!(cluster = %self.cluster.id, %kind, watch = handle.id, "watch stopped");
    }

    /// Every object of `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::NotReady`] unless the session is Ready, or
    /// [`HostError::Upstream`] if the list call fails.
    pub async fn list(&self, kind: &ResourceKind) -> HostResult<Vec<Value>> {
        let client = {
            let inner = self.lock();
            match (&inner.client, inner.machine.is_ready()) {
                (Some(client), true) => client.clone(),
                _ => return Err(HostError::NotReady(self.cluster.id.clone())),
            }
        };
        client.list(kind).await.map_err(|source| HostError::Upstream {
            cluster: self.cluster.id.clone(),
            kind: kind.clone(),
            source,
        })
    }

    fn report(&self, inner: &SessionInner, status: ClusterStatus) -> ClusterStatusReport {
        ClusterStatusReport {
            cluster_id: self.cluster.id.clone(),
            status,
            last_error: inner.last_error.clone(),
        }
    }

    fn emit_status(&self, inner: &SessionInner, status: ClusterStatus) {
        let report = self.report(inner, status);
        tracing::info!(cluster = %self.cluster.id, %status, "status changed");
        match serde_json::to_value(&report) {
            Ok(payload) => self.endpoint.broadcast(channels::CLUSTER_STATUS, payload),
            Err(e) => tracing::error!(cluster = %self.cluster.id, "encoding status report failed: {}", e),
        }
    }

    /// Broadcast `raw` if watch `id` is still the current watch of `kind`.
    fn publish(&self, kind: &ResourceKind, id: u64, raw: RawWatchEvent) -> bool {
        let inner = self.lock();
        if !inner.current_watch(kind, id) {
            return false;
        }
        let event = raw.scoped(self.cluster.id.clone(), kind.clone());
        match serde_json::to_value(&event) {
            Ok(payload) => {
                self.endpoint.broadcast(&channels::watch(kind), payload);
                HostMetrics::bump(&self.metrics.events_published);
            }
            Err(e) => tracing::error!(cluster = %self.cluster.id, %kind, "encoding watch event failed: {}", e),
        }
        true
    }

    /// Broadcast a recovery signal if watch `id` is still current. An
    /// `Unavailable` signal also retires the watch.
    fn signal(&self, kind: &ResourceKind, id: u64, signal: WatchSignal) -> bool {
        let mut inner = self.lock();
        if !inner.current_watch(kind, id) {
            return false;
        }
        if matches!(signal, WatchSignal::Unavailable { .. }) {
            inner.watches.remove(kind);
        }
        let message = WatchControlMessage {
            cluster_id: self.cluster.id.clone(),
            kind: kind.clone(),
            signal,
        };
        match serde_json::to_value(&message) {
            Ok(payload) => self.endpoint.broadcast(&channels::watch_control(kind), payload),
            Err(e) => tracing::error!(cluster = %self.cluster.id, %kind, "encoding watch signal failed: {}", e),
        }
        true
    }
}

impl std::fmt::Debug for ClusterSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("ClusterSession")
            .field("cluster", &self.cluster.id)
            .field("state", inner.machine.state())
            .field("watches", &inner.watches.len())
            .finish_non_exhaustive()
    }
}

/// Drive the upstream watch `id` of `kind` until it is closed, the session
/// is dropped or recovery gives up.
async fn pump(
    session: Weak<ClusterSession>,
    client: Arc<dyn ApiClient>,
    kind: ResourceKind,
    id: u64,
    policy: ResyncPolicy,
) {
    let mut recovery = StreamRecovery::new(policy);
    let mut versions = VersionTracker::new();
    let mut restarted: Option<u32> = None;

    loop {
        let failure = match client.watch(&kind).await {
            Ok(mut stream) => {
                if let Some(attempt) = restarted.take() {
                    let Some(s) = session.upgrade() else { return };
                    if !s.signal(&kind, id, WatchSignal::Resync { attempt }) {
                        return;
                    }
                    HostMetrics::bump(&s.metrics.resyncs);
                    tracing::info!(cluster = %s.cluster.id, %kind, attempt, "watch restarted");
                }
                loop {
                    match stream.recv().await {
                        Some(Ok(raw)) => {
                            recovery.on_healthy();
                            let Some(s) = session.upgrade() else { return };
                            if let Freshness::Stale { last } = versions.observe(raw.resource_version) {
                                HostMetrics::bump(&s.metrics.stale_events);
                                tracing::debug!(
                                    cluster = %s.cluster.id, %kind,
                                    version = %raw.resource_version, %last,
                                    "dropping stale event"
                                );
                                continue;
                            }
                            if !s.publish(&kind, id, raw) {
                                return;
                            }
                        }
                        Some(Err(e)) => break e,
                        None => break UpstreamError::StreamClosed,
                    }
                }
            }
            Err(e) => e,
        };

        let Some(s) = session.upgrade() else { return };
        HostMetrics::bump(&s.metrics.stream_errors);
        match recovery.on_stream_error() {
            RecoveryDecision::Retry { attempt, delay } => {
                tracing::warn!(
                    cluster = %s.cluster.id, %kind, attempt, ?delay,
                    "watch stream failed, restarting: {}", failure
                );
                drop(s);
                restarted = Some(attempt);
                tokio::time::sleep(delay).await;
            }
            RecoveryDecision::GiveUp { attempts } => {
                tracing::warn!(
                    cluster = %s.cluster.id, %kind, attempts,
                    "watch stream unavailable: {}", failure
                );
                let reason = failure.to_string();
                if s.signal(&kind, id, WatchSignal::Unavailable { reason }) {
                    HostMetrics::bump(&s.metrics.unavailable);
                }
                return;
            }
        }
    }
}
