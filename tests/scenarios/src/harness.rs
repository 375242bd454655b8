//! Scenario harness: one owning [`Host`] with a mock upstream, and display
//! processes attached to it over real links.
//!
//! A [`Display`] carries everything a display process runs: its endpoint,
//! the remote control client, a frame registry mirror, a status board and a
//! watch multiplexer. Scenarios drive the owner through the mock upstream
//! ([`MockApi`]) and observe the effects in display-side stores.

use async_trait::async_trait;
use link_host::{Cluster, Config, Host, HostError, MockApi, MockConnector};
use link_ipc::{IpcEndpoint, Link, MemoryLink, PeerId, StreamLink};
use link_types::{
    ClusterId, ClusterStatusReport, FrameId, RawWatchEvent, ResourceKind, ResourceVersion,
    WatchEvent, WatchEventType,
};
use link_watch::{
    ClusterStatusBoard, ControlError, FrameRegistry, MemoryStore, RemoteControl, ResourceLister,
    ResourceStore, StoreError, SubscribeOptions, Subscriber, Subscription, WatchError,
    WatchMultiplexer,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

use crate::assertions::eventually;

/// Errors that can occur while driving a scenario.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The owning process failed.
    #[error("host error: {0}")]
    Host(#[from] HostError),

    /// A request from a display failed.
    #[error("control error: {0}")]
    Control(#[from] ControlError),

    /// A subscription failed.
    #[error("watch error: {0}")]
    Watch(#[from] WatchError),

    /// A condition did not hold in time.
    #[error("timed out after {after:?} waiting for {what}")]
    Timeout {
        /// Condition being waited for.
        what: String,
        /// How long we waited.
        after: Duration,
    },
}

/// How a display is connected to the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// In-process channel pair.
    Memory,
    /// Length-prefixed frames over a byte stream.
    Stream,
}

impl LinkKind {
    /// Both kinds, for scenarios that run over each.
    pub const ALL: [LinkKind; 2] = [LinkKind::Memory, LinkKind::Stream];

    /// Connected (owner side, display side) links.
    fn pair(self) -> (Arc<dyn Link>, Arc<dyn Link>) {
        match self {
            LinkKind::Memory => {
                let (owner, display) = MemoryLink::pair();
                (Arc::new(owner), Arc::new(display))
            }
            LinkKind::Stream => {
                let (owner, display) = tokio::io::duplex(64 * 1024);
                let (owner_read, owner_write) = tokio::io::split(owner);
                let (display_read, display_write) = tokio::io::split(display);
                (
                    Arc::new(StreamLink::new(owner_read, owner_write)),
                    Arc::new(StreamLink::new(display_read, display_write)),
                )
            }
        }
    }
}

/// Config with short recovery delays, so stream failures resolve quickly.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.ipc.request_timeout_ms = 2_000;
    config.watch.max_resync_attempts = 3;
    config.watch.resync_base_delay_ms = 2;
    config.watch.resync_max_delay_ms = 10;
    config
}

/// Owning process with clusters `c1` and `c2` registered.
pub struct Harness {
    host: Host,
    connector: MockConnector,
}

impl Harness {
    /// Harness with [`fast_config`].
    pub fn new() -> Result<Self, HarnessError> {
        Self::with_config(fast_config())
    }

    /// Harness with an explicit config.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_config(config: Config) -> Result<Self, HarnessError> {
        let connector = MockConnector::new();
        let host = Host::new(config, Arc::new(connector.clone()))?;
        for (id, name) in [("c1", "dev"), ("c2", "prod")] {
            host.manager()
                .add_cluster(Cluster::new(id, name, "mock://upstream"))?;
        }
        Ok(Self { host, connector })
    }

    /// The owning process.
    pub fn host(&self) -> &Host {
        &self.host
    }

    /// Upstream connector shared by every session.
    pub fn connector(&self) -> &MockConnector {
        &self.connector
    }

    /// Mock upstream API of `cluster`.
    pub fn api(&self, cluster: &str) -> Arc<MockApi> {
        self.connector.api(&ClusterId::new(cluster))
    }

    /// Attach a new display process over a `kind` link.
    pub fn display(&self, kind: LinkKind) -> Display {
        let config = self.host.config();
        let (owner_side, display_side) = kind.pair();
        let peer = self.host.attach_display(owner_side);

        let endpoint = IpcEndpoint::new("display", config.ipc_config());
        let owner_link = endpoint.connect_owner(display_side);

        let control = RemoteControl::new(endpoint.clone());
        let frames = FrameRegistry::mirror(&endpoint);
        let status = ClusterStatusBoard::follow(&endpoint);
        let mux = WatchMultiplexer::new(
            endpoint.clone(),
            Arc::new(control.clone()),
            frames.clone(),
            config.multiplexer_config(),
        );

        Display {
            endpoint,
            control,
            frames,
            status,
            mux,
            peer,
            owner_link,
        }
    }

    /// Detach `display` from the owner.
    pub async fn detach(&self, display: &Display) -> bool {
        self.host.detach_display(display.peer).await
    }
}

/// Everything one display process runs.
pub struct Display {
    /// IPC endpoint connected to the owner.
    pub endpoint: IpcEndpoint,
    /// Request client for the owner's channels.
    pub control: RemoteControl,
    /// Mirror of the owner's frame table.
    pub frames: Arc<FrameRegistry>,
    /// Latest status of every cluster.
    pub status: Arc<ClusterStatusBoard>,
    /// Watch multiplexer feeding this display's stores.
    pub mux: WatchMultiplexer,
    peer: PeerId,
    owner_link: PeerId,
}

impl Display {
    /// Activate `cluster` through the owner.
    pub async fn activate(&self, cluster: &ClusterId) -> Result<ClusterStatusReport, HarnessError> {
        Ok(self.control.activate(cluster).await?)
    }

    /// Point `frame` at `cluster` and wait until the local mirror agrees.
    pub async fn show(&self, frame: FrameId, cluster: &ClusterId) -> Result<(), HarnessError> {
        self.control.set_frame_id(frame, cluster).await?;
        let frames = self.frames.clone();
        let wanted = cluster.clone();
        eventually("frame mirror", move || frames.resolve(frame).as_ref() == Some(&wanted)).await
    }

    /// Close the link to the owner from this side, as a crashed display
    /// would, without releasing anything first.
    pub async fn hang_up(&self) -> bool {
        self.endpoint.detach(self.owner_link).await
    }

    /// Empty in-memory store of `kind` in `cluster` listing through the owner.
    pub fn store(&self, cluster: &ClusterId, kind: ResourceKind) -> Arc<MemoryStore> {
        let lister: Arc<dyn ResourceLister> = Arc::new(self.control.clone());
        Arc::new(MemoryStore::new(cluster.clone(), kind, lister))
    }

    /// Subscribe `store` for its own cluster and kind, on behalf of `frame`.
    pub async fn subscribe(&self, frame: FrameId, store: Arc<MemoryStore>) -> Result<Subscription, HarnessError> {
        let cluster = store.cluster_id().clone();
        let kind = store.kind().clone();
        let store: Arc<dyn ResourceStore> = store;
        Ok(self
            .mux
            .subscribe(cluster, kind, Subscriber::new(frame, store), SubscribeOptions::default())
            .await?)
    }
}

/// Store that records what was applied to it, in order.
pub struct RecordingStore {
    kind: ResourceKind,
    applied: Mutex<Vec<(WatchEventType, u64)>>,
    reloads: AtomicUsize,
}

impl RecordingStore {
    /// Empty recorder for `kind`.
    pub fn new(kind: ResourceKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            applied: Mutex::new(Vec::new()),
            reloads: AtomicUsize::new(0),
        })
    }

    /// Resource versions applied so far.
    pub fn versions(&self) -> Vec<u64> {
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, version)| *version)
            .collect()
    }

    /// Number of full reloads so far.
    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceStore for RecordingStore {
    fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    async fn reload_all(&self) -> Result<(), StoreError> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn apply_watch_event(&self, event: &WatchEvent) {
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((event.event_type, event.resource_version.value()));
    }

    fn reset(&self) {
        self.applied.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

// ===== Fixtures =====

/// The `pods` kind.
pub fn pods() -> ResourceKind {
    ResourceKind::new("pods")
}

/// Pod object named `name` in `default`.
pub fn pod(name: &str) -> Value {
    json!({ "metadata": { "name": name, "namespace": "default" } })
}

/// Store key of the pod named `name`.
pub fn pod_key(name: &str) -> String {
    format!("default/{name}")
}

/// Upstream event about the pod named `name`.
pub fn pod_event(event_type: WatchEventType, name: &str, version: u64) -> RawWatchEvent {
    RawWatchEvent {
        event_type,
        object: pod(name),
        resource_version: ResourceVersion::new(version),
    }
}
