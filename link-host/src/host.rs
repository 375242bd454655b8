//! The owning process, wired together.

use crate::config::Config;
use crate::error::HostResult;
use crate::idle::spawn_idle_task;
use crate::manager::ClusterManager;
use crate::upstream::ApiConnector;
use link_ipc::{IpcEndpoint, Link, PeerId};
use link_watch::{MemoryStore, ResourceLister, WatchMultiplexer};
use link_types::{ClusterId, ResourceKind};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;

/// Endpoint, cluster manager and background tasks of the owning process.
pub struct Host {
    config: Config,
    manager: Arc<ClusterManager>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Host {
    /// Build a host from `config` and start answering requests.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: Config, connector: Arc<dyn ApiConnector>) -> HostResult<Self> {
        let endpoint = IpcEndpoint::new("owner", config.ipc_config());
        let manager = ClusterManager::new(endpoint, connector, config.session_settings());
        manager.serve()?;
        Ok(Self {
            config,
            manager,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Build a host from the TOML file at `path`.
    pub fn from_file(path: &Path, connector: Arc<dyn ApiConnector>) -> HostResult<Self> {
        Self::new(Config::from_file(path)?, connector)
    }

    /// Loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Cluster registry.
    pub fn manager(&self) -> &Arc<ClusterManager> {
        &self.manager
    }

    /// Endpoint display processes attach to.
    pub fn endpoint(&self) -> &IpcEndpoint {
        self.manager.endpoint()
    }

    /// Attach the link to a display process.
    pub fn attach_display(&self, link: Arc<dyn Link>) -> PeerId {
        let peer = self.endpoint().attach(link);
        tracing::info!(?peer, "display attached");
        peer
    }

    /// Detach a display process.
    pub async fn detach_display(&self, peer: PeerId) -> bool {
        let detached = self.endpoint().detach(peer).await;
        if detached {
            tracing::info!(?peer, "display detached");
        }
        detached
    }

    /// Multiplexer for stores living in the owning process itself.
    ///
    /// Watches are opened directly on the manager; events arrive through the
    /// local broadcast listeners.
    pub fn local_multiplexer(&self) -> WatchMultiplexer {
        WatchMultiplexer::new(
            self.endpoint().clone(),
            self.manager.clone(),
            self.manager.frames().clone(),
            self.config.multiplexer_config(),
        )
    }

    /// In-memory store of `kind` in `cluster_id` listing through the manager.
    pub fn local_store(&self, cluster_id: ClusterId, kind: ResourceKind) -> Arc<MemoryStore> {
        let lister: Arc<dyn ResourceLister> = self.manager.clone();
        Arc::new(MemoryStore::new(cluster_id, kind, lister))
    }

    /// Start the idle disconnect task and, when `with_http` is set, the HTTP
    /// endpoints.
    pub fn start(&self, with_http: bool) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.push(spawn_idle_task(self.manager.clone(), self.config.idle.clone()));

        if with_http {
            let manager = self.manager.clone();
            let http = self.config.http.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = crate::http::serve(manager, &http).await {
                    tracing::error!("HTTP endpoints stopped: {}", e);
                }
            }));
        }
    }

    /// Stop background tasks and disconnect every cluster.
    pub fn shutdown(&self) {
        for task in self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }
        for cluster_id in self.manager.cluster_ids() {
            if let Err(e) = self.manager.disconnect(&cluster_id) {
                tracing::debug!(cluster = %cluster_id, "disconnect on shutdown failed: {}", e);
            }
        }
        tracing::info!("host shut down");
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}
