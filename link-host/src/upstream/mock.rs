//! Mock upstream for testing.
//!
//! Allows scripting connection failures and list results, and pushing
//! events into open watch streams.

use super::{ApiClient, ApiConnector, UpstreamError, WatchStream};
use crate::cluster::Cluster;
use async_trait::async_trait;
use link_types::{ClusterId, RawWatchEvent, ResourceKind};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

const STREAM_CAPACITY: usize = 1024;

/// Mock connector for testing.
///
/// Hands out one [`MockApi`] per cluster id; reconnecting the same cluster
/// returns the same api.
#[derive(Debug, Default, Clone)]
pub struct MockConnector {
    inner: Arc<Mutex<MockConnectorInner>>,
}

#[derive(Debug, Default)]
struct MockConnectorInner {
    connects: usize,
    fail_next_connect: Option<String>,
    connect_delay: Option<Duration>,
    apis: HashMap<ClusterId, Arc<MockApi>>,
}

impl MockConnector {
    /// Create a new mock connector.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockConnectorInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Api handed out for `cluster_id`.
    pub fn api(&self, cluster_id: &ClusterId) -> Arc<MockApi> {
        self.lock()
            .apis
            .entry(cluster_id.clone())
            .or_insert_with(|| Arc::new(MockApi::new()))
            .clone()
    }

    /// Number of `connect()` calls so far.
    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.lock().fail_next_connect = Some(error.to_string());
    }

    /// Delay every connect() by `delay`.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.lock().connect_delay = Some(delay);
    }

    /// Remove the connect delay.
    pub fn clear_connect_delay(&self) {
        self.lock().connect_delay = None;
    }
}

#[async_trait]
impl ApiConnector for MockConnector {
    async fn connect(&self, cluster: &Cluster) -> Result<Arc<dyn ApiClient>, UpstreamError> {
        let delay = {
            let mut inner = self.lock();
            inner.connects += 1;
            inner.connect_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.lock().fail_next_connect.take() {
            return Err(UpstreamError::Connect(error));
        }
        Ok(self.api(&cluster.id))
    }
}

/// Mock API client for testing.
#[derive(Debug, Default)]
pub struct MockApi {
    inner: Mutex<MockApiInner>,
}

#[derive(Debug, Default)]
struct MockApiInner {
    lists: HashMap<ResourceKind, Vec<Value>>,
    streams: HashMap<ResourceKind, Vec<mpsc::Sender<Result<RawWatchEvent, UpstreamError>>>>,
    watch_starts: HashMap<ResourceKind, usize>,
    list_calls: HashMap<ResourceKind, usize>,
    fail_watches: usize,
    fail_next_list: Option<String>,
}

impl MockApi {
    /// Create a new mock api with nothing listed.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockApiInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Objects returned by `list(kind)`.
    pub fn set_list(&self, kind: &ResourceKind, objects: Vec<Value>) {
        self.lock().lists.insert(kind.clone(), objects);
    }

    /// Cause the next list() to fail with the given error.
    pub fn fail_next_list(&self, error: &str) {
        self.lock().fail_next_list = Some(error.to_string());
    }

    /// Cause the next `count` watch() calls to fail.
    pub fn fail_watches(&self, count: usize) {
        self.lock().fail_watches = count;
    }

    /// Push `event` into every open stream of `kind`. Returns the number of
    /// streams that accepted it.
    pub fn emit(&self, kind: &ResourceKind, event: RawWatchEvent) -> usize {
        let mut inner = self.lock();
        let Some(streams) = inner.streams.get_mut(kind) else {
            return 0;
        };
        streams.retain(|tx| !tx.is_closed());
        streams
            .iter()
            .filter(|tx| tx.try_send(Ok(event.clone())).is_ok())
            .count()
    }

    /// Fail every open stream of `kind` with `error`.
    pub fn break_stream(&self, kind: &ResourceKind, error: &str) {
        let streams = self.lock().streams.remove(kind).unwrap_or_default();
        for tx in streams {
            let _ = tx.try_send(Err(UpstreamError::Stream(error.to_string())));
        }
    }

    /// End every open stream of `kind`.
    pub fn close_streams(&self, kind: &ResourceKind) {
        self.lock().streams.remove(kind);
    }

    /// Number of open streams of `kind`.
    pub fn open_streams(&self, kind: &ResourceKind) -> usize {
        self.lock()
            .streams
            .get(kind)
            .map_or(0, |streams| streams.iter().filter(|tx| !tx.is_closed()).count())
    }

    /// Number of successful watch() calls for `kind`.
    pub fn watch_starts(&self, kind: &ResourceKind) -> usize {
        self.lock().watch_starts.get(kind).copied().unwrap_or(0)
    }

    /// Number of list() calls for `kind`.
    pub fn list_calls(&self, kind: &ResourceKind) -> usize {
        self.lock().list_calls.get(kind).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ApiClient for MockApi {
    async fn list(&self, kind: &ResourceKind) -> Result<Vec<Value>, UpstreamError> {
        let mut inner = self.lock();
        *inner.list_calls.entry(kind.clone()).or_default() += 1;
        if let Some(error) = inner.fail_next_list.take() {
            return Err(UpstreamError::Request(error));
        }
        Ok(inner.lists.get(kind).cloned().unwrap_or_default())
    }

    async fn watch(&self, kind: &ResourceKind) -> Result<WatchStream, UpstreamError> {
        let mut inner = self.lock();
        if inner.fail_watches > 0 {
            inner.fail_watches -= 1;
            return Err(UpstreamError::Request(format!("watch {kind} refused")));
        }
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        inner.streams.entry(kind.clone()).or_default().push(tx);
        *inner.watch_starts.entry(kind.clone()).or_default() += 1;
        Ok(rx)
    }
}
