//! IPC endpoint: requests, handlers and broadcasts over any number of links.
//!
//! The connection-owning process attaches one link per display process with
//! [`IpcEndpoint::attach`]. A display process attaches its single link to the
//! owner with [`IpcEndpoint::connect_owner`]; its requests travel over that
//! link. An endpoint without an owner link serves its own requests from its
//! local handlers.
//!
//! Each link gets a writer task fed by an unbounded queue and a reader task.
//! `broadcast()` therefore never waits, and frames leave in the order they
//! were queued. The reader task handles inbound frames one at a time, so
//! broadcast listeners see each channel in arrival order. Listeners run on
//! that task and must not block.
//!
//! A frame the link refuses as too large is dropped without tearing the link
//! down; if it was a reply, the requester gets a failure in its place.

use crate::error::{IpcError, IpcResult};
use crate::link::{Link, LinkError};
use crate::pending::PendingRequests;
use link_types::{Broadcast, Frame, RemoteFault, Reply, ReplyOutcome, Request};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Value or error message returned by a request handler.
pub type HandlerResult = Result<Value, String>;

/// Boxed future returned by a request handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

type Handler = Arc<dyn Fn(Caller, Vec<Value>) -> HandlerFuture + Send + Sync>;
type Listener = Arc<dyn Fn(&Value) + Send + Sync>;
type DetachHook = Arc<dyn Fn(PeerId) + Send + Sync>;

/// Endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcConfig {
    /// How long `request()` waits for a reply.
    pub request_timeout: Duration,
}

impl IpcConfig {
    /// Default request timeout (10 seconds).
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    /// Set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Identifies one attached link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u64);

/// Where a request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Caller {
    /// The endpoint itself, with no owner link.
    Local,
    /// The process on the other end of an attached link.
    Peer(PeerId),
}

struct Peer {
    outbound: mpsc::UnboundedSender<Frame>,
    link: Arc<dyn Link>,
    reader: JoinHandle<()>,
}

struct EndpointInner {
    name: String,
    config: IpcConfig,
    handlers: RwLock<HashMap<String, Handler>>,
    listeners: RwLock<HashMap<String, BTreeMap<u64, Listener>>>,
    next_listener: AtomicU64,
    pending: PendingRequests,
    peers: Mutex<BTreeMap<PeerId, Peer>>,
    owner: Mutex<Option<PeerId>>,
    next_peer: AtomicU64,
    detach_hooks: RwLock<Vec<DetachHook>>,
}

/// One side of the request/broadcast transport.
///
/// Cheap to clone; clones share handlers, listeners and links.
#[derive(Clone)]
pub struct IpcEndpoint {
    inner: Arc<EndpointInner>,
}

impl IpcEndpoint {
    /// Create an endpoint with no links.
    pub fn new(name: impl Into<String>, config: IpcConfig) -> Self {
        Self {
            inner: Arc::new(EndpointInner {
                name: name.into(),
                config,
                handlers: RwLock::new(HashMap::new()),
                listeners: RwLock::new(HashMap::new()),
                next_listener: AtomicU64::new(1),
                pending: PendingRequests::new(),
                peers: Mutex::new(BTreeMap::new()),
                owner: Mutex::new(None),
                next_peer: AtomicU64::new(1),
                detach_hooks: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Endpoint name, used in logs.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Endpoint configuration.
    pub fn config(&self) -> &IpcConfig {
        &self.inner.config
    }

    /// Attach a link to a display process.
    ///
    /// Must be called from within a tokio runtime.
    pub fn attach(&self, link: Arc<dyn Link>) -> PeerId {
        self.inner.attach(link, false)
    }

    /// Attach the link to the owning process; requests travel over it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect_owner(&self, link: Arc<dyn Link>) -> PeerId {
        self.inner.attach(link, true)
    }

    /// Detach and close a link. Returns `false` if it was not attached.
    pub async fn detach(&self, peer: PeerId) -> bool {
        let Some(peer_entry) = self.inner.forget_peer(peer) else {
            return false;
        };
        peer_entry.reader.abort();
        if let Err(e) = peer_entry.link.close().await {
            tracing::debug!(endpoint = %self.inner.name, "closing link failed: {}", e);
        }
        true
    }

    /// Run `hook` whenever a link goes away, whether detached explicitly or
    /// closed by the other side. Fires once per link.
    pub fn on_detach<F>(&self, hook: F)
    where
        F: Fn(PeerId) + Send + Sync + 'static,
    {
        self.inner
            .detach_hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(hook));
    }

    /// Number of attached links.
    pub fn peer_count(&self) -> usize {
        self.inner.peers().len()
    }

    /// Whether requests are routed to an owning process.
    pub fn has_owner(&self) -> bool {
        self.inner.owner().is_some()
    }

    /// Register the handler for `channel`.
    ///
    /// Fails with [`IpcError::AlreadyHandled`] if one is already registered.
    pub fn handle<F, Fut>(&self, channel: impl Into<String>, handler: F) -> IpcResult<()>
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handle_with_caller(channel, move |_, args| handler(args))
    }

    /// Like [`handle`](Self::handle), but the handler is told which link the
    /// request arrived on.
    pub fn handle_with_caller<F, Fut>(
        &self,
        channel: impl Into<String>,
        handler: F,
    ) -> IpcResult<()>
    where
        F: Fn(Caller, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let channel = channel.into();
        let mut handlers = self
            .inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if handlers.contains_key(&channel) {
            return Err(IpcError::AlreadyHandled { channel });
        }

        let handler: Handler = Arc::new(move |caller: Caller, args: Vec<Value>| -> HandlerFuture {
            Box::pin(handler(caller, args))
        });
        tracing::debug!(endpoint = %self.inner.name, %channel, "handler registered");
        handlers.insert(channel, handler);
        Ok(())
    }

    /// Remove the handler for `channel`. Returns `false` if none was set.
    pub fn unhandle(&self, channel: &str) -> bool {
        self.inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(channel)
            .is_some()
    }

    /// Whether a handler is registered for `channel` on this endpoint.
    pub fn is_handled(&self, channel: &str) -> bool {
        self.inner.handler(channel).is_some()
    }

    /// Call the handler of `channel` in the owning process.
    ///
    /// Settles exactly once: with the handler's value, with
    /// [`IpcError::NotHandled`], with [`IpcError::Remote`] when the handler
    /// fails, or with [`IpcError::Timeout`] after the configured timeout.
    pub async fn request(&self, channel: &str, args: Vec<Value>) -> IpcResult<Value> {
        let Some(outbound) = self.inner.owner_sender() else {
            return self.request_local(channel, args).await;
        };

        let timeout = self.inner.config.request_timeout;
        let now = Instant::now();
        let deadline = now + timeout;
        self.inner.pending.evict_expired(now);

        let (id, mut rx) = self.inner.pending.register(channel, deadline);
        let _guard = PendingGuard {
            pending: &self.inner.pending,
            id,
        };

        tracing::debug!(endpoint = %self.inner.name, %channel, %id, "sending request");
        outbound
            .send(Frame::Request(Request {
                id,
                channel: channel.to_string(),
                args,
            }))
            .map_err(|_| IpcError::LinkClosed)?;

        let settlement = match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(Ok(settlement)) => settlement,
            Ok(Err(_)) => Err(IpcError::LinkClosed),
            Err(_) => match self.inner.pending.expire(id) {
                Some(_) => Err(IpcError::Timeout {
                    channel: channel.to_string(),
                    after: timeout,
                }),
                // Reply won the race against the deadline
                None => rx.try_recv().unwrap_or_else(|_| {
                    Err(IpcError::Timeout {
                        channel: channel.to_string(),
                        after: timeout,
                    })
                }),
            },
        };

        match &settlement {
            Err(IpcError::NotHandled { .. }) => {
                tracing::warn!(endpoint = %self.inner.name, %channel, "request not handled")
            }
            Err(IpcError::Timeout { .. }) => {
                tracing::debug!(endpoint = %self.inner.name, %channel, %id, "request timed out")
            }
            _ => {}
        }
        settlement
    }

    /// [`request`](Self::request) and decode the reply.
    pub async fn request_as<T: DeserializeOwned>(
        &self,
        channel: &str,
        args: Vec<Value>,
    ) -> IpcResult<T> {
        let value = self.request(channel, args).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn request_local(&self, channel: &str, args: Vec<Value>) -> IpcResult<Value> {
        let Some(handler) = self.inner.handler(channel) else {
            tracing::warn!(endpoint = %self.inner.name, %channel, "request not handled");
            return Err(IpcError::NotHandled {
                channel: channel.to_string(),
            });
        };

        let timeout = self.inner.config.request_timeout;
        match tokio::time::timeout(timeout, handler(Caller::Local, args)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(IpcError::Remote {
                channel: channel.to_string(),
                message,
            }),
            Err(_) => Err(IpcError::Timeout {
                channel: channel.to_string(),
                after: timeout,
            }),
        }
    }

    /// Send `payload` to every listener of `channel`, local and remote.
    ///
    /// Fire-and-forget: no acknowledgement, no retry.
    pub fn broadcast(&self, channel: &str, payload: Value) {
        self.inner.deliver(channel, &payload);

        let senders = self.inner.peer_senders();
        if senders.is_empty() {
            return;
        }
        let frame = Frame::Broadcast(Broadcast {
            channel: channel.to_string(),
            payload,
        });
        for sender in senders {
            // A closed link is cleaned up by its reader task
            let _ = sender.send(frame.clone());
        }
    }

    /// Register a listener for broadcasts on `channel`.
    ///
    /// The listener stays registered until the returned subscription is
    /// released or dropped.
    pub fn subscribe_to_broadcast<F>(
        &self,
        channel: impl Into<String>,
        listener: F,
    ) -> BroadcastSubscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let channel = channel.into();
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(channel.clone())
            .or_default()
            .insert(id, Arc::new(listener));

        BroadcastSubscription {
            endpoint: Arc::downgrade(&self.inner),
            channel,
            id,
            released: AtomicBool::new(false),
        }
    }

    /// Number of listeners registered for `channel`.
    pub fn listener_count(&self, channel: &str) -> usize {
        self.inner
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .map_or(0, BTreeMap::len)
    }

    /// Number of requests awaiting a reply.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }
}

impl std::fmt::Debug for IpcEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcEndpoint")
            .field("name", &self.inner.name)
            .field("peers", &self.peer_count())
            .field("pending", &self.pending_requests())
            .finish_non_exhaustive()
    }
}

impl EndpointInner {
    fn peers(&self) -> MutexGuard<'_, BTreeMap<PeerId, Peer>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn owner(&self) -> MutexGuard<'_, Option<PeerId>> {
        self.owner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handler(&self, channel: &str) -> Option<Handler> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .cloned()
    }

    fn attach(self: &Arc<Self>, link: Arc<dyn Link>, owner: bool) -> PeerId {
        let id = PeerId(self.next_peer.fetch_add(1, Ordering::Relaxed));
        let (outbound, rx) = mpsc::unbounded_channel();

        // Hold the table while spawning so a reader that exits at once finds
        // its entry to remove.
        let mut peers = self.peers();
        tokio::spawn(write_loop(
            Arc::downgrade(self),
            self.name.clone(),
            id,
            link.clone(),
            rx,
        ));
        let reader = tokio::spawn(read_loop(
            Arc::downgrade(self),
            id,
            link.clone(),
            outbound.clone(),
        ));
        peers.insert(
            id,
            Peer {
                outbound,
                link,
                reader,
            },
        );
        drop(peers);

        if owner {
            if let Some(previous) = self.owner().replace(id) {
                tracing::warn!(endpoint = %self.name, previous = previous.0, "replacing owner link");
            }
        }
        tracing::debug!(endpoint = %self.name, peer = id.0, owner, "link attached");
        id
    }

    fn forget_peer(&self, peer: PeerId) -> Option<Peer> {
        let removed = self.peers().remove(&peer)?;
        {
            let mut owner = self.owner();
            if *owner == Some(peer) {
                *owner = None;
            }
        }
        tracing::debug!(endpoint = %self.name, peer = peer.0, "link detached");

        // Hooks run with no endpoint lock held
        let hooks: Vec<DetachHook> = self
            .detach_hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for hook in hooks {
            hook(peer);
        }
        Some(removed)
    }

    fn owner_sender(&self) -> Option<mpsc::UnboundedSender<Frame>> {
        let owner = (*self.owner())?;
        self.peers().get(&owner).map(|p| p.outbound.clone())
    }

    fn peer_senders(&self) -> Vec<mpsc::UnboundedSender<Frame>> {
        self.peers().values().map(|p| p.outbound.clone()).collect()
    }

    fn on_frame(&self, peer: PeerId, frame: Frame, outbound: &mpsc::UnboundedSender<Frame>) {
        match frame {
            Frame::Request(request) => self.serve(peer, request, outbound.clone()),
            Frame::Reply(reply) => {
                if !self.pending.settle(reply.id, reply.outcome) {
                    tracing::debug!(
                        endpoint = %self.name,
                        peer = peer.0,
                        id = %reply.id,
                        "dropping reply for settled request"
                    );
                }
            }
            Frame::Broadcast(broadcast) => self.deliver(&broadcast.channel, &broadcast.payload),
        }
    }

    fn serve(&self, peer: PeerId, request: Request, outbound: mpsc::UnboundedSender<Frame>) {
        let Request { id, channel, args } = request;

        let Some(handler) = self.handler(&channel) else {
            tracing::warn!(endpoint = %self.name, %channel, "request for unhandled channel");
            let _ = outbound.send(Frame::Reply(Reply {
                id,
                outcome: ReplyOutcome::Rejected(RemoteFault::not_handled(&channel)),
            }));
            return;
        };

        tokio::spawn(async move {
            let outcome = match handler(Caller::Peer(peer), args).await {
                Ok(value) => ReplyOutcome::Resolved(value),
                Err(message) => {
                    tracing::debug!(%channel, "handler failed: {}", message);
                    ReplyOutcome::Rejected(RemoteFault::handler_failed(message))
                }
            };
            if outbound.send(Frame::Reply(Reply { id, outcome })).is_err() {
                tracing::debug!(%channel, %id, "requester link gone before reply");
            }
        });
    }

    fn deliver(&self, channel: &str, payload: &Value) {
        let listeners: Vec<Listener> = {
            let listeners = self
                .listeners
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            match listeners.get(channel) {
                Some(by_id) => by_id.values().cloned().collect(),
                None => return,
            }
        };

        for listener in listeners {
            listener(payload);
        }
    }

    fn remove_listener(&self, channel: &str, id: u64) {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(by_id) = listeners.get_mut(channel) {
            by_id.remove(&id);
            if by_id.is_empty() {
                listeners.remove(channel);
            }
        }
    }
}

impl Drop for EndpointInner {
    fn drop(&mut self) {
        let peers = self.peers.get_mut().unwrap_or_else(PoisonError::into_inner);
        for peer in peers.values() {
            peer.reader.abort();
        }
    }
}

async fn write_loop(
    inner: Weak<EndpointInner>,
    endpoint: String,
    peer: PeerId,
    link: Arc<dyn Link>,
    mut rx: mpsc::UnboundedReceiver<Frame>,
) {
    while let Some(frame) = rx.recv().await {
        let bytes = match frame.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(%endpoint, peer = peer.0, "dropping unencodable frame: {}", e);
                continue;
            }
        };
        let error = match link.send(&bytes).await {
            Ok(()) => continue,
            Err(LinkError::FrameTooLarge { size, max }) => {
                tracing::warn!(%endpoint, peer = peer.0, size, max, "dropping oversized frame");
                let Some(bytes) = oversized_reply(&frame, size, max) else {
                    continue;
                };
                match link.send(&bytes).await {
                    Ok(()) => continue,
                    Err(e) => e,
                }
            }
            Err(e) => e,
        };

        match error {
            LinkError::Closed => tracing::debug!(%endpoint, peer = peer.0, "link closed"),
            e => tracing::warn!(%endpoint, peer = peer.0, "link send failed: {}", e),
        }
        break;
    }

    // The link cannot carry frames any more
    let Some(inner) = inner.upgrade() else {
        return;
    };
    if let Some(entry) = inner.forget_peer(peer) {
        entry.reader.abort();
        if let Err(e) = entry.link.close().await {
            tracing::debug!(%endpoint, peer = peer.0, "closing link failed: {}", e);
        }
    }
}

/// Encoded failure standing in for a reply that exceeded the frame limit.
fn oversized_reply(frame: &Frame, size: usize, max: usize) -> Option<Vec<u8>> {
    let Frame::Reply(reply) = frame else {
        return None;
    };
    let fault = Frame::Reply(Reply {
        id: reply.id,
        outcome: ReplyOutcome::Rejected(RemoteFault::handler_failed(format!(
            "reply of {size} bytes exceeds the {max} byte frame limit"
        ))),
    });
    fault.to_bytes().ok()
}

async fn read_loop(
    endpoint: Weak<EndpointInner>,
    peer: PeerId,
    link: Arc<dyn Link>,
    outbound: mpsc::UnboundedSender<Frame>,
) {
    loop {
        let bytes = match link.recv().await {
            Ok(bytes) => bytes,
            Err(LinkError::Closed) => break,
            Err(e) => {
                tracing::warn!(peer = peer.0, "link receive failed: {}", e);
                break;
            }
        };

        let Some(inner) = endpoint.upgrade() else {
            return;
        };
        match Frame::from_bytes(&bytes) {
            Ok(frame) => inner.on_frame(peer, frame, &outbound),
            Err(e) => {
                tracing::warn!(endpoint = %inner.name, peer = peer.0, "dropping undecodable frame: {}", e)
            }
        }
    }

    if let Some(inner) = endpoint.upgrade() {
        inner.forget_peer(peer);
    }
}

/// Removes a request's entry if the requester stops waiting early.
struct PendingGuard<'a> {
    pending: &'a PendingRequests,
    id: link_types::CorrelationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.expire(self.id);
    }
}

/// Registration of one broadcast listener.
///
/// Releasing (explicitly or by drop) unregisters the listener; releasing
/// twice is a no-op.
#[must_use = "dropping the subscription unregisters the listener"]
pub struct BroadcastSubscription {
    endpoint: Weak<EndpointInner>,
    channel: String,
    id: u64,
    released: AtomicBool,
}

impl BroadcastSubscription {
    /// Channel this subscription listens on.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Unregister the listener.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(inner) = self.endpoint.upgrade() {
            inner.remove_listener(&self.channel, self.id);
        }
    }

    /// Whether the listener was unregistered.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Drop for BroadcastSubscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for BroadcastSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastSubscription")
            .field("channel", &self.channel)
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}
