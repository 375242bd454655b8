//! In-process link pair for tests and single-process embedding.
//!
//! Frames travel through unbounded channels, so `send()` never waits on the
//! peer. Failure injection mirrors what a real pipe can do: a failed send or
//! an abrupt close.

use super::{Link, LinkError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::{mpsc, watch};

/// One end of an in-memory link.
pub struct MemoryLink {
    outbound: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    closed: watch::Sender<bool>,
    fail_next_send: Mutex<Option<String>>,
    frames_sent: AtomicU64,
}

impl MemoryLink {
    /// Create two connected ends.
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (Self::new(a_tx, b_rx), Self::new(b_tx, a_rx))
    }

    fn new(outbound: mpsc::UnboundedSender<Vec<u8>>, inbound: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            outbound: Mutex::new(Some(outbound)),
            inbound: tokio::sync::Mutex::new(inbound),
            closed,
            fail_next_send: Mutex::new(None),
            frames_sent: AtomicU64::new(0),
        }
    }

    /// Cause the next `send()` to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        *self
            .fail_next_send
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error.to_string());
    }

    /// Number of frames sent through this end.
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for MemoryLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLink")
            .field("open", &self.is_open())
            .field("frames_sent", &self.frames_sent())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Link for MemoryLink {
    async fn send(&self, data: &[u8]) -> Result<(), LinkError> {
        if let Some(error) = self
            .fail_next_send
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            return Err(LinkError::SendFailed(error));
        }

        let outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = outbound.as_ref().ok_or(LinkError::Closed)?;
        sender.send(data.to_vec()).map_err(|_| LinkError::Closed)?;
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, LinkError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(LinkError::Closed);
        }

        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            biased;
            _ = closed.wait_for(|c| *c) => Err(LinkError::Closed),
            data = inbound.recv() => data.ok_or(LinkError::Closed),
        }
    }

    fn is_open(&self) -> bool {
        !*self.closed.borrow()
    }

    async fn close(&self) -> Result<(), LinkError> {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.closed.send_replace(true);
        Ok(())
    }
}
