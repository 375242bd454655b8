//! Link abstraction for clusterlink IPC.
//!
//! A link is one bidirectional, ordered byte-frame connection between two
//! processes. The endpoint encodes [`Frame`](link_types::Frame)s on top of it.
//!
//! # Design
//!
//! The link trait is async and already connected:
//! - `send()` transmits one encoded frame
//! - `recv()` receives one encoded frame, in send order
//! - `close()` terminates both directions
//!
//! # Example
//!
//! ```ignore
//! let (owner_side, display_side) = MemoryLink::pair();
//! owner_side.send(&frame.to_bytes()?).await?;
//! let bytes = display_side.recv().await?;
//! ```

mod memory;
mod stream;

pub use memory::MemoryLink;
pub use stream::{StreamLink, MAX_FRAME_SIZE};

use async_trait::async_trait;
use thiserror::Error;

/// Link errors.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The link was closed by either side.
    #[error("link closed")]
    Closed,

    /// A frame exceeded the size limit.
    #[error("frame too large: {size} > {max}")]
    FrameTooLarge {
        /// Announced frame size.
        size: usize,
        /// Limit.
        max: usize,
    },

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Underlying I/O error.
    #[error("link i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// One ordered, bidirectional frame connection.
///
/// Implementations must allow `send()` and `recv()` to run concurrently from
/// different tasks.
#[async_trait]
pub trait Link: Send + Sync {
    /// Send one encoded frame.
    async fn send(&self, data: &[u8]) -> Result<(), LinkError>;

    /// Receive the next encoded frame.
    ///
    /// Waits until data is available or the link closes.
    async fn recv(&self) -> Result<Vec<u8>, LinkError>;

    /// Check if the link is still open.
    fn is_open(&self) -> bool;

    /// Close the link. Pending and future `recv()` calls return
    /// [`LinkError::Closed`].
    async fn close(&self) -> Result<(), LinkError>;
}
