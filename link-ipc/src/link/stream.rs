//! Length-prefixed link over any async byte stream.
//!
//! Wire layout per frame: 4-byte big-endian length, then the encoded frame.
//! Works over Unix sockets, pipes and `tokio::io::duplex`.

use super::{Link, LinkError};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};

/// Largest frame accepted in either direction (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Link over a reader/writer pair.
pub struct StreamLink<R, W> {
    reader: Mutex<R>,
    writer: Mutex<W>,
    closed: watch::Sender<bool>,
}

impl<R, W> StreamLink<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Wrap the two halves of a connected stream.
    pub fn new(reader: R, writer: W) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closed,
        }
    }

    async fn read_frame(reader: &mut R) -> Result<Vec<u8>, LinkError> {
        // Read 4-byte length prefix (big-endian)
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(LinkError::Closed)
            }
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_be_bytes(len_buf) as usize;

        if len > MAX_FRAME_SIZE {
            return Err(LinkError::FrameTooLarge {
                size: len,
                max: MAX_FRAME_SIZE,
            });
        }

        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                LinkError::Closed
            } else {
                e.into()
            }
        })?;
        Ok(buf)
    }
}

impl<R, W> std::fmt::Debug for StreamLink<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamLink")
            .field("open", &!*self.closed.borrow())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<R, W> Link for StreamLink<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&self, data: &[u8]) -> Result<(), LinkError> {
        if !self.is_open() {
            return Err(LinkError::Closed);
        }
        if data.len() > MAX_FRAME_SIZE {
            return Err(LinkError::FrameTooLarge {
                size: data.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        let mut writer = self.writer.lock().await;
        writer.write_all(&(data.len() as u32).to_be_bytes()).await?;
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, LinkError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(LinkError::Closed);
        }

        let mut reader = self.reader.lock().await;
        tokio::select! {
            biased;
            _ = closed.wait_for(|c| *c) => Err(LinkError::Closed),
            frame = Self::read_frame(&mut reader) => frame,
        }
    }

    fn is_open(&self) -> bool {
        !*self.closed.borrow()
    }

    async fn close(&self) -> Result<(), LinkError> {
        if self.closed.send_replace(true) {
            return Ok(());
        }
        let mut writer = self.writer.lock().await;
        writer.shutdown().await?;
        Ok(())
    }
}
