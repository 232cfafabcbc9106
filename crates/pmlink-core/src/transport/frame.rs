//! Framed PDU stream over an arbitrary byte-duplex channel.
//!
//! Reads block until a full frame is available; there is deliberately no
//! per-read timeout (agents may idle for a long time). Cancellation is a
//! first-class operation instead: a [`CloseHandle`] may be triggered from any
//! task and unblocks a pending read with a connection-closed error.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::protocol::{Codec, Frame, Pdu};

/// Handle for closing a connection from another task.
///
/// Cloneable; triggering any clone unblocks reads on the owning stream.
#[derive(Debug, Clone)]
pub struct CloseHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CloseHandle {
    /// Mark the connection closed. Idempotent.
    pub fn close(&self) {
        let _ = self.tx.send(true);
    }
}

/// A duplex PDU channel over boxed async reader/writer halves.
pub struct FrameStream {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    buf: BytesMut,
    pid: u32,
    closed_tx: Arc<watch::Sender<bool>>,
    closed_rx: watch::Receiver<bool>,
}

impl FrameStream {
    /// Wrap reader/writer halves. `pid` goes into the header of every sent
    /// frame as the correlation field.
    pub fn new(
        reader: Box<dyn AsyncRead + Send + Unpin>,
        writer: Box<dyn AsyncWrite + Send + Unpin>,
        pid: u32,
    ) -> Self {
        let (closed_tx, closed_rx) = watch::channel(false);
        Self {
            reader,
            writer,
            buf: BytesMut::with_capacity(4096),
            pid,
            closed_tx: Arc::new(closed_tx),
            closed_rx,
        }
    }

    /// Handle that can close this stream from elsewhere.
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            tx: Arc::clone(&self.closed_tx),
        }
    }

    fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }

    /// Send one PDU.
    pub async fn send(&mut self, pdu: &Pdu) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        let encoded = Codec::encode(pdu, self.pid)?;
        self.writer.write_all(&encoded).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Receive the next frame, blocking until one is available.
    ///
    /// Returns `ConnectionClosed` on EOF or when a [`CloseHandle`] fires.
    pub async fn recv(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = Codec::decode(&mut self.buf)? {
                return Ok(frame);
            }
            if self.is_closed() {
                return Err(Error::ConnectionClosed);
            }
            tokio::select! {
                read = self.reader.read_buf(&mut self.buf) => {
                    if read? == 0 {
                        return Err(Error::ConnectionClosed);
                    }
                }
                _ = self.closed_rx.changed() => {
                    return Err(Error::ConnectionClosed);
                }
            }
        }
    }

    /// Receive with a deadline; only the credential handshake uses this.
    pub async fn recv_timeout(&mut self, timeout: std::time::Duration) -> Result<Frame> {
        tokio::time::timeout(timeout, self.recv())
            .await
            .map_err(|_| Error::Timeout)?
    }

    /// Shut down the write direction; errors ignored (teardown path).
    pub async fn shutdown(&mut self) {
        let _ = self.writer.shutdown().await;
        self.close_handle().close();
    }
}

impl std::fmt::Debug for FrameStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameStream")
            .field("pid", &self.pid)
            .field("buffered", &self.buf.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
