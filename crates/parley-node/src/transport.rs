//! TCP transport -- framed read/write halves of one peer connection.
//!
//! The read half stays with the connection's handler task; the write half is
//! shared (behind a lock in the session) so the driver can send on it too.

use std::time::Duration;

use bytes::BytesMut;
use parley_protocol::codec::encode_frame;
use parley_protocol::{Message, MessageCodec, ProtocolError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::Decoder;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection closed by peer")]
    Closed,
    #[error("connection closed mid-frame ({buffered} bytes buffered)")]
    TruncatedFrame { buffered: usize },
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Split a connected stream into its framed halves.
pub fn split(stream: TcpStream) -> (FrameReader, FrameWriter) {
    let (read, write) = stream.into_split();
    (FrameReader::new(read), FrameWriter::new(write))
}

/// Reads length-prefixed messages, buffering partial frames between calls.
///
/// `read_message` is cancel-safe: bytes read before a cancelled call stay
/// buffered for the next one.
pub struct FrameReader {
    inner: OwnedReadHalf,
    buf: BytesMut,
    codec: MessageCodec,
}

impl FrameReader {
    pub fn new(inner: OwnedReadHalf) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(8 * 1024),
            codec: MessageCodec,
        }
    }

    /// Read the next complete message.
    pub async fn read_message(&mut self) -> Result<Message, TransportError> {
        loop {
            if let Some(message) = self.codec.decode(&mut self.buf)? {
                return Ok(message);
            }
            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(if self.buf.is_empty() {
                    TransportError::Closed
                } else {
                    TransportError::TruncatedFrame {
                        buffered: self.buf.len(),
                    }
                });
            }
        }
    }

    /// Whether the remote side has closed, waiting at most `wait` to find out.
    /// Bytes that arrive during the probe are kept for a later read.
    pub async fn probe_closed(&mut self, wait: Duration) -> bool {
        match tokio::time::timeout(wait, self.inner.read_buf(&mut self.buf)).await {
            Ok(Ok(0)) => true,
            Ok(Ok(_)) => false,
            Ok(Err(_)) => true,
            Err(_) => false,
        }
    }
}

/// Writes length-prefixed messages.
pub struct FrameWriter {
    inner: OwnedWriteHalf,
}

impl FrameWriter {
    pub fn new(inner: OwnedWriteHalf) -> Self {
        Self { inner }
    }

    pub async fn write_message(&mut self, message: &Message) -> Result<(), TransportError> {
        let frame = encode_frame(message)?;
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Close our side of the connection.
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.inner.shutdown().await {
            tracing::debug!(error = %e, "transport: shutdown of write half failed");
        }
    }
}
