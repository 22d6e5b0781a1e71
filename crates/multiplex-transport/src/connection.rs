use std::fmt;
use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::codec::{FrameCodec, FramingOptions};
use crate::error::{Result, TransportError};

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// A connected, length-framed byte stream.
///
/// Reading and writing go through separate locks so one task can block on
/// [`read_frame`](Self::read_frame) while another writes. [`close`](Self::close)
/// interrupts both and is idempotent; [`shutdown`](Self::shutdown) also
/// releases the underlying stream.
pub struct Connection {
    peer: String,
    reader: Mutex<Option<FramedRead<BoxedRead, FrameCodec>>>,
    writer: Mutex<Option<BoxedWrite>>,
    closed: CancellationToken,
}

impl Connection {
    /// Wrap any async stream, applying the given framing options to reads.
    pub fn new<T>(stream: T, peer: impl Into<String>, options: FramingOptions) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let read_half: BoxedRead = Box::new(read_half);
        let write_half: BoxedWrite = Box::new(write_half);
        Self {
            peer: peer.into(),
            reader: Mutex::new(Some(FramedRead::new(
                read_half,
                FrameCodec::new(options),
            ))),
            writer: Mutex::new(Some(write_half)),
            closed: CancellationToken::new(),
        }
    }

    /// Read the next whole frame, length prefix included.
    ///
    /// Returns `Ok(None)` when the peer closed the stream cleanly. With
    /// `idle = Some(d)`, fails with [`TransportError::IdleTimeout`] if nothing
    /// arrives within `d`.
    pub async fn read_frame(&self, idle: Option<Duration>) -> Result<Option<Bytes>> {
        let mut guard = tokio::select! {
            biased;
            () = self.closed.cancelled() => return Err(TransportError::Closed),
            guard = self.reader.lock() => guard,
        };
        let reader = guard.as_mut().ok_or(TransportError::Closed)?;

        let next = tokio::select! {
            biased;
            () = self.closed.cancelled() => return Err(TransportError::Closed),
            next = with_idle_timeout(idle, reader.next()) => next?,
        };

        match next {
            None => Ok(None),
            Some(frame) => frame.map(|bytes| Some(bytes.freeze())),
        }
    }

    /// Write a complete frame and flush it.
    pub async fn write_all(&self, frame: &[u8], idle: Option<Duration>) -> Result<()> {
        let mut guard = tokio::select! {
            biased;
            () = self.closed.cancelled() => return Err(TransportError::Closed),
            guard = self.writer.lock() => guard,
        };
        let writer = guard.as_mut().ok_or(TransportError::Closed)?;

        let write = async {
            writer.write_all(frame).await?;
            writer.flush().await
        };

        tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(TransportError::Closed),
            written = with_idle_timeout(idle, write) => Ok(written??),
        }
    }

    /// Close the connection. Pending and future reads/writes fail with
    /// [`TransportError::Closed`]. The stream itself stays open until
    /// [`shutdown`](Self::shutdown) or the last handle is dropped.
    pub fn close(&self) {
        if !self.closed.is_cancelled() {
            debug!(peer = %self.peer, "closing connection");
            self.closed.cancel();
        }
    }

    /// Close the connection and drop the stream, so the peer sees EOF
    /// without waiting for every handle to be released. Idempotent.
    pub async fn shutdown(&self) {
        self.close();

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(err) = writer.shutdown().await {
                debug!(peer = %self.peer, error = %err, "write shutdown failed");
            }
        }
        drop(self.reader.lock().await.take());
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Remote address (or label) of this connection.
    pub fn peer(&self) -> &str {
        &self.peer
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}

async fn with_idle_timeout<F: Future>(idle: Option<Duration>, fut: F) -> Result<F::Output> {
    match idle {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| TransportError::IdleTimeout(limit)),
        None => Ok(fut.await),
    }
}
