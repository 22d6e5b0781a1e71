//! Pending-request registry and per-connection outbound queue.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SocketError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Why [`Waiter::pop`] returned without a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// Nothing arrived in time.
    Timeout,
    /// The waiter was closed before a value arrived.
    Closed,
    /// Another caller already popped this waiter.
    Consumed,
}

/// One-shot slot for the response to a single request.
///
/// Exactly one value can ever be pushed; closing wakes a pending
/// [`pop`](Waiter::pop) with [`WaitError::Closed`].
pub struct Waiter<T> {
    tx: Mutex<Option<oneshot::Sender<T>>>,
    rx: Mutex<Option<oneshot::Receiver<T>>>,
}

impl<T> Waiter<T> {
    fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Deliver `value`. Hands it back if the waiter is closed or already
    /// filled, or if its receiver went away.
    pub fn push(&self, value: T) -> std::result::Result<(), T> {
        match lock(&self.tx).take() {
            Some(tx) => tx.send(value),
            None => Err(value),
        }
    }

    /// Wait up to `timeout` for the value.
    pub async fn pop(&self, timeout: Duration) -> std::result::Result<T, WaitError> {
        let rx = lock(&self.rx).take().ok_or(WaitError::Consumed)?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(WaitError::Closed),
            Err(_) => Err(WaitError::Timeout),
        }
    }

    /// Stop accepting values. Idempotent.
    pub fn close(&self) {
        lock(&self.tx).take();
    }

    /// True once closed or filled.
    pub fn is_closed(&self) -> bool {
        lock(&self.tx).is_none()
    }
}

impl<T> fmt::Debug for Waiter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Registry of waiters keyed by request id.
///
/// All operations are atomic with respect to each other; flushing closes
/// every waiter registered at that moment and leaves the registry empty.
pub struct ChannelManager<T> {
    channels: Mutex<HashMap<u32, Arc<Waiter<T>>>>,
}

impl<T> ChannelManager<T> {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Look up the waiter for `id`, registering a fresh one when `create`
    /// is set and none exists.
    pub fn get(&self, id: u32, create: bool) -> Option<Arc<Waiter<T>>> {
        let mut channels = lock(&self.channels);
        if let Some(waiter) = channels.get(&id) {
            return Some(Arc::clone(waiter));
        }
        if !create {
            return None;
        }
        let waiter = Arc::new(Waiter::new());
        channels.insert(id, Arc::clone(&waiter));
        Some(waiter)
    }

    /// Create an outbound queue for a new connection.
    pub fn make(&self, capacity: usize) -> (WriteQueue, QueueReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let closing = CancellationToken::new();
        (
            WriteQueue {
                tx,
                closing: closing.clone(),
            },
            QueueReceiver { rx, closing },
        )
    }

    /// Close and unregister the waiter for `id`, if any.
    pub fn close(&self, id: u32) {
        let waiter = lock(&self.channels).remove(&id);
        if let Some(waiter) = waiter {
            waiter.close();
        }
    }

    /// Close and unregister every waiter.
    pub fn flush(&self) {
        let drained: Vec<_> = lock(&self.channels).drain().collect();
        for (_, waiter) in drained {
            waiter.close();
        }
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.channels).is_empty()
    }

    pub fn len(&self) -> usize {
        lock(&self.channels).len()
    }
}

impl<T> Default for ChannelManager<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ChannelManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelManager")
            .field("pending", &self.len())
            .finish()
    }
}

/// Producer side of a connection's bounded outbound queue.
#[derive(Debug, Clone)]
pub struct WriteQueue {
    tx: mpsc::Sender<Bytes>,
    closing: CancellationToken,
}

impl WriteQueue {
    /// Enqueue a frame, waiting for room. Fails once the queue is closing.
    pub async fn push(&self, frame: Bytes) -> Result<()> {
        if self.closing.is_cancelled() {
            return Err(queue_closed());
        }
        tokio::select! {
            biased;
            () = self.closing.cancelled() => Err(queue_closed()),
            sent = self.tx.send(frame) => sent.map_err(|_| queue_closed()),
        }
    }

    /// Enqueue a frame only if there is room right now.
    pub fn try_push(&self, frame: Bytes) -> Result<()> {
        if self.closing.is_cancelled() {
            return Err(queue_closed());
        }
        self.tx
            .try_send(frame)
            .map_err(|err| SocketError::SendFailed(err.to_string()))
    }

    /// Close the queue. Idempotent; pending frames are discarded.
    pub fn close(&self) {
        self.closing.cancel();
    }

    pub fn is_closing(&self) -> bool {
        self.closing.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves once the queue is closing.
    pub async fn closed(&self) {
        tokio::select! {
            () = self.closing.cancelled() => {}
            () = self.tx.closed() => {}
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tx.capacity() == self.tx.max_capacity()
    }

    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

fn queue_closed() -> SocketError {
    SocketError::SendFailed("write queue closed".into())
}

/// Consumer side of a [`WriteQueue`], owned by the connection's writer.
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::Receiver<Bytes>,
    closing: CancellationToken,
}

impl QueueReceiver {
    /// Next frame, or `None` once the queue is closing.
    pub async fn pop(&mut self) -> Option<Bytes> {
        tokio::select! {
            biased;
            () = self.closing.cancelled() => None,
            frame = self.rx.recv() => frame,
        }
    }
}
