//! Multiplexing client.
//!
//! One [`Client`] owns at most one live connection at a time. Any number of
//! tasks may call [`Client::request`] concurrently; requests are tagged with
//! fresh ids, written through a single outbound queue, and matched to their
//! responses by a background reader. Connections are (re)established lazily,
//! kept alive with heartbeats, and rotated after a configurable number of
//! requests.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use bytes::Bytes;
use multiplex_frame::{LengthPacker, Packer, Packet};
use multiplex_transport::{
    Connection, FramingOptions, SocketFactory, SocketOption, TcpSocketFactory,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::error::{Result, SocketError};
use crate::id::{IdGenerator, SequenceIdGenerator};
use crate::manager::{ChannelManager, QueueReceiver, WaitError, WriteQueue};
use crate::serializer::{Serializer, StringSerializer};

/// How often a rotation re-checks for in-flight requests.
const ROTATION_POLL_INTERVAL: Duration = Duration::from_millis(50);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builder for [`Client`].
pub struct ClientBuilder<S: Serializer = StringSerializer> {
    host: String,
    port: u16,
    config: ClientConfig,
    serializer: S,
    packer: Option<Arc<dyn Packer>>,
    id_generator: Arc<dyn IdGenerator>,
    factory: Arc<dyn SocketFactory>,
    shutdown: CancellationToken,
}

impl ClientBuilder<StringSerializer> {
    fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            config: ClientConfig::default(),
            serializer: StringSerializer,
            packer: None,
            id_generator: Arc::new(SequenceIdGenerator::new()),
            factory: Arc::new(TcpSocketFactory),
            shutdown: CancellationToken::new(),
        }
    }
}

impl<S: Serializer> ClientBuilder<S> {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the payload serializer. Both ends must agree on it.
    pub fn serializer<T: Serializer>(self, serializer: T) -> ClientBuilder<T> {
        ClientBuilder {
            host: self.host,
            port: self.port,
            config: self.config,
            serializer,
            packer: self.packer,
            id_generator: self.id_generator,
            factory: self.factory,
            shutdown: self.shutdown,
        }
    }

    /// Replace the packer. Defaults to a [`LengthPacker`] bounded by
    /// [`ClientConfig::package_max_length`].
    pub fn packer(mut self, packer: impl Packer + 'static) -> Self {
        self.packer = Some(Arc::new(packer));
        self
    }

    pub fn id_generator(mut self, generator: impl IdGenerator + 'static) -> Self {
        self.id_generator = Arc::new(generator);
        self
    }

    /// Replace how connections are opened.
    pub fn socket_factory(mut self, factory: impl SocketFactory + 'static) -> Self {
        self.factory = Arc::new(factory);
        self
    }

    /// Process-wide shutdown signal. Cancelling it stops the heartbeat,
    /// interrupts rotation waits and closes the client.
    pub fn shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn build(self) -> Client<S> {
        let packer = self
            .packer
            .unwrap_or_else(|| Arc::new(LengthPacker::new(self.config.package_max_length)));
        Client {
            inner: Arc::new(Inner {
                host: self.host,
                port: self.port,
                config: self.config,
                serializer: Arc::new(self.serializer),
                packer,
                id_generator: self.id_generator,
                factory: self.factory,
                channels: Arc::new(ChannelManager::new()),
                current: Mutex::new(None),
                connect_lock: tokio::sync::Mutex::new(()),
                generations: AtomicU64::new(0),
                heartbeat_started: AtomicBool::new(false),
                rotating: AtomicBool::new(false),
                shutdown: self.shutdown,
            }),
        }
    }
}

impl<S: Serializer> fmt::Debug for ClientBuilder<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Multiplexing client. Cheap to clone; clones share one connection.
pub struct Client<S: Serializer = StringSerializer> {
    inner: Arc<Inner<S>>,
}

impl<S: Serializer> Clone for Client<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Client<StringSerializer> {
    /// Client with default configuration and string payloads.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::builder(host, port).build()
    }

    pub fn builder(host: impl Into<String>, port: u16) -> ClientBuilder<StringSerializer> {
        ClientBuilder::new(host, port)
    }
}

impl<S: Serializer> Client<S> {
    /// Send `data` and wait for its response.
    pub async fn request(&self, data: &S::Value) -> Result<S::Value> {
        let id = self.send(data).await?;
        self.recv(id).await
    }

    /// Enqueue a request and return its id without waiting for the
    /// response. Pair with [`recv`](Self::recv).
    pub async fn send(&self, data: &S::Value) -> Result<u32> {
        self.rotate_if_exhausted().await;

        let generation = self.inner.connect().await?;
        let id = self.inner.id_generator.generate();
        self.inner.channels.get(id, true);
        let pending = Evict::new(&self.inner.channels, id);

        let body = self.inner.serializer.serialize(data)?;
        let frame = self.inner.packer.pack(&Packet::new(id, body))?;
        generation.queue.push(frame).await?;

        pending.disarm();
        trace!(id, "request queued");
        Ok(id)
    }

    /// Wait for the response to request `id`. The id's waiter is gone once
    /// this returns, whatever the outcome.
    pub async fn recv(&self, id: u32) -> Result<S::Value> {
        self.inner.connect().await?;

        let waiter = self
            .inner
            .channels
            .get(id, false)
            .ok_or(SocketError::ChannelLost(id))?;
        let _evict = Evict::new(&self.inner.channels, id);

        let timeout = self.inner.config.recv_timeout;
        let body = waiter.pop(timeout).await.map_err(|err| match err {
            WaitError::Timeout => SocketError::RecvTimeout { id, timeout },
            WaitError::Closed => SocketError::ChannelClosed(id),
            WaitError::Consumed => SocketError::ChannelLost(id),
        })?;

        Ok(self.inner.serializer.unserialize(body)?)
    }

    /// Tear down the current connection and fail every pending request.
    /// Idempotent; the next request reconnects.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Establish a connection now instead of on first use.
    pub async fn connect(&self) -> Result<()> {
        self.inner.connect().await.map(drop)
    }

    /// Whether a live connection is currently held.
    pub fn is_connected(&self) -> bool {
        self.inner.live_generation().is_some()
    }

    /// Frames written on the current connection.
    pub fn requests(&self) -> u64 {
        self.inner
            .current()
            .map_or(0, |generation| generation.requests.load(Ordering::Acquire))
    }

    pub fn channel_manager(&self) -> &ChannelManager<Bytes> {
        &self.inner.channels
    }

    pub fn serializer(&self) -> &S {
        &self.inner.serializer
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn host(&self) -> &str {
        &self.inner.host
    }

    pub fn port(&self) -> u16 {
        self.inner.port
    }

    /// Wait until no request is in flight, or `max_wait_close` elapses, or
    /// shutdown is signalled.
    pub async fn wait_until_idle(&self) {
        let deadline = tokio::time::Instant::now() + self.inner.config.max_wait_close;
        while !self.inner.channels.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::select! {
                biased;
                () = self.inner.shutdown.cancelled() => return,
                () = tokio::time::sleep(ROTATION_POLL_INTERVAL) => {}
            }
        }
    }

    async fn rotate_if_exhausted(&self) {
        let Some(limit) = self.inner.config.rotation_limit() else {
            return;
        };
        if self.requests() < limit {
            return;
        }
        // Only one caller drives the rotation; the rest carry on with the
        // connection they find.
        let Some(_rotation) = RotationGuard::acquire(&self.inner.rotating) else {
            return;
        };

        debug!(limit, "request limit reached, rotating connection");
        self.wait_until_idle().await;
        self.inner.close();
    }
}

impl<S: Serializer> fmt::Debug for Client<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("host", &self.inner.host)
            .field("port", &self.inner.port)
            .field("connected", &self.is_connected())
            .field("pending", &self.inner.channels.len())
            .finish()
    }
}

struct Inner<S: Serializer> {
    host: String,
    port: u16,
    config: ClientConfig,
    serializer: Arc<S>,
    packer: Arc<dyn Packer>,
    id_generator: Arc<dyn IdGenerator>,
    factory: Arc<dyn SocketFactory>,
    channels: Arc<ChannelManager<Bytes>>,
    current: Mutex<Option<Arc<Generation>>>,
    connect_lock: tokio::sync::Mutex<()>,
    generations: AtomicU64,
    heartbeat_started: AtomicBool,
    rotating: AtomicBool,
    shutdown: CancellationToken,
}

impl<S: Serializer> Inner<S> {
    fn current(&self) -> Option<Arc<Generation>> {
        lock(&self.current).clone()
    }

    fn live_generation(&self) -> Option<Arc<Generation>> {
        self.current().filter(|generation| !generation.is_closing())
    }

    async fn connect(self: &Arc<Self>) -> Result<Arc<Generation>> {
        self.start_heartbeat();

        if let Some(generation) = self.live_generation() {
            return Ok(generation);
        }

        let _guard = self.connect_lock.lock().await;
        if let Some(generation) = self.live_generation() {
            return Ok(generation);
        }

        let option = SocketOption {
            host: self.host.clone(),
            port: self.port,
            connect_timeout: self.config.connect_timeout,
            framing: FramingOptions {
                max_length: self.config.package_max_length,
            },
        };
        let connection = match self.factory.make(&option).await {
            Ok(connection) => Arc::new(connection),
            Err(err) => {
                warn!(addr = %option.addr(), error = %err, "connect failed");
                self.close();
                return Err(SocketError::ConnectFailed(err));
            }
        };

        let (queue, receiver) = self.channels.make(self.config.write_queue_capacity);
        let generation = Arc::new(Generation {
            id: self.generations.fetch_add(1, Ordering::Relaxed) + 1,
            queue,
            connection,
            requests: AtomicU64::new(0),
            torn_down: AtomicBool::new(false),
        });

        let idle = self.config.max_idle_time();
        tokio::spawn(read_loop(
            Arc::clone(&generation),
            Arc::clone(&self.channels),
            Arc::clone(&self.packer),
            idle,
        ));
        tokio::spawn(write_loop(
            Arc::clone(&generation),
            receiver,
            Arc::clone(&self.channels),
            idle,
        ));

        let previous = lock(&self.current).replace(Arc::clone(&generation));
        if let Some(previous) = previous {
            previous.shut();
        }

        info!(
            addr = %option.addr(),
            generation = generation.id,
            "connected"
        );
        Ok(generation)
    }

    fn close(&self) {
        let current = lock(&self.current).take();
        if let Some(generation) = current {
            debug!(generation = generation.id, "closing connection");
            generation.shut();
        }
        self.channels.flush();
    }

    fn start_heartbeat(self: &Arc<Self>) {
        let Some(interval) = self.config.heartbeat else {
            return;
        };
        if self.heartbeat_started.swap(true, Ordering::AcqRel) {
            return;
        }
        tokio::spawn(heartbeat_loop(
            Arc::downgrade(self),
            self.shutdown.clone(),
            interval,
        ));
    }
}

impl<S: Serializer> Drop for Inner<S> {
    fn drop(&mut self) {
        self.close();
    }
}

/// One connection and the state scoped to it.
struct Generation {
    id: u64,
    queue: WriteQueue,
    connection: Arc<Connection>,
    requests: AtomicU64,
    torn_down: AtomicBool,
}

impl Generation {
    fn is_closing(&self) -> bool {
        self.queue.is_closing() || self.connection.is_closed()
    }

    /// Close queue and connection. Returns true for the first caller only.
    fn shut(&self) -> bool {
        self.queue.close();
        self.connection.close();
        !self.torn_down.swap(true, Ordering::AcqRel)
    }

    /// Exit path for the reader and writer: the first one out fails every
    /// pending request. Both release the socket.
    async fn teardown(&self, channels: &ChannelManager<Bytes>) {
        if self.shut() {
            channels.flush();
        }
        self.connection.shutdown().await;
    }
}

async fn read_loop(
    generation: Arc<Generation>,
    channels: Arc<ChannelManager<Bytes>>,
    packer: Arc<dyn Packer>,
    idle: Option<Duration>,
) {
    loop {
        let frame = tokio::select! {
            biased;
            () = generation.queue.closed() => {
                debug!(generation = generation.id, "recv loop stopped, queue closed");
                break;
            }
            frame = generation.connection.read_frame(idle) => frame,
        };

        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                warn!(generation = generation.id, "recv loop broken, connection closed by peer");
                break;
            }
            Err(err) => {
                warn!(generation = generation.id, error = %err, "recv loop broken");
                break;
            }
        };

        let packet = match packer.unpack(frame) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(generation = generation.id, error = %err, "recv loop broken, bad frame");
                break;
            }
        };

        if packer.is_heartbeat(&packet) {
            trace!(generation = generation.id, "heartbeat received");
            continue;
        }

        let id = packet.id();
        match channels.get(id, false) {
            Some(waiter) => {
                if waiter.push(packet.into_body()).is_err() {
                    debug!(id, "response for closed waiter dropped");
                }
            }
            None => debug!(id, "response for unknown request dropped"),
        }
    }

    generation.teardown(&channels).await;
}

async fn write_loop(
    generation: Arc<Generation>,
    mut receiver: QueueReceiver,
    channels: Arc<ChannelManager<Bytes>>,
    idle: Option<Duration>,
) {
    while let Some(frame) = receiver.pop().await {
        if frame.is_empty() {
            continue;
        }
        if let Err(err) = generation.connection.write_all(&frame, idle).await {
            warn!(generation = generation.id, error = %err, "send loop broken");
            break;
        }
        generation.requests.fetch_add(1, Ordering::AcqRel);
    }

    debug!(generation = generation.id, "send loop stopped");
    generation.teardown(&channels).await;
}

async fn heartbeat_loop<S: Serializer>(
    inner: Weak<Inner<S>>,
    shutdown: CancellationToken,
    interval: Duration,
) {
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }

        let Some(inner) = inner.upgrade() else {
            return;
        };
        let Some(generation) = inner.live_generation() else {
            continue;
        };
        if !generation.queue.is_empty() {
            continue;
        }

        match inner.packer.pack(&Packet::ping()) {
            Ok(frame) => match generation.queue.try_push(frame) {
                Ok(()) => trace!(generation = generation.id, "heartbeat sent"),
                Err(err) => debug!(error = %err, "heartbeat skipped"),
            },
            Err(err) => warn!(error = %err, "heartbeat could not be packed"),
        }
    }

    if let Some(inner) = inner.upgrade() {
        debug!("shutdown signalled, closing client");
        inner.close();
    }
}

/// Unregisters a waiter when dropped unless disarmed.
struct Evict<'a> {
    channels: &'a ChannelManager<Bytes>,
    id: u32,
    armed: bool,
}

impl<'a> Evict<'a> {
    fn new(channels: &'a ChannelManager<Bytes>, id: u32) -> Self {
        Self {
            channels,
            id,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Evict<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.channels.close(self.id);
        }
    }
}

/// Holds the rotation flag; clears it on drop.
struct RotationGuard<'a>(&'a AtomicBool);

impl<'a> RotationGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RotationGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
