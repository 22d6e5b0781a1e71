//! Multiplexing server.
//!
//! Each accepted connection gets a reader task. Every frame it reads is
//! dispatched on its own task, so a slow handler never holds up other
//! requests on the same connection; responses are written back in whatever
//! order handlers finish, tagged with the id of the request they answer.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use multiplex_frame::{id_label, LengthPacker, Packer, Packet};
use multiplex_transport::{Connection, FramingOptions, TcpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::ServerConfig;
use crate::error::{Result, SocketError};
use crate::serializer::{Serializer, StringSerializer};

/// Error type handlers may fail with; its message becomes the response.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// What a handler resolves to.
pub type HandlerResult<T> = std::result::Result<T, HandlerError>;

type Handler<S> =
    Arc<dyn Fn(Packet, Arc<S>) -> BoxFuture<'static, HandlerResult<<S as Serializer>::Value>> + Send + Sync>;

/// Multiplexing server. Configure with [`bind`](Self::bind) and
/// [`handle`](Self::handle), then run with [`start`](Self::start).
pub struct Server<S: Serializer = StringSerializer> {
    serializer: Arc<S>,
    packer: Option<Arc<dyn Packer>>,
    socket: Option<TcpSocket>,
    handler: Option<Handler<S>>,
    shutdown: CancellationToken,
}

impl Server<StringSerializer> {
    pub fn new() -> Self {
        Self::with_serializer(StringSerializer)
    }
}

impl Default for Server<StringSerializer> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Serializer> Server<S> {
    pub fn with_serializer(serializer: S) -> Self {
        Self {
            serializer: Arc::new(serializer),
            packer: None,
            socket: None,
            handler: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Replace the packer. Defaults to a [`LengthPacker`] bounded by
    /// [`ServerConfig::package_max_length`].
    pub fn packer(mut self, packer: impl Packer + 'static) -> Self {
        self.packer = Some(Arc::new(packer));
        self
    }

    /// Cancelling `token` stops accepting and closes open connections.
    pub fn shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Bind the listening socket. Port 0 picks a free port; see
    /// [`local_addr`](Self::local_addr).
    pub async fn bind(mut self, host: &str, port: u16, config: &ServerConfig) -> Result<Self> {
        if let Some(socket) = &self.socket {
            return Err(SocketError::BindFailed(format!(
                "server already bound to {}",
                socket.local_addr()
            )));
        }

        let framing = FramingOptions {
            max_length: config.package_max_length,
        };
        self.socket = Some(TcpSocket::bind(host, port, framing).await?);
        Ok(self)
    }

    /// Register the request handler. It receives the decoded packet and
    /// the server's serializer and returns the response value.
    pub fn handle<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Packet, Arc<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<S::Value>> + Send + 'static,
    {
        self.handler = Some(Arc::new(move |packet: Packet, serializer: Arc<S>| {
            handler(packet, serializer).boxed()
        }));
        self
    }

    /// Address the server is bound to, if bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().map(TcpSocket::local_addr)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accept connections until shutdown is signalled.
    pub async fn start(self) -> Result<()> {
        let socket = self
            .socket
            .ok_or_else(|| SocketError::StartFailed("server is not bound".into()))?;
        let handler = self
            .handler
            .ok_or_else(|| SocketError::StartFailed("no handler registered".into()))?;
        let packer = self
            .packer
            .unwrap_or_else(|| Arc::new(LengthPacker::new(socket.framing().max_length)));

        let dispatcher = Arc::new(Dispatcher {
            serializer: self.serializer,
            packer,
            handler,
        });

        info!(addr = %socket.local_addr(), "server started");
        loop {
            let accepted = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                accepted = socket.accept() => accepted,
            };

            match accepted {
                Ok(connection) => {
                    debug!(peer = %connection.peer(), "connection accepted");
                    tokio::spawn(serve_connection(
                        Arc::new(connection),
                        Arc::clone(&dispatcher),
                        self.shutdown.clone(),
                    ));
                }
                Err(err) => warn!(error = %err, "accept failed"),
            }
        }

        info!(addr = %socket.local_addr(), "server stopped");
        Ok(())
    }
}

impl<S: Serializer> fmt::Debug for Server<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr())
            .field("has_handler", &self.handler.is_some())
            .finish_non_exhaustive()
    }
}

async fn serve_connection<S: Serializer>(
    connection: Arc<Connection>,
    dispatcher: Arc<Dispatcher<S>>,
    shutdown: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            frame = connection.read_frame(None) => frame,
        };

        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!(peer = %connection.peer(), "connection closed by peer");
                break;
            }
            Err(err) => {
                warn!(peer = %connection.peer(), error = %err, "dropping connection");
                break;
            }
        };

        // Framing can't be trusted after a bad frame.
        let packet = match dispatcher.packer.unpack(frame) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(peer = %connection.peer(), error = %err, "undecodable frame, dropping connection");
                break;
            }
        };

        let connection = Arc::clone(&connection);
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move { dispatcher.dispatch(&connection, packet).await });
    }
    connection.shutdown().await;
}

struct Dispatcher<S: Serializer> {
    serializer: Arc<S>,
    packer: Arc<dyn Packer>,
    handler: Handler<S>,
}

impl<S: Serializer> Dispatcher<S> {
    async fn dispatch(&self, connection: &Connection, packet: Packet) {
        let id = packet.id();
        trace!(
            peer = %connection.peer(),
            id,
            kind = id_label(id, packet.body()),
            size = packet.body().len(),
            "frame received"
        );
        let reply = if self.packer.is_heartbeat(&packet) {
            Packet::pong()
        } else {
            Packet::new(id, self.respond(packet).await)
        };

        let frame = match self.packer.pack(&reply) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(id, error = %err, "response could not be packed");
                let body = self.error_body(&err.to_string());
                match self.packer.pack(&Packet::new(id, body)) {
                    Ok(frame) => frame,
                    Err(err) => {
                        error!(id, error = %err, "error response could not be packed");
                        return;
                    }
                }
            }
        };

        if let Err(err) = connection.write_all(&frame, None).await {
            debug!(id, peer = %connection.peer(), error = %err, "response not delivered");
        }
    }

    async fn respond(&self, packet: Packet) -> Bytes {
        let id = packet.id();
        let task = tokio::spawn((self.handler)(packet, Arc::clone(&self.serializer)));

        let value = match task.await {
            Ok(Ok(value)) => value,
            Ok(Err(err)) => {
                warn!(id, error = %err, "handler failed");
                return self.error_body(&err.to_string());
            }
            Err(err) => {
                error!(id, error = %err, "handler panicked");
                return self.error_body("handler panicked");
            }
        };

        match self.serializer.serialize(&value) {
            Ok(body) => body,
            Err(err) => {
                warn!(id, error = %err, "response could not be serialized");
                self.error_body(&err.to_string())
            }
        }
    }

    fn error_body(&self, message: &str) -> Bytes {
        self.serializer
            .serialize_error(message)
            .unwrap_or_else(|_| Bytes::copy_from_slice(message.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use multiplex_transport::SocketOption;

    use super::*;

    fn hello_server() -> Server {
        Server::new().handle(|packet: Packet, serializer: Arc<StringSerializer>| async move {
            let _ = serializer.unserialize(packet.into_body())?;
            Ok::<_, HandlerError>("Hello World.".to_string())
        })
    }

    async fn connect(addr: SocketAddr) -> Connection {
        TcpSocket::connect(&SocketOption {
            host: addr.ip().to_string(),
            port: addr.port(),
            connect_timeout: Duration::from_secs(1),
            framing: FramingOptions::default(),
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn start_without_bind_fails() {
        let err = hello_server().start().await.unwrap_err();
        assert!(matches!(err, SocketError::StartFailed(_)));
    }

    #[tokio::test]
    async fn start_without_handler_fails() {
        let server = Server::new()
            .bind("127.0.0.1", 0, &ServerConfig::default())
            .await
            .unwrap();
        let err = server.start().await.unwrap_err();
        assert!(matches!(err, SocketError::StartFailed(_)));
    }

    #[tokio::test]
    async fn double_bind_fails() {
        let server = hello_server()
            .bind("127.0.0.1", 0, &ServerConfig::default())
            .await
            .unwrap();
        let err = server
            .bind("127.0.0.1", 0, &ServerConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SocketError::BindFailed(_)));
    }

    #[tokio::test]
    async fn answers_ping_with_pong_and_requests_with_handler() {
        let server = hello_server()
            .bind("127.0.0.1", 0, &ServerConfig::default())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = server.shutdown_token();
        let running = tokio::spawn(server.start());

        let packer = LengthPacker::default();
        let conn = connect(addr).await;

        conn.write_all(&packer.pack(&Packet::ping()).unwrap(), None)
            .await
            .unwrap();
        let pong = packer
            .unpack(conn.read_frame(None).await.unwrap().unwrap())
            .unwrap();
        assert_eq!(pong, Packet::pong());

        conn.write_all(&packer.pack(&Packet::new(7, "Hi")).unwrap(), None)
            .await
            .unwrap();
        let reply = packer
            .unpack(conn.read_frame(None).await.unwrap().unwrap())
            .unwrap();
        assert_eq!(reply, Packet::new(7, "Hello World."));

        shutdown.cancel();
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn handler_error_becomes_response_body() {
        let server = Server::new()
            .handle(|_packet, _serializer| async move {
                Err::<String, HandlerError>("Server Error.".into())
            })
            .bind("127.0.0.1", 0, &ServerConfig::default())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = server.shutdown_token();
        let running = tokio::spawn(server.start());

        let packer = LengthPacker::default();
        let conn = connect(addr).await;
        conn.write_all(&packer.pack(&Packet::new(3, "x")).unwrap(), None)
            .await
            .unwrap();
        let reply = packer
            .unpack(conn.read_frame(None).await.unwrap().unwrap())
            .unwrap();
        assert_eq!(reply, Packet::new(3, "Server Error."));

        shutdown.cancel();
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn frame_without_id_drops_connection() {
        let server = hello_server()
            .bind("127.0.0.1", 0, &ServerConfig::default())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = server.shutdown_token();
        let running = tokio::spawn(server.start());

        let conn = connect(addr).await;
        conn.write_all(&[0, 0, 0, 2, 1, 2], None).await.unwrap();

        let next = conn.read_frame(Some(Duration::from_secs(2))).await.unwrap();
        assert!(next.is_none());

        shutdown.cancel();
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn oversized_frame_drops_connection() {
        let server = hello_server()
            .bind(
                "127.0.0.1",
                0,
                &ServerConfig {
                    package_max_length: 64,
                },
            )
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = server.shutdown_token();
        let running = tokio::spawn(server.start());

        let conn = connect(addr).await;
        let frame = LengthPacker::default()
            .pack(&Packet::new(1, vec![b'x'; 128]))
            .unwrap();
        conn.write_all(&frame, None).await.unwrap();

        let next = conn.read_frame(Some(Duration::from_secs(2))).await;
        assert!(matches!(next, Ok(None) | Err(_)), "expected drop, got {next:?}");

        shutdown.cancel();
        running.await.unwrap().unwrap();
    }
}
