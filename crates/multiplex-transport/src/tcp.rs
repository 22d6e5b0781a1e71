use std::net::SocketAddr;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::codec::FramingOptions;
use crate::connection::Connection;
use crate::error::{Result, TransportError};
use crate::traits::{SocketFactory, SocketOption};

/// TCP listening socket producing framed [`Connection`]s.
#[derive(Debug)]
pub struct TcpSocket {
    listener: TcpListener,
    local_addr: SocketAddr,
    framing: FramingOptions,
}

impl TcpSocket {
    /// Bind and listen on `host:port`. Port `0` picks a free port.
    pub async fn bind(host: &str, port: u16, framing: FramingOptions) -> Result<Self> {
        let addr = format!("{host}:{port}");
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| TransportError::Bind {
                addr: addr.clone(),
                source: e,
            })?;
        let local_addr = listener.local_addr().map_err(|e| TransportError::Bind {
            addr: addr.clone(),
            source: e,
        })?;

        info!(%local_addr, max_length = framing.max_length, "listening on tcp socket");

        Ok(Self {
            listener,
            local_addr,
            framing,
        })
    }

    /// Accept the next incoming connection.
    pub async fn accept(&self) -> Result<Connection> {
        let (stream, peer) = self.listener.accept().await.map_err(TransportError::Accept)?;
        // Frames are small and latency-bound.
        stream.set_nodelay(true)?;
        debug!(%peer, "accepted connection");
        Ok(Connection::new(stream, peer.to_string(), self.framing))
    }

    /// Connect to `option.host:option.port` within `option.connect_timeout`.
    pub async fn connect(option: &SocketOption) -> Result<Connection> {
        let addr = option.addr();
        let stream = match tokio::time::timeout(
            option.connect_timeout,
            TcpStream::connect(addr.as_str()),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(TransportError::Connect { addr, source }),
            Err(_) => {
                return Err(TransportError::ConnectTimeout {
                    addr,
                    timeout: option.connect_timeout,
                })
            }
        };
        stream.set_nodelay(true)?;
        debug!(%addr, "connected to tcp socket");
        Ok(Connection::new(stream, addr, option.framing))
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Framing applied to accepted connections.
    pub fn framing(&self) -> FramingOptions {
        self.framing
    }
}

/// [`SocketFactory`] opening plain TCP connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpSocketFactory;

impl SocketFactory for TcpSocketFactory {
    fn make<'a>(&'a self, option: &'a SocketOption) -> BoxFuture<'a, Result<Connection>> {
        TcpSocket::connect(option).boxed()
    }
}
