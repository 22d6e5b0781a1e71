use std::fmt;
use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::codec::FramingOptions;
use crate::connection::Connection;
use crate::error::Result;

/// Everything a [`SocketFactory`] needs to open one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketOption {
    /// Host name or IP address of the server.
    pub host: String,
    /// TCP port of the server.
    pub port: u16,
    /// Upper bound on establishing the connection.
    pub connect_timeout: Duration,
    /// Framing applied to frames read from the connection.
    pub framing: FramingOptions,
}

impl SocketOption {
    /// `host:port` form used for connecting and in diagnostics.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Opens connections for a client.
///
/// The default implementation is [`TcpSocketFactory`](crate::TcpSocketFactory);
/// tests substitute in-memory streams.
pub trait SocketFactory: Send + Sync + fmt::Debug {
    /// Open a new framed connection.
    fn make<'a>(&'a self, option: &'a SocketOption) -> BoxFuture<'a, Result<Connection>>;
}
