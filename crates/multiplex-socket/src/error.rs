use std::time::Duration;

use multiplex_frame::FrameError;
use multiplex_transport::TransportError;

use crate::serializer::SerializeError;

/// Errors that can occur in client and server operations.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    /// The transport could not establish a connection.
    #[error("client connect failed: {0}")]
    ConnectFailed(#[source] TransportError),

    /// A frame could not be handed to the connection's writer.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// No response arrived for the request within the receive timeout.
    #[error("recv channel [{id}] pop timeout after {timeout:?}")]
    RecvTimeout { id: u32, timeout: Duration },

    /// The connection died while the caller was waiting.
    #[error("recv channel [{0}] closed")]
    ChannelClosed(u32),

    /// No waiter is registered for the request id.
    #[error("recv channel [{0}] lost")]
    ChannelLost(u32),

    /// Packet encoding/decoding error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Payload serialization error.
    #[error("serializer error: {0}")]
    Serialize(#[from] SerializeError),

    /// The server could not be bound.
    #[error("bind failed: {0}")]
    BindFailed(String),

    /// The server could not be started.
    #[error("start failed: {0}")]
    StartFailed(String),

    /// Configuration could not be parsed.
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SocketError>;
