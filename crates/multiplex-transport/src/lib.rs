//! TCP transport for multiplexed connections.
//!
//! This is the lowest layer of multiplex. It opens and accepts TCP streams
//! and applies length-check framing to them: every frame starts with a
//! 4-byte big-endian length, and frames above a configured maximum are
//! rejected before their body is buffered. Everything else builds on the
//! [`Connection`] type provided here.

pub mod codec;
pub mod connection;
pub mod error;
pub mod tcp;
pub mod traits;

pub use codec::{FrameCodec, FramingOptions, DEFAULT_MAX_LENGTH, LENGTH_HEADER_SIZE};
pub use connection::Connection;
pub use error::{Result, TransportError};
pub use tcp::{TcpSocket, TcpSocketFactory};
pub use traits::{SocketFactory, SocketOption};
