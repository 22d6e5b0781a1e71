//! Correlated packet format for multiplexed connections.
//!
//! Every message on the wire is framed with:
//! - A 4-byte big-endian length counting the bytes that follow it
//! - A 4-byte big-endian packet id correlating a response to its request
//! - The opaque body
//!
//! Id 0 is reserved for PING/PONG heartbeats.

pub mod channel;
pub mod codec;
pub mod error;
pub mod packet;

pub use channel::{id_label, is_heartbeat, CONTROL_ID, PING, PONG};
pub use codec::{LengthPacker, Packer, HEADER_SIZE, ID_SIZE};
pub use error::{FrameError, Result};
pub use packet::Packet;
