//! Many concurrent requests over one TCP connection.
//!
//! multiplex tags every request with an id, writes all of them through a
//! single connection, and routes each response back to the caller waiting
//! on its id. Idle connections are kept alive with heartbeats, broken ones
//! are re-established on the next request, and busy ones can be rotated
//! after a fixed number of requests.
//!
//! # Crate Structure
//!
//! - [`transport`] — TCP connect/bind/accept and length-checked framing
//! - [`frame`] — Packets, the packer and heartbeat sentinels
//! - [`socket`] — Client, server and the pending-request registry (behind `socket` feature)

/// Re-export transport types.
pub mod transport {
    pub use multiplex_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use multiplex_frame::*;
}

/// Re-export client and server types (requires `socket` feature).
#[cfg(feature = "socket")]
pub mod socket {
    pub use multiplex_socket::*;
}
