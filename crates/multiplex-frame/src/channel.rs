//! Reserved control traffic.
//!
//! Packet id 0 never correlates a request. Frames with id 0 and one of the
//! sentinel bodies below are heartbeats and are never handed to user code.

/// Packet id reserved for control traffic.
pub const CONTROL_ID: u32 = 0;

/// Heartbeat request body, sent by clients on idle connections.
pub const PING: &[u8] = b"ping";

/// Heartbeat reply body, sent by servers in answer to [`PING`].
pub const PONG: &[u8] = b"pong";

/// Returns true if `id` and `body` form a heartbeat frame.
pub fn is_heartbeat(id: u32, body: &[u8]) -> bool {
    id == CONTROL_ID && (body == PING || body == PONG)
}

/// Human-readable label for a packet id in diagnostics.
pub fn id_label(id: u32, body: &[u8]) -> &'static str {
    match id {
        CONTROL_ID if body == PING => "PING",
        CONTROL_ID if body == PONG => "PONG",
        CONTROL_ID => "CONTROL",
        _ => "REQUEST",
    }
}
