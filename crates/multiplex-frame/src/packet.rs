use bytes::Bytes;

use crate::channel::{self, CONTROL_ID, PING, PONG};

/// A correlated message: request id plus opaque body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    id: u32,
    body: Bytes,
}

impl Packet {
    /// Create a new packet.
    pub fn new(id: u32, body: impl Into<Bytes>) -> Self {
        Self {
            id,
            body: body.into(),
        }
    }

    /// Heartbeat request.
    pub fn ping() -> Self {
        Self::new(CONTROL_ID, Bytes::from_static(PING))
    }

    /// Heartbeat reply.
    pub fn pong() -> Self {
        Self::new(CONTROL_ID, Bytes::from_static(PONG))
    }

    /// Correlation id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Message body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Consume the packet and return its body.
    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// True for id-0 PING/PONG frames.
    pub fn is_heartbeat(&self) -> bool {
        channel::is_heartbeat(self.id, &self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_are_heartbeats() {
        assert!(Packet::ping().is_heartbeat());
        assert!(Packet::pong().is_heartbeat());
    }

    #[test]
    fn control_id_with_user_body_is_not_heartbeat() {
        assert!(!Packet::new(0, "World.").is_heartbeat());
    }

    #[test]
    fn sentinel_body_on_request_id_is_not_heartbeat() {
        assert!(!Packet::new(7, "ping").is_heartbeat());
    }

    #[test]
    fn accessors() {
        let packet = Packet::new(42, "body");
        assert_eq!(packet.id(), 42);
        assert_eq!(packet.body().as_ref(), b"body");
        assert_eq!(packet.into_body(), Bytes::from_static(b"body"));
    }
}
