use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use multiplex_transport::{DEFAULT_MAX_LENGTH, LENGTH_HEADER_SIZE};

use crate::error::{FrameError, Result};
use crate::packet::Packet;

/// Size of the packet id that follows the length prefix.
pub const ID_SIZE: usize = 4;

/// Length prefix plus id: 8 bytes.
pub const HEADER_SIZE: usize = LENGTH_HEADER_SIZE + ID_SIZE;

/// Turns packets into wire frames and back.
///
/// Implementations must agree byte-for-byte with [`LengthPacker`] to
/// interoperate with other peers; the trait exists so callers can wrap or
/// observe packing.
pub trait Packer: Send + Sync + fmt::Debug {
    /// Encode a packet into one complete frame.
    fn pack(&self, packet: &Packet) -> Result<Bytes>;

    /// Decode one complete frame, length prefix included.
    fn unpack(&self, frame: Bytes) -> Result<Packet>;

    /// True if the packet is heartbeat traffic.
    fn is_heartbeat(&self, packet: &Packet) -> bool {
        packet.is_heartbeat()
    }
}

/// The standard packer.
///
/// Wire format:
/// ```text
/// ┌──────────────┬──────────────┬─────────────────────┐
/// │ Length (4B)  │ Id (4B)      │ Body                │
/// │ big-endian   │ big-endian   │ (Length - 4 bytes)  │
/// └──────────────┴──────────────┴─────────────────────┘
/// ```
/// `Length` counts id + body. `max_length` bounds the whole frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthPacker {
    max_length: usize,
}

impl LengthPacker {
    /// Create a packer with an explicit maximum frame size.
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    /// Maximum frame size, prefix included.
    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for LengthPacker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LENGTH)
    }
}

impl Packer for LengthPacker {
    fn pack(&self, packet: &Packet) -> Result<Bytes> {
        let body = packet.body();
        let total = HEADER_SIZE.saturating_add(body.len());
        let declared = u32::try_from(ID_SIZE + body.len()).map_err(|_| FrameError::TooLarge {
            size: total,
            max: self.max_length,
        })?;
        if total > self.max_length {
            return Err(FrameError::TooLarge {
                size: total,
                max: self.max_length,
            });
        }

        let mut dst = BytesMut::with_capacity(total);
        dst.put_u32(declared);
        dst.put_u32(packet.id());
        dst.put_slice(body);
        Ok(dst.freeze())
    }

    fn unpack(&self, mut frame: Bytes) -> Result<Packet> {
        if frame.len() < LENGTH_HEADER_SIZE {
            return Err(FrameError::Truncated {
                declared: LENGTH_HEADER_SIZE,
                actual: frame.len(),
            });
        }

        let declared = (&frame[..LENGTH_HEADER_SIZE]).get_u32() as usize;
        if declared < ID_SIZE {
            return Err(FrameError::MissingId(declared));
        }

        let total = LENGTH_HEADER_SIZE.saturating_add(declared);
        if total > self.max_length {
            return Err(FrameError::TooLarge {
                size: total,
                max: self.max_length,
            });
        }
        if frame.len() < total {
            return Err(FrameError::Truncated {
                declared: total,
                actual: frame.len(),
            });
        }

        frame.truncate(total);
        frame.advance(LENGTH_HEADER_SIZE);
        let id = frame.get_u32();
        Ok(Packet::new(id, frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{PING, PONG};

    #[test]
    fn pack_unpack_roundtrip() {
        let packer = LengthPacker::default();
        let packet = Packet::new(9, "hello, multiplex!");

        let wire = packer.pack(&packet).unwrap();
        assert_eq!(wire.len(), HEADER_SIZE + 17);

        let decoded = packer.unpack(wire).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn wire_layout_is_big_endian_length_then_id() {
        let wire = LengthPacker::default()
            .pack(&Packet::new(0x0102_0304, "ab"))
            .unwrap();
        assert_eq!(
            wire.as_ref(),
            &[0, 0, 0, 6, 0x01, 0x02, 0x03, 0x04, b'a', b'b']
        );
    }

    #[test]
    fn empty_body() {
        let packer = LengthPacker::default();
        let wire = packer.pack(&Packet::new(3, Bytes::new())).unwrap();
        assert_eq!(wire.as_ref(), &[0, 0, 0, 4, 0, 0, 0, 3]);

        let decoded = packer.unpack(wire).unwrap();
        assert_eq!(decoded.id(), 3);
        assert!(decoded.body().is_empty());
    }

    #[test]
    fn heartbeat_packets() {
        let packer = LengthPacker::default();
        let ping = packer.unpack(packer.pack(&Packet::ping()).unwrap()).unwrap();
        let pong = packer.unpack(packer.pack(&Packet::pong()).unwrap()).unwrap();

        assert!(packer.is_heartbeat(&ping));
        assert!(packer.is_heartbeat(&pong));
        assert_eq!(ping.body().as_ref(), PING);
        assert_eq!(pong.body().as_ref(), PONG);
        assert!(!packer.is_heartbeat(&Packet::new(0, "World.")));
    }

    #[test]
    fn pack_rejects_oversized_body() {
        let packer = LengthPacker::new(16);
        let err = packer.pack(&Packet::new(1, vec![0u8; 9])).unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { size: 17, max: 16 }));

        // Exactly at the limit is fine.
        assert!(packer.pack(&Packet::new(1, vec![0u8; 8])).is_ok());
    }

    #[test]
    fn smaller_receiver_rejects_frame() {
        let wire = LengthPacker::default()
            .pack(&Packet::new(1, vec![0xAB; 64]))
            .unwrap();
        let err = LengthPacker::new(32).unpack(wire).unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { .. }));
    }

    #[test]
    fn unpack_truncated_header() {
        let err = LengthPacker::default()
            .unpack(Bytes::from_static(&[0, 0]))
            .unwrap_err();
        assert!(matches!(err, FrameError::Truncated { .. }));
    }

    #[test]
    fn unpack_truncated_body() {
        let mut wire = BytesMut::from(
            LengthPacker::default()
                .pack(&Packet::new(1, "hello"))
                .unwrap()
                .as_ref(),
        );
        wire.truncate(HEADER_SIZE + 2);

        let err = LengthPacker::default().unpack(wire.freeze()).unwrap_err();
        assert!(matches!(
            err,
            FrameError::Truncated {
                declared: 13,
                actual: 10
            }
        ));
    }

    #[test]
    fn unpack_length_without_id() {
        let err = LengthPacker::default()
            .unpack(Bytes::from_static(&[0, 0, 0, 2, 1, 2]))
            .unwrap_err();
        assert!(matches!(err, FrameError::MissingId(2)));
    }

    #[test]
    fn unpack_ignores_trailing_bytes() {
        let packer = LengthPacker::default();
        let mut wire = BytesMut::from(packer.pack(&Packet::new(5, "ok")).unwrap().as_ref());
        wire.put_slice(b"garbage");

        let decoded = packer.unpack(wire.freeze()).unwrap();
        assert_eq!(decoded, Packet::new(5, "ok"));
    }
}
