use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

use crate::error::TransportError;

/// Size of the big-endian length prefix at the start of every frame.
pub const LENGTH_HEADER_SIZE: usize = 4;

/// Default maximum frame size (prefix included): 2 MiB.
pub const DEFAULT_MAX_LENGTH: usize = 2 * 1024 * 1024;

/// Length-check framing applied to a byte stream.
///
/// Every frame starts with a 4-byte big-endian length counting the bytes that
/// follow it. `max_length` bounds the whole frame, prefix included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramingOptions {
    /// Maximum size of one frame in bytes. Default: 2 MiB.
    pub max_length: usize,
}

impl Default for FramingOptions {
    fn default() -> Self {
        Self {
            max_length: DEFAULT_MAX_LENGTH,
        }
    }
}

/// Splits a byte stream into whole length-prefixed frames.
///
/// Yielded frames still carry their length prefix; interpreting what follows
/// it is left to the packet layer.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_length: usize,
}

impl FrameCodec {
    /// Create a codec enforcing the given framing options.
    pub fn new(options: FramingOptions) -> Self {
        Self {
            max_length: options.max_length,
        }
    }

    /// Maximum frame size this codec accepts.
    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(FramingOptions::default())
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_HEADER_SIZE {
            return Ok(None);
        }

        let declared = (&src[..LENGTH_HEADER_SIZE]).get_u32() as usize;
        let total = LENGTH_HEADER_SIZE.saturating_add(declared);
        if total > self.max_length {
            return Err(TransportError::FrameTooLarge {
                size: total,
                max: self.max_length,
            });
        }

        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        Ok(Some(src.split_to(total)))
    }
}
