/// Errors that can occur during packet encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame exceeds the configured maximum size.
    #[error("frame too large ({size} bytes, max {max})")]
    TooLarge { size: usize, max: usize },

    /// The buffer holds fewer bytes than the frame header declares.
    #[error("truncated frame (declared {declared} bytes, got {actual})")]
    Truncated { declared: usize, actual: usize },

    /// The declared length is too short to carry a packet id.
    #[error("frame length {0} cannot hold a packet id")]
    MissingId(usize),
}

pub type Result<T> = std::result::Result<T, FrameError>;
