use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use multiplex_frame::CONTROL_ID;

/// Source of request ids.
///
/// Ids must be unique among a client's in-flight requests and must never be
/// [`CONTROL_ID`].
pub trait IdGenerator: Send + Sync + fmt::Debug {
    fn generate(&self) -> u32;
}

/// Monotonic ids starting at 1, wrapping past `u32::MAX` and skipping 0.
#[derive(Debug)]
pub struct SequenceIdGenerator {
    next: AtomicU32,
}

impl SequenceIdGenerator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Start the sequence at `first`. Mostly useful for exercising wrap-around.
    pub fn starting_at(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first),
        }
    }
}

impl Default for SequenceIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for SequenceIdGenerator {
    fn generate(&self) -> u32 {
        loop {
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            if id != CONTROL_ID {
                return id;
            }
        }
    }
}
