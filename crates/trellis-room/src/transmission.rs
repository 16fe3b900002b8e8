//! Reassembly state for in-flight multi-chunk messages.
//!
//! One `PendingTransmission` accumulates the chunks of a single logical
//! message. It is complete exactly when a chunk carrying the terminal flag
//! has been appended; at that point the owner decodes and removes it —
//! a completed transmission is never left partially assembled.

use bytes::{Bytes, BytesMut};

#[derive(Debug, Default)]
pub struct PendingTransmission {
    buffer: BytesMut,
    chunks_seen: u32,
    progress: u8,
    complete: bool,
}

impl PendingTransmission {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one chunk payload. Ordering is the transport's job; chunks
    /// arrive in send order on a reliable ordered channel.
    pub fn append(&mut self, chunk: &[u8], last: bool, progress: u8) {
        self.buffer.extend_from_slice(chunk);
        self.chunks_seen += 1;
        self.progress = progress;
        if last {
            self.complete = true;
        }
    }

    /// Whether the terminal chunk has been appended.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Sender-reported progress of the latest chunk, 0–255.
    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn chunks_seen(&self) -> u32 {
        self.chunks_seen
    }

    /// Consume the transmission, yielding the accumulated body.
    pub fn into_bytes(self) -> Bytes {
        self.buffer.freeze()
    }
}
