//! Trellis wire format — the chunk framing every room message travels in.
//!
//! A logical message is split into one or more chunks. Each chunk begins
//! with the fixed 15-byte header below; the payload slice for that chunk
//! follows immediately. The framing layer is oblivious to what the payload
//! bytes mean — payload tagging and encryption happen above it, so the
//! header carries routing state only.
//!
//! These types ARE the protocol. Every field and every size is part of the
//! wire format; changing anything here is a breaking change.

use bytes::{Bytes, BytesMut};
use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Width of the action identifier field. Action type strings are 1–12 bytes
/// after UTF-8 encoding and are stored left-justified, zero padded.
pub const ACTION_ID_BYTES: usize = 12;

/// Fixed chunk header size: action id + nonce + terminal flag + progress.
pub const HEADER_SIZE: usize = 15;

/// Default maximum frame size. Matches the conservative per-message limit
/// negotiated by browser data channels.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024;

/// Channel buffered-amount level below which a suspended sender resumes.
pub const DATA_BUFFERED_LOW_THRESHOLD: usize = 65535;

// ── Action identifier ─────────────────────────────────────────────────────────

/// A validated, fixed-width action identifier.
///
/// Construction via [`ActionId::new`] enforces the 1–12 byte bound; the
/// padded form is what appears in every chunk header, so two actions are
/// equal on the wire exactly when their type strings are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionId([u8; ACTION_ID_BYTES]);

impl ActionId {
    /// Validate and pad an action type string.
    pub fn new(action_type: &str) -> Result<Self, WireError> {
        let bytes = action_type.as_bytes();
        if bytes.is_empty() || bytes.len() > ACTION_ID_BYTES {
            return Err(WireError::ActionTypeLength(bytes.len()));
        }
        let mut id = [0u8; ACTION_ID_BYTES];
        id[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(id))
    }

    /// Reconstruct an id from the raw header field of a received chunk.
    pub fn from_wire(raw: [u8; ACTION_ID_BYTES]) -> Self {
        Self(raw)
    }

    /// The padded on-wire form.
    pub fn as_wire_bytes(&self) -> [u8; ACTION_ID_BYTES] {
        self.0
    }

    /// The unpadded action type string.
    ///
    /// Ids built with [`ActionId::new`] always round-trip; an id lifted from
    /// a foreign chunk with non-UTF-8 bytes renders as an empty string.
    pub fn as_str(&self) -> &str {
        let end = self
            .0
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(ACTION_ID_BYTES);
        std::str::from_utf8(&self.0[..end]).unwrap_or("")
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Chunk Header ──────────────────────────────────────────────────────────────

/// The fixed header preceding every chunk payload.
///
/// Wire size: 15 bytes.
#[derive(Debug, Clone, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct ChunkHeader {
    /// Padded action type identifier. See [`ActionId`].
    pub action_id: [u8; ACTION_ID_BYTES],

    /// Rolling message discriminator, per (peer, action). The sender
    /// increments this for each outbound message of that action to that
    /// peer, wrapping at 256. Distinguishes concurrently in-flight
    /// messages; it is NOT a security nonce.
    pub nonce: u8,

    /// Terminal flag: 0 = more chunks follow, 1 = last chunk.
    pub last: u8,

    /// Progress estimate, 0–255, proportional to bytes emitted so far.
    /// Informational only — receivers must not use it for completeness.
    pub progress: u8,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(ChunkHeader, [u8; HEADER_SIZE]);

impl ChunkHeader {
    /// Whether this chunk carries the terminal flag.
    pub fn is_last(&self) -> bool {
        self.last == 1
    }
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Split a serialized message body into framed chunks.
///
/// Every chunk payload is at most `max_frame_size - HEADER_SIZE` bytes; the
/// final chunk carries the terminal flag. An empty body still produces one
/// (terminal) chunk, so zero-length messages are deliverable.
pub fn encode_chunks(
    action: ActionId,
    nonce: u8,
    body: &[u8],
    max_frame_size: usize,
) -> Result<Vec<Bytes>, WireError> {
    if max_frame_size <= HEADER_SIZE {
        return Err(WireError::FrameTooSmall(max_frame_size));
    }
    let capacity = max_frame_size - HEADER_SIZE;
    let total = body.len().div_ceil(capacity).max(1);

    let mut chunks = Vec::with_capacity(total);
    let mut emitted = 0usize;
    for index in 0..total {
        let start = index * capacity;
        let end = usize::min(start + capacity, body.len());
        let slice = &body[start..end];
        emitted += slice.len();

        let header = ChunkHeader {
            action_id: action.as_wire_bytes(),
            nonce,
            last: (index + 1 == total) as u8,
            progress: if body.is_empty() {
                u8::MAX
            } else {
                ((emitted * u8::MAX as usize) / body.len()) as u8
            },
        };

        let mut frame = BytesMut::with_capacity(HEADER_SIZE + slice.len());
        frame.extend_from_slice(header.as_bytes());
        frame.extend_from_slice(slice);
        chunks.push(frame.freeze());
    }
    Ok(chunks)
}

/// Parse the fixed header off a received frame.
///
/// Returns the header and the chunk payload slice that follows it.
pub fn parse_chunk(frame: &[u8]) -> Result<(ChunkHeader, &[u8]), WireError> {
    let header = ChunkHeader::read_from_prefix(frame)
        .ok_or(WireError::TruncatedFrame(frame.len()))?;
    Ok((header, &frame[HEADER_SIZE..]))
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when producing or interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("action type must be 1 to {} bytes after encoding, got {0}", ACTION_ID_BYTES)]
    ActionTypeLength(usize),

    #[error("max frame size {0} does not fit the {}-byte chunk header", HEADER_SIZE)]
    FrameTooSmall(usize),

    #[error("frame of {0} bytes is shorter than the chunk header")]
    TruncatedFrame(usize),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
