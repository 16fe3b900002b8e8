//! Payload codec — the logical message forms a room action can carry.
//!
//! The chunk framing only ever sees bytes. This module fixes the mapping
//! between those bytes and the three payload kinds: UTF-8 text, a
//! JSON-serializable structured value, and a raw binary buffer with an
//! optional metadata object (binary only). The kind tag is the first byte
//! of the serialized body; it never appears in the chunk header.

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::Value;
use thiserror::Error;

const TAG_TEXT: u8 = 0x01;
const TAG_JSON: u8 = 0x02;
const TAG_BINARY: u8 = 0x03;
const TAG_BINARY_META: u8 = 0x04;

/// A logical message payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// UTF-8 text, delivered as a string.
    Text(String),
    /// A structured value, serialized as JSON text on the wire.
    Structured(Value),
    /// An opaque byte buffer. The only kind that may carry metadata.
    Binary(Bytes),
}

impl Payload {
    pub fn is_binary(&self) -> bool {
        matches!(self, Payload::Binary(_))
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Structured(value)
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Payload::Binary(bytes)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Binary(Bytes::from(bytes))
    }
}

/// Serialize a payload (and optional binary metadata) to the body the chunk
/// codec will split.
///
/// Metadata is meaningless for text and structured payloads and is rejected
/// for them; this is a caller mistake, not a network condition.
pub fn encode(payload: &Payload, meta: Option<&Value>) -> Result<Bytes, PayloadError> {
    if meta.is_some() && !payload.is_binary() {
        return Err(PayloadError::MetaWithNonBinary);
    }

    let mut buf = BytesMut::new();
    match payload {
        Payload::Text(text) => {
            buf.put_u8(TAG_TEXT);
            buf.extend_from_slice(text.as_bytes());
        }
        Payload::Structured(value) => {
            buf.put_u8(TAG_JSON);
            buf.extend_from_slice(&serde_json::to_vec(value)?);
        }
        Payload::Binary(bytes) => match meta {
            None => {
                buf.put_u8(TAG_BINARY);
                buf.extend_from_slice(bytes);
            }
            Some(meta) => {
                let meta_bytes = serde_json::to_vec(meta)?;
                buf.put_u8(TAG_BINARY_META);
                buf.put_u32(meta_bytes.len() as u32);
                buf.extend_from_slice(&meta_bytes);
                buf.extend_from_slice(bytes);
            }
        },
    }
    Ok(buf.freeze())
}

/// Deserialize a fully-reassembled body back to its payload and metadata.
pub fn decode(body: &[u8]) -> Result<(Payload, Option<Value>), PayloadError> {
    let (&tag, rest) = body.split_first().ok_or(PayloadError::Empty)?;
    match tag {
        TAG_TEXT => {
            let text = String::from_utf8(rest.to_vec())?;
            Ok((Payload::Text(text), None))
        }
        TAG_JSON => Ok((Payload::Structured(serde_json::from_slice(rest)?), None)),
        TAG_BINARY => Ok((Payload::Binary(Bytes::copy_from_slice(rest)), None)),
        TAG_BINARY_META => {
            if rest.len() < 4 {
                return Err(PayloadError::Truncated);
            }
            let meta_len = u32::from_be_bytes(rest[..4].try_into().unwrap()) as usize;
            let rest = &rest[4..];
            if rest.len() < meta_len {
                return Err(PayloadError::Truncated);
            }
            let meta = serde_json::from_slice(&rest[..meta_len])?;
            Ok((Payload::Binary(Bytes::copy_from_slice(&rest[meta_len..])), Some(meta)))
        }
        other => Err(PayloadError::UnknownTag(other)),
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("meta argument can only be used with binary data")]
    MetaWithNonBinary,

    #[error("payload body is empty")]
    Empty,

    #[error("payload body is truncated")]
    Truncated,

    #[error("unknown payload tag: 0x{0:02x}")]
    UnknownTag(u8),

    #[error("text payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("structured payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
