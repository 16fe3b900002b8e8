//! Cryptographic primitives for Trellis.
//!
//! Provides two things:
//!   1. Password-derived AES-256-GCM for optional payload encryption,
//!      carried in a text envelope: `iv0,iv1,...,iv15$base64(ciphertext)`
//!   2. Memoized content digests over SHA-1/256/384/512
//!
//! Key material is zeroized on drop and never exposed outside this module.
//! There is no unsafe code in this module.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use thiserror::Error;
use zeroize::Zeroizing;

// ── Key derivation ────────────────────────────────────────────────────────────

/// The envelope format carries a 16-byte IV, so the cipher is parameterized
/// with a 16-byte nonce rather than the usual 96-bit one.
type EnvelopeCipher = AesGcm<Aes256, U16>;

/// Number of IV bytes in every envelope.
pub const IV_BYTES: usize = 16;

/// A derived symmetric room key.
///
/// The raw key bytes are private and zeroized on drop — a key can encrypt
/// and decrypt, nothing else.
pub struct RoomKey {
    key: Zeroizing<[u8; 32]>,
}

/// Derive a room key from a shared secret, an application namespace, and a
/// room id.
///
/// Deterministic: the same three inputs always derive the same key, and any
/// differing input derives a key that cannot decrypt the others' output.
///
///   key = SHA-256(secret || namespace || room_id)
pub fn derive_key(secret: &str, namespace: &str, room_id: &str) -> RoomKey {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(namespace.as_bytes());
    hasher.update(room_id.as_bytes());
    RoomKey {
        key: Zeroizing::new(hasher.finalize().into()),
    }
}

// ── Encrypt / decrypt ─────────────────────────────────────────────────────────

/// Encrypt a payload under a room key, returning the text envelope.
///
/// A fresh random 16-byte IV is drawn per call and is never reused, so two
/// calls with identical plaintext produce different envelopes.
pub fn encrypt(key: &RoomKey, plaintext: &[u8]) -> Result<String, CryptoError> {
    let mut iv = [0u8; IV_BYTES];
    rand::thread_rng().fill_bytes(&mut iv);

    let cipher = EnvelopeCipher::new(GenericArray::from_slice(&*key.key));
    let ciphertext = cipher
        .encrypt(GenericArray::from_slice(&iv), plaintext)
        .map_err(|_| CryptoError::Aead)?;

    let iv_text = iv
        .iter()
        .map(u8::to_string)
        .collect::<Vec<_>>()
        .join(",");
    Ok(format!("{iv_text}${}", BASE64.encode(ciphertext)))
}

/// Parse and decrypt a text envelope produced by [`encrypt`].
///
/// Fails with a format error when the `$` separator is absent, the input is
/// empty, or either side of the separator is empty; fails with
/// [`CryptoError::Aead`] when the authentication tag does not verify. No
/// partial plaintext is ever returned.
pub fn decrypt(key: &RoomKey, envelope: &str) -> Result<Vec<u8>, CryptoError> {
    if envelope.is_empty() {
        return Err(CryptoError::EmptyEnvelope);
    }
    let (iv_text, cipher_text) = envelope
        .split_once('$')
        .ok_or(CryptoError::MissingSeparator)?;
    if iv_text.is_empty() {
        return Err(CryptoError::MissingIv);
    }
    if cipher_text.is_empty() {
        return Err(CryptoError::MissingCiphertext);
    }

    let mut iv = [0u8; IV_BYTES];
    let mut count = 0usize;
    for part in iv_text.split(',') {
        if count == IV_BYTES {
            count += 1;
            break;
        }
        iv[count] = part
            .parse::<u8>()
            .map_err(|_| CryptoError::BadIvByte(part.to_string()))?;
        count += 1;
    }
    if count != IV_BYTES {
        return Err(CryptoError::IvLength { got: count });
    }

    let ciphertext = BASE64.decode(cipher_text)?;
    let cipher = EnvelopeCipher::new(GenericArray::from_slice(&*key.key));
    cipher
        .decrypt(GenericArray::from_slice(&iv), ciphertext.as_slice())
        .map_err(|_| CryptoError::Aead)
}

// ── Content digests ───────────────────────────────────────────────────────────

/// Digest algorithms the hash API supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    /// Digest output length in bytes.
    pub fn digest_len(self) -> usize {
        match self {
            DigestAlgorithm::Sha1 => 20,
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Sha384 => 48,
            DigestAlgorithm::Sha512 => 64,
        }
    }
}

/// Content hasher with per-instance memoization.
///
/// Repeated calls with identical (algorithm, input) return the cached digest
/// without recomputation. The cache is unbounded for the lifetime of the
/// instance — acceptable for the input cardinality rooms see in practice;
/// hold the hasher for a bounded scope if that assumption breaks.
pub struct ContentHasher {
    cache: Mutex<HashMap<(DigestAlgorithm, Vec<u8>), Arc<[u8]>>>,
    computations: AtomicU64,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            computations: AtomicU64::new(0),
        }
    }

    /// Compute (or recall) the digest of `input` under `algorithm`.
    pub fn hash(&self, algorithm: DigestAlgorithm, input: &[u8]) -> Arc<[u8]> {
        let key = (algorithm, input.to_vec());
        if let Some(digest) = self.cache.lock().unwrap().get(&key) {
            return digest.clone();
        }

        self.computations.fetch_add(1, Ordering::Relaxed);
        let digest: Arc<[u8]> = match algorithm {
            DigestAlgorithm::Sha1 => Arc::from(Sha1::digest(input).as_slice()),
            DigestAlgorithm::Sha256 => Arc::from(Sha256::digest(input).as_slice()),
            DigestAlgorithm::Sha384 => Arc::from(Sha384::digest(input).as_slice()),
            DigestAlgorithm::Sha512 => Arc::from(Sha512::digest(input).as_slice()),
        };

        self.cache
            .lock()
            .unwrap()
            .entry(key)
            .or_insert(digest)
            .clone()
    }

    /// How many digests were actually computed (cache misses).
    pub fn computations(&self) -> u64 {
        self.computations.load(Ordering::Relaxed)
    }

    /// Number of memoized entries.
    pub fn cached_entries(&self) -> usize {
        self.cache.lock().unwrap().len()
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("envelope is empty")]
    EmptyEnvelope,

    #[error("envelope is missing the '$' separator")]
    MissingSeparator,

    #[error("envelope has no IV before the separator")]
    MissingIv,

    #[error("envelope has no ciphertext after the separator")]
    MissingCiphertext,

    #[error("IV byte is not a decimal 0-255 value: {0:?}")]
    BadIvByte(String),

    #[error("expected {IV_BYTES} IV bytes, got {got}")]
    IvLength { got: usize },

    #[error("ciphertext is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("authenticated decryption failed")]
    Aead,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
