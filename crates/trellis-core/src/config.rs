//! Configuration for Trellis rooms and signaling.
//!
//! Room identity is programmatic — the application names its namespace and
//! room when joining. Signaling and transport tunables resolve the way the
//! rest of the stack expects: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $TRELLIS_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/trellis/config.toml
//!   3. ~/.config/trellis/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::wire::DEFAULT_MAX_FRAME_SIZE;

// ── Room configuration ────────────────────────────────────────────────────────

/// Identity and per-room options, supplied by the application when joining.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Application namespace. Two applications sharing a discovery medium
    /// never see each other's rooms.
    pub app_id: String,
    /// Room identifier within the namespace.
    pub room_id: String,
    /// Optional shared secret. When set, every payload is end-to-end
    /// encrypted with a key derived from (password, app_id, room_id).
    pub password: Option<String>,
    /// Maximum transport frame size; chunk payloads are sized to fit it.
    pub max_frame_size: usize,
}

impl RoomConfig {
    pub fn new(app_id: impl Into<String>, room_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            room_id: room_id.into(),
            password: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }
}

// ── Tunables ──────────────────────────────────────────────────────────────────

/// Top-level tunable configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrellisConfig {
    pub signaling: SignalingConfig,
}

/// Signaling strategy tunables, consumed by adapter implementations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Connection offers pre-generated and held ready for joiners.
    pub offer_pool_size: usize,
    /// Re-announce cadence on the discovery medium.
    pub announce_interval_ms: u64,
    /// Offer expiry. Must exceed several announce intervals, or offers die
    /// before a re-announce can hand them out.
    pub offer_ttl_ms: u64,
    /// Connection-establishment timeout.
    pub ice_timeout_ms: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            offer_pool_size: 20,
            announce_interval_ms: 5333,
            offer_ttl_ms: 57333,
            ice_timeout_ms: 5000,
        }
    }
}

impl SignalingConfig {
    /// Offer TTLs shorter than this many announce intervals are rejected.
    const MIN_TTL_INTERVALS: u64 = 3;

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.offer_pool_size == 0 {
            return Err(ConfigError::EmptyOfferPool);
        }
        if self.offer_ttl_ms < self.announce_interval_ms * Self::MIN_TTL_INTERVALS {
            return Err(ConfigError::OfferTtlTooShort {
                ttl_ms: self.offer_ttl_ms,
                interval_ms: self.announce_interval_ms,
            });
        }
        Ok(())
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl TrellisConfig {
    /// Load config: env vars → file → defaults. Validates before returning.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            TrellisConfig::default()
        };
        config.apply_env_overrides();
        config.signaling.validate()?;
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("TRELLIS_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Apply TRELLIS_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TRELLIS_SIGNALING__OFFER_POOL_SIZE") {
            if let Ok(n) = v.parse() {
                self.signaling.offer_pool_size = n;
            }
        }
        if let Ok(v) = std::env::var("TRELLIS_SIGNALING__ANNOUNCE_INTERVAL_MS") {
            if let Ok(n) = v.parse() {
                self.signaling.announce_interval_ms = n;
            }
        }
        if let Ok(v) = std::env::var("TRELLIS_SIGNALING__OFFER_TTL_MS") {
            if let Ok(n) = v.parse() {
                self.signaling.offer_ttl_ms = n;
            }
        }
        if let Ok(v) = std::env::var("TRELLIS_SIGNALING__ICE_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.signaling.ice_timeout_ms = n;
            }
        }
    }
}

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            std::env::var("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp"))
                .join(".config")
        })
        .join("trellis")
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),

    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),

    #[error("offer pool size must be at least 1")]
    EmptyOfferPool,

    #[error("offer TTL {ttl_ms}ms must cover several announce intervals ({interval_ms}ms each)")]
    OfferTtlTooShort { ttl_ms: u64, interval_ms: u64 },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
