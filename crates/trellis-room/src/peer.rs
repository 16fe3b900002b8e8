//! Peer connection wrapper — one remote endpoint and its ordered channel.
//!
//! A `Peer` owns everything the room tracks per remote: the data channel,
//! the reassembly state of messages that peer is mid-way through sending
//! us, the outbound nonce counters, and traffic counters. Destroying a
//! peer drops all of it; in-flight transmissions are cancelled, not
//! completed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use trellis_core::wire::{ActionId, DATA_BUFFERED_LOW_THRESHOLD};

use crate::channel::{ChannelError, ChannelState, DataChannel};
use crate::transmission::PendingTransmission;

/// Opaque peer identifier, assigned by the signaling layer.
pub type PeerId = String;

// ── Stats ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct PeerStats {
    chunks_in: AtomicU64,
    chunks_out: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

/// Point-in-time copy of a peer's traffic counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerStatsSnapshot {
    pub chunks_in: u64,
    pub chunks_out: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

// ── Peer ──────────────────────────────────────────────────────────────────────

pub struct Peer {
    id: PeerId,
    channel: Arc<dyn DataChannel>,
    /// Reassembly state, keyed by (action, nonce). Discarded on teardown.
    pending: Mutex<HashMap<(ActionId, u8), PendingTransmission>>,
    /// Next outbound nonce per action, wrapping at 256.
    outbound_nonces: Mutex<HashMap<ActionId, u8>>,
    stats: PeerStats,
    destroyed: AtomicBool,
}

impl Peer {
    pub fn new(id: PeerId, channel: Arc<dyn DataChannel>) -> Self {
        Self {
            id,
            channel,
            pending: Mutex::new(HashMap::new()),
            outbound_nonces: Mutex::new(HashMap::new()),
            stats: PeerStats::default(),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the underlying channel is ready to carry frames.
    pub fn channel_ready(&self) -> bool {
        !self.destroyed.load(Ordering::Acquire)
            && self.channel.state() == ChannelState::Connected
    }

    /// Claim the next nonce for an outbound message of `action` to this
    /// peer. Wraps at 256: at most 256 in-flight messages per (peer,
    /// action) are distinguishable.
    pub fn next_nonce(&self, action: ActionId) -> u8 {
        let mut nonces = self.outbound_nonces.lock().unwrap();
        let slot = nonces.entry(action).or_insert(u8::MAX);
        *slot = slot.wrapping_add(1);
        *slot
    }

    /// Queue one frame on the channel. Fails when the channel is not open.
    pub fn send_bytes(&self, frame: Bytes) -> Result<(), ChannelError> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(ChannelError::NotOpen(ChannelState::Closed));
        }
        let len = frame.len() as u64;
        self.channel.try_send(frame)?;
        self.stats.chunks_out.fetch_add(1, Ordering::Relaxed);
        self.stats.bytes_out.fetch_add(len, Ordering::Relaxed);
        Ok(())
    }

    /// Stream the frames of one message, respecting backpressure: before
    /// each frame, if the channel's buffered amount sits above the
    /// low-water mark, sending suspends until the drain signal fires.
    pub async fn send_frames(&self, frames: Vec<Bytes>) -> Result<(), ChannelError> {
        for frame in frames {
            loop {
                if !self.channel_ready() {
                    return Err(ChannelError::NotOpen(self.channel.state()));
                }
                if self.channel.buffered_amount() <= DATA_BUFFERED_LOW_THRESHOLD {
                    break;
                }
                // Register before re-checking, so a drain between the check
                // and the await cannot be missed.
                let signal = self.channel.drain_signal();
                let notified = signal.notified();
                if self.channel.buffered_amount() <= DATA_BUFFERED_LOW_THRESHOLD {
                    break;
                }
                notified.await;
            }
            self.send_bytes(frame)?;
        }
        Ok(())
    }

    /// Append one inbound chunk to the matching transmission, creating it
    /// on first sight. Returns the full reassembled body when the terminal
    /// chunk lands, removing the transmission in the same step.
    ///
    /// After teardown this is a no-op that allocates nothing — the guard
    /// against frames racing a disconnect.
    pub fn append_chunk(
        &self,
        action: ActionId,
        nonce: u8,
        last: bool,
        progress: u8,
        chunk: &[u8],
    ) -> Option<Bytes> {
        if self.destroyed.load(Ordering::Acquire) {
            return None;
        }
        self.stats.chunks_in.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_in
            .fetch_add(chunk.len() as u64, Ordering::Relaxed);

        let mut pending = self.pending.lock().unwrap();
        let transmission = pending.entry((action, nonce)).or_default();
        transmission.append(chunk, last, progress);
        if !transmission.is_complete() {
            return None;
        }
        pending
            .remove(&(action, nonce))
            .map(PendingTransmission::into_bytes)
    }

    /// Number of in-flight inbound transmissions.
    pub fn pending_transmissions(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn stats(&self) -> PeerStatsSnapshot {
        PeerStatsSnapshot {
            chunks_in: self.stats.chunks_in.load(Ordering::Relaxed),
            chunks_out: self.stats.chunks_out.load(Ordering::Relaxed),
            bytes_in: self.stats.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.stats.bytes_out.load(Ordering::Relaxed),
        }
    }

    /// Tear the peer down: close the channel and discard all in-flight
    /// transmissions. Idempotent; no events are emitted afterward.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.channel.close();
        let dropped = {
            let mut pending = self.pending.lock().unwrap();
            let count = pending.len();
            pending.clear();
            count
        };
        if dropped > 0 {
            tracing::debug!(peer = %self.id, dropped, "discarded in-flight transmissions");
        }
        tracing::info!(peer = %self.id, "peer destroyed");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
