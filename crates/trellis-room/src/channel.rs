//! Data-channel abstraction — the reliable ordered byte pipe under a peer.
//!
//! Connection establishment (ICE/SDP negotiation) happens outside this
//! crate. What a room needs from a transport is narrow: channel state,
//! ordered delivery of whole frames, a buffered-byte count, and a signal
//! when that count drains below the low-water mark. Any transport that can
//! offer those four things can carry a room.
//!
//! [`MemoryChannel`] is the in-process implementation: a cross-linked pair
//! with a simulated buffered-amount counter, drained by a relay task into a
//! bounded queue so a slow consumer produces real backpressure.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};

use trellis_core::wire::DATA_BUFFERED_LOW_THRESHOLD;

// ── Channel state ─────────────────────────────────────────────────────────────

/// Lifecycle of a data channel. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    New = 0,
    Connecting = 1,
    Connected = 2,
    Closed = 3,
}

impl ChannelState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ChannelState::New,
            1 => ChannelState::Connecting,
            2 => ChannelState::Connected,
            _ => ChannelState::Closed,
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("data channel is not open (state: {0:?})")]
    NotOpen(ChannelState),
}

// ── Trait ─────────────────────────────────────────────────────────────────────

/// The transport surface a room drives.
pub trait DataChannel: Send + Sync {
    /// Current channel state.
    fn state(&self) -> ChannelState;

    /// Queue one frame on the reliable ordered channel.
    ///
    /// Fails when the channel is not open. Queued frames count toward
    /// [`DataChannel::buffered_amount`] until the transport drains them.
    fn try_send(&self, frame: Bytes) -> Result<(), ChannelError>;

    /// Bytes queued locally but not yet drained by the transport.
    fn buffered_amount(&self) -> usize;

    /// Signal fired whenever the buffered amount falls to or below
    /// [`DATA_BUFFERED_LOW_THRESHOLD`], and on close. Waiters must re-check
    /// the condition after waking.
    fn drain_signal(&self) -> Arc<Notify>;

    /// Close the channel. Idempotent; no frames are delivered afterward.
    fn close(&self);
}

// ── In-memory implementation ──────────────────────────────────────────────────

struct Shared {
    state: AtomicU8,
    buffered: AtomicUsize,
    drained: Arc<Notify>,
}

/// One end of an in-process channel pair.
pub struct MemoryChannel {
    shared: Arc<Shared>,
    tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
}

/// A channel plus the inbound frame stream its peer produces.
pub struct MemoryEndpoint {
    pub channel: Arc<MemoryChannel>,
    pub incoming: mpsc::Receiver<Bytes>,
}

/// Build a connected channel pair.
///
/// `capacity` bounds the delivery queue on each side: frames past it stay
/// in the sender's buffered amount until the consumer catches up, which is
/// what makes backpressure observable in-process.
pub fn memory_channel_pair(capacity: usize) -> (MemoryEndpoint, MemoryEndpoint) {
    let (a_end, b_end) = {
        let (a, a_incoming) = half(capacity);
        let (b, b_incoming) = half(capacity);
        (
            MemoryEndpoint {
                channel: a,
                incoming: b_incoming,
            },
            MemoryEndpoint {
                channel: b,
                incoming: a_incoming,
            },
        )
    };
    (a_end, b_end)
}

/// One direction: a channel whose queued frames are relayed into a bounded
/// incoming queue, decrementing the buffered counter as they drain.
fn half(capacity: usize) -> (Arc<MemoryChannel>, mpsc::Receiver<Bytes>) {
    let (internal_tx, mut internal_rx) = mpsc::unbounded_channel::<Bytes>();
    let (incoming_tx, incoming_rx) = mpsc::channel::<Bytes>(capacity.max(1));

    let shared = Arc::new(Shared {
        state: AtomicU8::new(ChannelState::Connected as u8),
        buffered: AtomicUsize::new(0),
        drained: Arc::new(Notify::new()),
    });

    let relay_shared = shared.clone();
    tokio::spawn(async move {
        while let Some(frame) = internal_rx.recv().await {
            let len = frame.len();
            if incoming_tx.send(frame).await.is_err() {
                // Remote consumer is gone; nothing will drain us again.
                break;
            }
            let before = relay_shared.buffered.fetch_sub(len, Ordering::AcqRel);
            if before.saturating_sub(len) <= DATA_BUFFERED_LOW_THRESHOLD {
                relay_shared.drained.notify_waiters();
            }
        }
        relay_shared
            .state
            .store(ChannelState::Closed as u8, Ordering::Release);
        relay_shared.drained.notify_waiters();
    });

    (
        Arc::new(MemoryChannel {
            shared,
            tx: Mutex::new(Some(internal_tx)),
        }),
        incoming_rx,
    )
}

impl DataChannel for MemoryChannel {
    fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    fn try_send(&self, frame: Bytes) -> Result<(), ChannelError> {
        let state = self.state();
        if state != ChannelState::Connected {
            return Err(ChannelError::NotOpen(state));
        }
        let guard = self.tx.lock().unwrap();
        let tx = guard
            .as_ref()
            .ok_or(ChannelError::NotOpen(ChannelState::Closed))?;

        let len = frame.len();
        self.shared.buffered.fetch_add(len, Ordering::AcqRel);
        tx.send(frame).map_err(|_| {
            self.shared.buffered.fetch_sub(len, Ordering::AcqRel);
            ChannelError::NotOpen(ChannelState::Closed)
        })
    }

    fn buffered_amount(&self) -> usize {
        self.shared.buffered.load(Ordering::Acquire)
    }

    fn drain_signal(&self) -> Arc<Notify> {
        self.shared.drained.clone()
    }

    fn close(&self) {
        self.shared
            .state
            .store(ChannelState::Closed as u8, Ordering::Release);
        self.tx.lock().unwrap().take();
        self.shared.drained.notify_waiters();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
