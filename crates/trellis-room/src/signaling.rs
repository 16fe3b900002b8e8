//! Signaling strategies — out-of-band bootstrap of peer connections.
//!
//! A room never implements discovery itself: it announces through an
//! adapter and consumes the membership events the adapter produces, each
//! carrying an already-established data channel. Offer/answer exchange,
//! offer pooling, and re-announce cadence are adapter concerns, tuned via
//! [`trellis_core::SignalingConfig`].
//!
//! [`MemorySignaling`] is the in-process strategy: every adapter that
//! announces the same room id through the same [`MemoryHub`] is full-meshed
//! with the others over in-memory channel pairs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::channel::{memory_channel_pair, DataChannel};
use crate::peer::PeerId;

// ── Adapter contract ──────────────────────────────────────────────────────────

/// Membership events a signaling adapter produces for one room.
pub enum SignalingEvent {
    /// A peer connection finished establishing. The room takes ownership of
    /// the channel and its inbound frame stream.
    PeerConnected {
        peer_id: PeerId,
        channel: Arc<dyn DataChannel>,
        incoming: mpsc::Receiver<Bytes>,
    },
    /// The signaling layer learned the peer is gone before the transport
    /// noticed.
    PeerDisconnected { peer_id: PeerId },
}

/// A pluggable signaling strategy.
pub trait SignalingAdapter: Send + 'static {
    /// Announce presence in `room_id` and stream membership events until
    /// the receiver is dropped.
    fn announce(self, room_id: String) -> mpsc::UnboundedReceiver<SignalingEvent>;
}

// ── In-process strategy ───────────────────────────────────────────────────────

struct Member {
    peer_id: PeerId,
    events: mpsc::UnboundedSender<SignalingEvent>,
}

/// Process-local meeting point for [`MemorySignaling`] adapters.
pub struct MemoryHub {
    rooms: Mutex<HashMap<String, Vec<Member>>>,
    capacity: usize,
}

impl MemoryHub {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(64)
    }

    /// `capacity` bounds the per-direction delivery queue of every channel
    /// pair the hub creates; see [`memory_channel_pair`].
    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            rooms: Mutex::new(HashMap::new()),
            capacity,
        })
    }
}

/// In-process signaling: full-meshes every announcer of a room id.
pub struct MemorySignaling {
    hub: Arc<MemoryHub>,
    peer_id: PeerId,
}

impl MemorySignaling {
    pub fn new(hub: Arc<MemoryHub>, peer_id: impl Into<PeerId>) -> Self {
        Self {
            hub,
            peer_id: peer_id.into(),
        }
    }
}

impl SignalingAdapter for MemorySignaling {
    fn announce(self, room_id: String) -> mpsc::UnboundedReceiver<SignalingEvent> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut rooms = self.hub.rooms.lock().unwrap();
        let members = rooms.entry(room_id.clone()).or_default();

        // Members whose room is gone stop listening; drop them here so they
        // are not offered to newcomers.
        members.retain(|member| !member.events.is_closed());

        for member in members.iter() {
            let (ours, theirs) = memory_channel_pair(self.hub.capacity);
            let _ = member.events.send(SignalingEvent::PeerConnected {
                peer_id: self.peer_id.clone(),
                channel: theirs.channel,
                incoming: theirs.incoming,
            });
            let _ = events_tx.send(SignalingEvent::PeerConnected {
                peer_id: member.peer_id.clone(),
                channel: ours.channel,
                incoming: ours.incoming,
            });
        }

        tracing::debug!(
            room = %room_id,
            peer = %self.peer_id,
            mesh_size = members.len() + 1,
            "announced to in-process hub"
        );
        members.push(Member {
            peer_id: self.peer_id,
            events: events_tx,
        });
        events_rx
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
