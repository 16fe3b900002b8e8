//! Room protocol engine — owns the peer set and action registry for one
//! room and runs both pipelines: encode→encrypt→chunk→send outbound,
//! reassemble→decrypt→decode→deliver inbound.
//!
//! All per-room state lives behind the room's own registries; nothing here
//! is process-global. Multiple rooms in one process are independent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use trellis_core::config::RoomConfig;
use trellis_core::crypto::{self, CryptoError, RoomKey};
use trellis_core::payload::{self, Payload, PayloadError};
use trellis_core::wire::{self, ActionId, WireError};

use crate::action::{ActionEntry, ActionReceiver, ActionSender, ProgressFn, ReceiverFn};
use crate::channel::{ChannelError, DataChannel};
use crate::peer::{Peer, PeerId, PeerStatsSnapshot};
use crate::send_target::SendTarget;
use crate::signaling::{SignalingAdapter, SignalingEvent};

type LifecycleFn = dyn Fn(&str) + Send + Sync;

// ── Room ──────────────────────────────────────────────────────────────────────

/// One multi-peer session. Dropping the room (or calling [`Room::leave`])
/// tears down every peer.
pub struct Room {
    inner: Arc<RoomInner>,
    signaling: Mutex<Option<JoinHandle<()>>>,
}

impl Room {
    /// Create a room with no signaling attached. Peers arrive via
    /// [`Room::attach_peer`]; use [`join_room`] to drive the peer set from
    /// a signaling adapter instead.
    pub fn new(config: RoomConfig) -> Self {
        let key = config
            .password
            .as_deref()
            .map(|password| crypto::derive_key(password, &config.app_id, &config.room_id));
        Self {
            inner: Arc::new(RoomInner {
                config,
                key,
                peers: DashMap::new(),
                actions: DashMap::new(),
                on_peer_join: Mutex::new(None),
                on_peer_leave: Mutex::new(None),
                left: AtomicBool::new(false),
            }),
            signaling: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RoomConfig {
        &self.inner.config
    }

    /// Register an action type, returning its sender and receiver halves.
    ///
    /// The type string must be 1–12 bytes after encoding and not already
    /// registered in this room; both are caller mistakes reported
    /// synchronously.
    pub fn make_action(&self, action_type: &str) -> Result<(ActionSender, ActionReceiver), RoomError> {
        let action = ActionId::new(action_type)?;
        match self.inner.actions.entry(action) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(RoomError::DuplicateAction(action_type.to_string()));
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(ActionEntry::default());
            }
        }
        Ok((
            ActionSender {
                inner: self.inner.clone(),
                action,
            },
            ActionReceiver {
                inner: self.inner.clone(),
                action,
            },
        ))
    }

    /// Set the callback invoked when a peer joins. At most one invocation
    /// per peer per join.
    pub fn on_peer_join(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        *self.inner.on_peer_join.lock().unwrap() = Some(Box::new(callback));
    }

    /// Set the callback invoked when a peer leaves or disconnects. At most
    /// one invocation per peer per departure.
    pub fn on_peer_leave(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        *self.inner.on_peer_leave.lock().unwrap() = Some(Box::new(callback));
    }

    /// Hand the room an established connection for `peer_id`.
    ///
    /// `incoming` is the peer's inbound frame stream; the room pumps it
    /// until it ends, then tears the peer down. Custom transports plug in
    /// here; [`join_room`] calls this for adapter-provided connections.
    pub fn attach_peer(
        &self,
        peer_id: impl Into<PeerId>,
        channel: Arc<dyn DataChannel>,
        incoming: mpsc::Receiver<Bytes>,
    ) {
        self.inner.attach_peer(peer_id.into(), channel, incoming);
    }

    /// Feed one raw frame received from `peer_id` through the inbound
    /// pipeline. Unknown peer ids are a silent no-op — frames racing a
    /// disconnect are expected churn.
    pub fn handle_data(&self, peer_id: &str, frame: &[u8]) {
        self.inner.handle_data(peer_id, frame);
    }

    /// Ids of currently connected peers.
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.inner.peers.iter().map(|e| e.key().clone()).collect()
    }

    /// Traffic counters for one peer, if connected.
    pub fn peer_stats(&self, peer_id: &str) -> Option<PeerStatsSnapshot> {
        self.inner.peers.get(peer_id).map(|e| e.value().stats())
    }

    /// Leave the room: stop consuming signaling events and tear down every
    /// peer. Idempotent; also runs on drop.
    pub fn leave(&self) {
        if let Some(handle) = self.signaling.lock().unwrap().take() {
            handle.abort();
        }
        self.inner.leave();
    }

    fn set_signaling_task(&self, handle: JoinHandle<()>) {
        *self.signaling.lock().unwrap() = Some(handle);
    }
}

impl Drop for Room {
    fn drop(&mut self) {
        self.leave();
    }
}

/// Join a room through a signaling adapter: announce, then mirror its
/// membership events into the peer set until the room is left.
pub fn join_room(config: RoomConfig, adapter: impl SignalingAdapter) -> Room {
    let room = Room::new(config);
    let mut events = adapter.announce(room.config().room_id.clone());
    let inner = room.inner.clone();
    let handle = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SignalingEvent::PeerConnected {
                    peer_id,
                    channel,
                    incoming,
                } => inner.attach_peer(peer_id, channel, incoming),
                SignalingEvent::PeerDisconnected { peer_id } => inner.disconnect_peer(&peer_id),
            }
        }
    });
    room.set_signaling_task(handle);
    room
}

// ── Engine internals ──────────────────────────────────────────────────────────

pub(crate) struct RoomInner {
    config: RoomConfig,
    key: Option<RoomKey>,
    peers: DashMap<PeerId, Arc<Peer>>,
    actions: DashMap<ActionId, ActionEntry>,
    on_peer_join: Mutex<Option<Box<LifecycleFn>>>,
    on_peer_leave: Mutex<Option<Box<LifecycleFn>>>,
    left: AtomicBool,
}

impl RoomInner {
    fn attach_peer(
        self: &Arc<Self>,
        peer_id: PeerId,
        channel: Arc<dyn DataChannel>,
        incoming: mpsc::Receiver<Bytes>,
    ) {
        if self.left.load(Ordering::Acquire) {
            channel.close();
            return;
        }

        let peer = Arc::new(Peer::new(peer_id.clone(), channel));
        // A stale entry for the same id (reconnection race) is replaced and
        // torn down without a leave callback — its pump exits against the
        // new entry and leaves it alone.
        if let Some(previous) = self.peers.insert(peer_id.clone(), peer.clone()) {
            previous.destroy();
        }
        tracing::info!(peer = %peer_id, room = %self.config.room_id, "peer joined");
        if let Some(callback) = self.on_peer_join.lock().unwrap().as_ref() {
            callback(&peer_id);
        }

        let inner = self.clone();
        let mut incoming = incoming;
        tokio::spawn(async move {
            while let Some(frame) = incoming.recv().await {
                inner.handle_data(peer.id(), &frame);
            }
            inner.detach_peer(peer.id(), &peer);
        });
    }

    /// Remove a peer entry, but only the one the exiting pump belongs to.
    fn detach_peer(&self, peer_id: &str, expected: &Arc<Peer>) {
        let removed = self
            .peers
            .remove_if(peer_id, |_, current| Arc::ptr_eq(current, expected));
        if let Some((_, peer)) = removed {
            peer.destroy();
            self.peer_left(peer_id);
        }
    }

    /// Explicit disconnect notification from the signaling layer.
    pub(crate) fn disconnect_peer(&self, peer_id: &str) {
        if let Some((_, peer)) = self.peers.remove(peer_id) {
            peer.destroy();
            self.peer_left(peer_id);
        }
    }

    fn peer_left(&self, peer_id: &str) {
        if self.left.load(Ordering::Acquire) {
            return;
        }
        tracing::info!(peer = %peer_id, room = %self.config.room_id, "peer left");
        if let Some(callback) = self.on_peer_leave.lock().unwrap().as_ref() {
            callback(peer_id);
        }
    }

    // ── Inbound pipeline ──────────────────────────────────────────────────────

    pub(crate) fn handle_data(&self, peer_id: &str, frame: &[u8]) {
        let (header, chunk) = match wire::parse_chunk(frame) {
            Ok(parts) => parts,
            Err(error) => {
                tracing::warn!(peer = %peer_id, %error, "dropping malformed frame");
                return;
            }
        };

        let Some(peer) = self.peers.get(peer_id).map(|e| e.value().clone()) else {
            tracing::debug!(peer = %peer_id, "chunk for unknown peer, dropping");
            return;
        };

        let action = ActionId::from_wire(header.action_id);
        tracing::trace!(
            peer = %peer_id,
            action = %action,
            nonce = header.nonce,
            last = header.is_last(),
            len = chunk.len(),
            "chunk received"
        );
        self.notify_progress(action, peer_id, header.progress);

        let Some(body) = peer.append_chunk(action, header.nonce, header.is_last(), header.progress, chunk)
        else {
            return;
        };
        self.deliver(action, peer_id, body);
    }

    fn deliver(&self, action: ActionId, peer_id: &str, body: Bytes) {
        let body = match &self.key {
            Some(key) => {
                let Ok(envelope) = std::str::from_utf8(&body) else {
                    tracing::warn!(peer = %peer_id, action = %action, "encrypted body is not text, dropping message");
                    return;
                };
                match crypto::decrypt(key, envelope) {
                    Ok(bytes) => Bytes::from(bytes),
                    Err(error) => {
                        tracing::warn!(peer = %peer_id, action = %action, %error, "payload decryption failed, dropping message");
                        return;
                    }
                }
            }
            None => body,
        };

        let (payload, meta) = match payload::decode(&body) {
            Ok(decoded) => decoded,
            Err(error) => {
                tracing::warn!(peer = %peer_id, action = %action, %error, "payload decode failed, dropping message");
                return;
            }
        };

        let receivers: Vec<Arc<ReceiverFn>> = match self.actions.get(&action) {
            Some(entry) => entry.receivers.clone(),
            None => {
                tracing::debug!(action = %action, "message for unregistered action, dropping");
                return;
            }
        };
        for receiver in receivers {
            receiver(payload.clone(), peer_id, meta.as_ref());
        }
    }

    fn notify_progress(&self, action: ActionId, peer_id: &str, progress: u8) {
        let callbacks: Vec<Arc<ProgressFn>> = match self.actions.get(&action) {
            Some(entry) if !entry.progress.is_empty() => entry.progress.clone(),
            _ => return,
        };
        let fraction = progress as f32 / u8::MAX as f32;
        for callback in callbacks {
            callback(fraction, peer_id);
        }
    }

    // ── Outbound pipeline ─────────────────────────────────────────────────────

    pub(crate) async fn send_action(
        &self,
        action: ActionId,
        payload: Payload,
        target: SendTarget,
        meta: Option<Value>,
    ) -> Result<(), RoomError> {
        let body = payload::encode(&payload, meta.as_ref())?;
        let body = match &self.key {
            Some(key) => Bytes::from(crypto::encrypt(key, &body)?.into_bytes()),
            None => body,
        };

        let targets: Vec<Arc<Peer>> = match target {
            SendTarget::Broadcast => self.peers.iter().map(|e| e.value().clone()).collect(),
            SendTarget::Peers(ids) => ids
                .iter()
                .filter_map(|id| self.peers.get(id).map(|e| e.value().clone()))
                .collect(),
        };

        for peer in targets {
            let nonce = peer.next_nonce(action);
            let frames = wire::encode_chunks(action, nonce, &body, self.config.max_frame_size)?;
            tracing::trace!(
                peer = %peer.id(),
                action = %action,
                nonce,
                frames = frames.len(),
                bytes = body.len(),
                "sending message"
            );
            peer.send_frames(frames).await?;
        }
        Ok(())
    }

    pub(crate) fn register_receiver(&self, action: ActionId, receiver: Arc<ReceiverFn>) {
        if let Some(mut entry) = self.actions.get_mut(&action) {
            entry.receivers.push(receiver);
        }
    }

    pub(crate) fn register_progress(&self, action: ActionId, callback: Arc<ProgressFn>) {
        if let Some(mut entry) = self.actions.get_mut(&action) {
            entry.progress.push(callback);
        }
    }

    fn leave(&self) {
        if self.left.swap(true, Ordering::AcqRel) {
            return;
        }
        let peer_ids: Vec<PeerId> = self.peers.iter().map(|e| e.key().clone()).collect();
        for peer_id in peer_ids {
            if let Some((_, peer)) = self.peers.remove(&peer_id) {
                peer.destroy();
            }
        }
        tracing::info!(room = %self.config.room_id, "left room");
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RoomError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("action type {0:?} is already registered")]
    DuplicateAction(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
