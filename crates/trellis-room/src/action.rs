//! Action registry — named, typed message channels within a room.
//!
//! `make_action` on a room yields the two halves of one channel: an
//! [`ActionSender`] that runs the outbound pipeline, and an
//! [`ActionReceiver`] that registers delivery callbacks. Both are cheap
//! handles onto the room and live as long as the caller keeps them.

use std::sync::Arc;

use serde_json::Value;

use trellis_core::wire::ActionId;
use trellis_core::Payload;

use crate::room::{RoomError, RoomInner};
use crate::send_target::SendTarget;

/// Receiver callback: (payload, sender peer id, metadata).
pub type ReceiverFn = dyn Fn(Payload, &str, Option<&Value>) + Send + Sync;

/// Progress callback: (fraction of bytes received 0.0–1.0, sender peer id).
/// Fired once per inbound chunk; informational only.
pub type ProgressFn = dyn Fn(f32, &str) + Send + Sync;

/// Registry entry for one action type.
#[derive(Default)]
pub(crate) struct ActionEntry {
    pub(crate) receivers: Vec<Arc<ReceiverFn>>,
    pub(crate) progress: Vec<Arc<ProgressFn>>,
}

// ── Sender ────────────────────────────────────────────────────────────────────

/// Sending half of a registered action.
#[derive(Clone)]
pub struct ActionSender {
    pub(crate) inner: Arc<RoomInner>,
    pub(crate) action: ActionId,
}

impl ActionSender {
    /// The action type this sender addresses.
    pub fn action_type(&self) -> String {
        self.action.as_str().to_string()
    }

    /// Send a payload to every connected peer.
    pub async fn send(&self, payload: impl Into<Payload>) -> Result<(), RoomError> {
        self.inner
            .send_action(self.action, payload.into(), SendTarget::Broadcast, None)
            .await
    }

    /// Send a payload to an explicit target.
    pub async fn send_to(
        &self,
        payload: impl Into<Payload>,
        target: impl Into<SendTarget>,
    ) -> Result<(), RoomError> {
        self.inner
            .send_action(self.action, payload.into(), target.into(), None)
            .await
    }

    /// Send a binary payload with an attached metadata object.
    ///
    /// Metadata is only legal with binary payloads; anything else is a
    /// synchronous validation error.
    pub async fn send_with_meta(
        &self,
        payload: impl Into<Payload>,
        target: impl Into<SendTarget>,
        meta: Value,
    ) -> Result<(), RoomError> {
        self.inner
            .send_action(self.action, payload.into(), target.into(), Some(meta))
            .await
    }
}

// ── Receiver ──────────────────────────────────────────────────────────────────

/// Receiving half of a registered action.
#[derive(Clone)]
pub struct ActionReceiver {
    pub(crate) inner: Arc<RoomInner>,
    pub(crate) action: ActionId,
}

impl ActionReceiver {
    /// Register a callback invoked once per fully-delivered message, with
    /// the decoded payload, the sending peer's id, and any metadata.
    pub fn on(&self, receiver: impl Fn(Payload, &str, Option<&Value>) + Send + Sync + 'static) {
        self.inner.register_receiver(self.action, Arc::new(receiver));
    }

    /// Register a per-chunk progress callback for this action.
    pub fn on_progress(&self, callback: impl Fn(f32, &str) + Send + Sync + 'static) {
        self.inner.register_progress(self.action, Arc::new(callback));
    }
}
