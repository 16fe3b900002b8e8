//! trellis-room — room/peer protocol engine over pluggable data channels.
//!
//! A [`Room`] groups direct peer connections and exchanges typed actions:
//! chunk-framed, reassembled per (peer, action, nonce), optionally
//! end-to-end encrypted. Connection establishment and discovery live
//! behind the [`SignalingAdapter`] seam.

pub mod action;
pub mod channel;
pub mod peer;
pub mod room;
pub mod send_target;
pub mod signaling;
pub mod transmission;

pub use action::{ActionReceiver, ActionSender};
pub use channel::{memory_channel_pair, ChannelError, ChannelState, DataChannel, MemoryChannel, MemoryEndpoint};
pub use peer::{Peer, PeerId, PeerStatsSnapshot};
pub use room::{join_room, Room, RoomError};
pub use send_target::SendTarget;
pub use signaling::{MemoryHub, MemorySignaling, SignalingAdapter, SignalingEvent};
pub use transmission::PendingTransmission;
