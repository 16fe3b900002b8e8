//! Send targets — who a room action addresses.

use crate::peer::PeerId;

/// Addressing for one send call.
///
/// Ids in an explicit list that are no longer connected are skipped
/// silently: disconnect races are expected churn, never errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendTarget {
    /// Every currently connected peer.
    Broadcast,
    /// An explicit set of peers.
    Peers(Vec<PeerId>),
}

impl Default for SendTarget {
    fn default() -> Self {
        SendTarget::Broadcast
    }
}

impl From<&str> for SendTarget {
    fn from(peer_id: &str) -> Self {
        SendTarget::Peers(vec![peer_id.to_string()])
    }
}

impl From<PeerId> for SendTarget {
    fn from(peer_id: PeerId) -> Self {
        SendTarget::Peers(vec![peer_id])
    }
}

impl From<Vec<PeerId>> for SendTarget {
    fn from(peer_ids: Vec<PeerId>) -> Self {
        SendTarget::Peers(peer_ids)
    }
}
