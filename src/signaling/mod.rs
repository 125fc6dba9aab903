//! Signaling: JSON envelope codec and the HTTP/WebSocket endpoint

pub mod protocol;
pub mod server;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use protocol::{IceCandidate, SdpType, SessionDescription, SignalMessage};
pub use server::{Inbound, Outbound, ServerEvent, SignalingChannel};

/// Identity of one WebSocket connection and the peer behind it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(Uuid);

impl PeerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
