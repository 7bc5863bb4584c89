//! Observable bridge lifecycle state

use serde::{Deserialize, Serialize};

/// Lifecycle state of a bridge
///
/// Accept-loop bridges move through
/// `Idle → Listening → Connected → Listening … → Closing → Stopped`;
/// the BLE bridge through
/// `Idle → ServiceRegistering → Advertising → Ready ⇄ Subscribed → Stopped`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeState {
    #[default]
    Idle,
    Listening,
    Connected,
    Closing,
    ServiceRegistering,
    Advertising,
    Ready,
    Subscribed,
    Stopped,
}

impl BridgeState {
    /// A peer is attached
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Subscribed)
    }

    /// `start()` has completed and `stop()` has not been called
    pub fn is_running(self) -> bool {
        !matches!(self, Self::Idle | Self::Stopped)
    }
}
