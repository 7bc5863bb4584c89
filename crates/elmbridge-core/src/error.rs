//! Bridge error taxonomy

use thiserror::Error;

/// Errors raised by bridges and their collaborators
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Radio is off or lacks a required capability. Terminal for the bridge
    /// instance until the user restarts it.
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// Listening endpoint is already taken
    #[error("Bind conflict: {0}")]
    BindConflict(String),

    /// Peer closed the connection cleanly
    #[error("Peer disconnected")]
    PeerDisconnected,

    /// Mid-stream I/O failure
    #[error("Transfer error: {0}")]
    Transfer(#[source] std::io::Error),

    /// `stop()` was requested while blocked
    #[error("Cancelled")]
    Cancelled,

    /// Emulator could not be launched or reached
    #[error("Emulator error: {0}")]
    Emulator(String),

    /// Error reported by the radio stack
    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Capability-absence failures are never retried
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TransportUnavailable(_) | Self::Config(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
