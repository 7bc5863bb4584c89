//! Bridge trait and stream types

use std::io;

use async_trait::async_trait;
use elmbridge_core::{BridgeError, BridgeMode, BridgeState};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;

/// Any bidirectional byte stream a listener can hand out
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// An accepted external connection
pub struct Accepted {
    pub stream: BoxedStream,
    /// Human readable peer address (`192.168.1.20:51234`, `AA:BB:CC:DD:EE:FF`)
    pub peer: String,
}

impl std::fmt::Debug for Accepted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accepted").field("peer", &self.peer).finish()
    }
}

/// Source of external connections for the accept-loop bridges
#[async_trait]
pub trait Listener: Send {
    /// Block until the next client connects
    async fn accept(&mut self) -> io::Result<Accepted>;
}

/// One of the three external-transport bridges
///
/// `start()` returns once the bridge is listening (or advertising); the
/// accept and relay work runs on background tasks until `stop()`.
#[async_trait]
pub trait Bridge: Send + Sync {
    fn mode(&self) -> BridgeMode;

    /// Bring the bridge up. Idempotent while running.
    async fn start(&self) -> Result<(), BridgeError>;

    /// Release every resource the bridge holds. Safe to call more than once
    /// and from any state.
    async fn stop(&self);

    fn state(&self) -> BridgeState;

    /// Watch lifecycle transitions
    fn subscribe_state(&self) -> watch::Receiver<BridgeState>;
}
