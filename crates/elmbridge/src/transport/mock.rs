//! Mock Classic radio for testing
//!
//! Connections are simulated with in-memory duplex pipes: [`MockRadio::connect`]
//! hands one end to the bridge and returns the other to the test.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use elmbridge_core::{BridgeError, ClassicConfig};
use parking_lot::RwLock;
use tokio::io::DuplexStream;
use tokio::sync::{mpsc, Mutex};

use super::bridge::{Accepted, Listener};
use super::classic::ClassicRadio;

const PIPE_CAPACITY: usize = 4096;

type Incoming = io::Result<Accepted>;

/// Mock RFCOMM radio
pub struct MockRadio {
    enabled: AtomicBool,
    bind_conflict: AtomicBool,
    incoming_tx: mpsc::UnboundedSender<Incoming>,
    incoming_rx: Arc<Mutex<mpsc::UnboundedReceiver<Incoming>>>,
    /// Profiles passed to `listen`, newest last
    registrations: RwLock<Vec<ClassicConfig>>,
}

impl MockRadio {
    pub fn new() -> Self {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Self {
            enabled: AtomicBool::new(true),
            bind_conflict: AtomicBool::new(false),
            incoming_tx,
            incoming_rx: Arc::new(Mutex::new(incoming_rx)),
            registrations: RwLock::new(Vec::new()),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Make the next `listen` fail as if the service record were taken
    pub fn set_bind_conflict(&self, conflict: bool) {
        self.bind_conflict.store(conflict, Ordering::SeqCst);
    }

    /// Simulate a remote device connecting; returns the device's end
    pub fn connect(&self, peer: &str) -> DuplexStream {
        let (device, bridge) = tokio::io::duplex(PIPE_CAPACITY);
        let _ = self.incoming_tx.send(Ok(Accepted {
            stream: Box::new(bridge),
            peer: peer.to_string(),
        }));
        device
    }

    /// Make the pending accept fail once
    pub fn inject_accept_error(&self, kind: io::ErrorKind) {
        let _ = self
            .incoming_tx
            .send(Err(io::Error::new(kind, "injected accept failure")));
    }

    pub fn registrations(&self) -> Vec<ClassicConfig> {
        self.registrations.read().clone()
    }
}

impl Default for MockRadio {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClassicRadio for MockRadio {
    async fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn listen(&self, profile: &ClassicConfig) -> Result<Box<dyn Listener>, BridgeError> {
        if self.bind_conflict.load(Ordering::SeqCst) {
            return Err(BridgeError::BindConflict(format!(
                "service {} already registered",
                profile.service_uuid
            )));
        }
        self.registrations.write().push(profile.clone());
        Ok(Box::new(MockListener {
            incoming: self.incoming_rx.clone(),
        }))
    }
}

struct MockListener {
    incoming: Arc<Mutex<mpsc::UnboundedReceiver<Incoming>>>,
}

#[async_trait]
impl Listener for MockListener {
    async fn accept(&mut self) -> io::Result<Accepted> {
        match self.incoming.lock().await.recv().await {
            Some(incoming) => incoming,
            None => Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "mock radio dropped",
            )),
        }
    }
}
