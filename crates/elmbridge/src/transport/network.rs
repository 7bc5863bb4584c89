//! TCP bridge
//!
//! Binds `bind_address:base_port`, moving to the next port while the
//! current one is taken, and relays every client to a fresh emulator
//! channel.

use std::io;
use std::sync::atomic::{AtomicU16, Ordering};

use async_trait::async_trait;
use elmbridge_core::{BridgeError, BridgeMode, BridgeState, NetworkConfig};
use tokio::net::TcpListener;
use tokio::sync::watch;

use super::accept::{AcceptProfile, AcceptRunner};
use super::bridge::{Accepted, Bridge, Listener};
use crate::context::BridgeContext;
use crate::relay::{Direction, RelayOptions, STREAM_CHUNK_SIZE};

/// Accepts TCP clients on a bound listener
struct TcpAcceptor {
    listener: TcpListener,
}

#[async_trait]
impl Listener for TcpAcceptor {
    async fn accept(&mut self) -> io::Result<Accepted> {
        let (stream, addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok(Accepted {
            stream: Box::new(stream),
            peer: addr.to_string(),
        })
    }
}

pub struct NetworkBridge {
    config: NetworkConfig,
    ctx: BridgeContext,
    runner: AcceptRunner,
    /// 0 until the server is bound
    bound_port: AtomicU16,
}

impl NetworkBridge {
    pub fn new(config: NetworkConfig, ctx: BridgeContext) -> Self {
        Self {
            config,
            ctx,
            runner: AcceptRunner::new(),
            bound_port: AtomicU16::new(0),
        }
    }

    /// Port the server is listening on, once started
    pub fn bound_port(&self) -> Option<u16> {
        match self.bound_port.load(Ordering::SeqCst) {
            0 => None,
            port => Some(port),
        }
    }

    /// Bind the first free port at or above `base_port`
    async fn open_server(&self) -> Result<(TcpListener, u16), BridgeError> {
        let mut port = self.config.base_port;
        loop {
            match TcpListener::bind((self.config.bind_address.as_str(), port)).await {
                Ok(listener) => {
                    self.ctx
                        .log
                        .info(&format!("Network server listening on port {}", port));
                    tracing::info!(
                        address = %self.config.bind_address,
                        port,
                        "Network server bound"
                    );
                    return Ok((listener, port));
                }
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                    self.ctx.log.debug(&format!("Port {} in use", port));
                    port = port.checked_add(1).ok_or_else(|| {
                        BridgeError::BindConflict(format!(
                            "no free port at or above {}",
                            self.config.base_port
                        ))
                    })?;
                }
                Err(e) => {
                    self.ctx.log.error(&format!("Error: {}", e));
                    return Err(BridgeError::Io(e));
                }
            }
        }
    }

    fn profile() -> AcceptProfile {
        AcceptProfile {
            transport: "Network",
            waiting: None,
            relay: RelayOptions {
                chunk_size: STREAM_CHUNK_SIZE,
                a_to_b: Direction::new("netToLoop", " * Received from network:"),
                b_to_a: Direction::new("loopToNet", " * Sending data to network:"),
            },
        }
    }
}

#[async_trait]
impl Bridge for NetworkBridge {
    fn mode(&self) -> BridgeMode {
        BridgeMode::NetworkIp
    }

    async fn start(&self) -> Result<(), BridgeError> {
        if self.runner.is_running().await {
            return Ok(());
        }

        let (listener, port) = self.open_server().await?;
        self.bound_port.store(port, Ordering::SeqCst);
        self.runner
            .launch(
                Box::new(TcpAcceptor { listener }),
                self.ctx.clone(),
                Self::profile(),
            )
            .await;
        Ok(())
    }

    async fn stop(&self) {
        self.runner.shutdown().await;
        self.bound_port.store(0, Ordering::SeqCst);
    }

    fn state(&self) -> BridgeState {
        self.runner.state()
    }

    fn subscribe_state(&self) -> watch::Receiver<BridgeState> {
        self.runner.subscribe()
    }
}
