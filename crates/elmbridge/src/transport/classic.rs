//! Bluetooth Classic (RFCOMM / Serial Port Profile) bridge

use std::sync::Arc;

use async_trait::async_trait;
use elmbridge_core::{BridgeError, BridgeMode, BridgeState, ClassicConfig};
use tokio::sync::watch;

use super::accept::{AcceptProfile, AcceptRunner};
use super::bridge::{Bridge, Listener};
use crate::context::BridgeContext;
use crate::relay::{Direction, RelayOptions, STREAM_CHUNK_SIZE};

/// Platform radio able to publish an RFCOMM service record
#[async_trait]
pub trait ClassicRadio: Send + Sync {
    /// Adapter is present and powered
    async fn is_enabled(&self) -> bool;

    /// Register the service record and return a listener for it
    async fn listen(&self, profile: &ClassicConfig) -> Result<Box<dyn Listener>, BridgeError>;
}

pub struct ClassicBridge {
    radio: Arc<dyn ClassicRadio>,
    config: ClassicConfig,
    ctx: BridgeContext,
    runner: AcceptRunner,
}

impl ClassicBridge {
    pub fn new(radio: Arc<dyn ClassicRadio>, config: ClassicConfig, ctx: BridgeContext) -> Self {
        Self {
            radio,
            config,
            ctx,
            runner: AcceptRunner::new(),
        }
    }

    fn profile() -> AcceptProfile {
        AcceptProfile {
            transport: "Bluetooth",
            waiting: Some("Waiting for connection...".to_string()),
            relay: RelayOptions {
                chunk_size: STREAM_CHUNK_SIZE,
                a_to_b: Direction::new(
                    "btToLoop",
                    " * Received from Bluetooth: (passing to loopback)",
                ),
                b_to_a: Direction::new(
                    "loopToBt",
                    " * Sending the data received from loopback on bluetooth:",
                ),
            },
        }
    }
}

#[async_trait]
impl Bridge for ClassicBridge {
    fn mode(&self) -> BridgeMode {
        BridgeMode::ClassicRadio
    }

    async fn start(&self) -> Result<(), BridgeError> {
        if self.runner.is_running().await {
            return Ok(());
        }

        if !self.radio.is_enabled().await {
            self.ctx.notifier.prompt_enable_radio();
            self.ctx.log.error("Bluetooth is disabled");
            return Err(BridgeError::TransportUnavailable(
                "Bluetooth adapter is disabled".to_string(),
            ));
        }

        let listener = match self.radio.listen(&self.config).await {
            Ok(listener) => listener,
            Err(e) => {
                self.ctx.log.error(&format!("Error: {}", e));
                return Err(e);
            }
        };

        tracing::info!(
            service = %self.config.service_name,
            uuid = %self.config.service_uuid,
            "RFCOMM service registered"
        );
        self.runner
            .launch(listener, self.ctx.clone(), Self::profile())
            .await;
        Ok(())
    }

    async fn stop(&self) {
        self.runner.shutdown().await;
    }

    fn state(&self) -> BridgeState {
        self.runner.state()
    }

    fn subscribe_state(&self) -> watch::Receiver<BridgeState> {
        self.runner.subscribe()
    }
}
