//! Keeps exactly one bridge active

use std::collections::HashMap;
use std::sync::Arc;

use elmbridge_core::{BridgeConfig, BridgeError, BridgeMode};
use tokio::sync::Mutex;

use crate::context::BridgeContext;
use crate::transport::{create_bridge, Bridge, Radios};

/// Holds one bridge per mode and forwards start/stop to the active one
pub struct Orchestrator {
    bridges: HashMap<BridgeMode, Arc<dyn Bridge>>,
    active: Mutex<Option<BridgeMode>>,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self {
            bridges: HashMap::new(),
            active: Mutex::new(None),
        }
    }

    /// Build a bridge for every mode the host supports
    pub fn from_config(config: &BridgeConfig, ctx: BridgeContext, radios: &Radios) -> Self {
        let mut orchestrator = Self::new();
        for mode in [
            BridgeMode::NetworkIp,
            BridgeMode::ClassicRadio,
            BridgeMode::LowEnergyRadio,
        ] {
            match create_bridge(mode, config, ctx.clone(), radios) {
                Ok(bridge) => orchestrator.register(bridge),
                Err(e) => tracing::debug!(%mode, error = %e, "Bridge not available"),
            }
        }
        orchestrator
    }

    /// Add (or replace) the bridge serving `bridge.mode()`
    pub fn register(&mut self, bridge: Arc<dyn Bridge>) {
        self.bridges.insert(bridge.mode(), bridge);
    }

    pub fn with_bridge(mut self, bridge: Arc<dyn Bridge>) -> Self {
        self.register(bridge);
        self
    }

    pub fn bridge(&self, mode: BridgeMode) -> Option<Arc<dyn Bridge>> {
        self.bridges.get(&mode).cloned()
    }

    pub fn available_modes(&self) -> Vec<BridgeMode> {
        let mut modes: Vec<BridgeMode> = self.bridges.keys().copied().collect();
        modes.sort_by_key(|m| m.to_string());
        modes
    }

    pub async fn active(&self) -> Option<BridgeMode> {
        *self.active.lock().await
    }

    /// Stop the active bridge, if it serves another mode, then start `mode`
    pub async fn activate(&self, mode: BridgeMode) -> Result<(), BridgeError> {
        let mut active = self.active.lock().await;

        let bridge = self.bridges.get(&mode).cloned().ok_or_else(|| {
            BridgeError::TransportUnavailable(format!("no {} bridge on this host", mode))
        })?;

        if let Some(current) = *active {
            if current == mode && bridge.state().is_running() {
                return Ok(());
            }
            if let Some(previous) = self.bridges.get(&current) {
                tracing::info!(from = %current, to = %mode, "Switching bridge");
                previous.stop().await;
            }
            *active = None;
        }

        bridge.start().await?;
        tracing::info!(%mode, "Bridge started");
        *active = Some(mode);
        Ok(())
    }

    /// Stop the active bridge
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        if let Some(mode) = active.take() {
            if let Some(bridge) = self.bridges.get(&mode) {
                bridge.stop().await;
                tracing::info!(%mode, "Bridge stopped");
            }
        }
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}
