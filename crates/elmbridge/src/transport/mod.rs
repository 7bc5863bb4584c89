//! External transports
//!
//! This module provides one bridge per external transport:
//! - [`NetworkBridge`]: TCP server with port probing
//! - [`ClassicBridge`]: RFCOMM server (Serial Port Profile)
//! - [`BleBridge`]: GATT server + LE advertiser
//!
//! Radios are reached through [`ClassicRadio`] and [`BlePeripheral`]. BlueZ
//! implementations live behind the `bluez` feature; mocks are always
//! available for tests.
//!
//! # Example
//!
//! ```ignore
//! use elmbridge::transport::{create_bridge, Bridge, Radios};
//!
//! let bridge = create_bridge(BridgeMode::NetworkIp, &config, ctx, &Radios::default())?;
//! bridge.start().await?;
//! ```

mod accept;
pub mod ble;
mod bridge;
pub mod classic;
pub mod mock;
pub mod network;

#[cfg(all(target_os = "linux", feature = "bluez"))]
pub mod bluez;

pub use accept::STOP_TIMEOUT;
pub use ble::{BleBridge, BlePeripheral};
pub use bridge::{Accepted, AsyncStream, BoxedStream, Bridge, Listener};
pub use classic::{ClassicBridge, ClassicRadio};
pub use network::NetworkBridge;

use std::sync::Arc;

use elmbridge_core::{BridgeConfig, BridgeError, BridgeMode};

use crate::context::BridgeContext;

/// Radio back-ends available on this host
#[derive(Clone, Default)]
pub struct Radios {
    pub classic: Option<Arc<dyn ClassicRadio>>,
    pub ble: Option<Arc<dyn BlePeripheral>>,
}

/// Create the bridge for `mode`
pub fn create_bridge(
    mode: BridgeMode,
    config: &BridgeConfig,
    ctx: BridgeContext,
    radios: &Radios,
) -> Result<Arc<dyn Bridge>, BridgeError> {
    match mode {
        BridgeMode::NetworkIp => Ok(Arc::new(NetworkBridge::new(config.network.clone(), ctx))),
        BridgeMode::ClassicRadio => {
            let radio = radios.classic.clone().ok_or_else(|| {
                BridgeError::TransportUnavailable(
                    "Bluetooth Classic requires Linux and the 'bluez' feature".to_string(),
                )
            })?;
            Ok(Arc::new(ClassicBridge::new(
                radio,
                config.classic.clone(),
                ctx,
            )))
        }
        BridgeMode::LowEnergyRadio => {
            let peripheral = radios.ble.clone().ok_or_else(|| {
                BridgeError::TransportUnavailable(
                    "Bluetooth LE requires Linux and the 'bluez' feature".to_string(),
                )
            })?;
            Ok(Arc::new(BleBridge::new(peripheral, config.ble.clone(), ctx)))
        }
    }
}
