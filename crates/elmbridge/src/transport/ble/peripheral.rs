//! Platform LE peripheral abstraction

use async_trait::async_trait;
use elmbridge_core::BridgeError;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::advertisement::{AdvertiseData, AdvertiseSettings};
use super::gatt::{AttributeService, GattEvent, GattStatus};

/// Attribute server plus advertiser of the local LE radio
///
/// Platform callbacks are not invoked directly: implementations push
/// [`GattEvent`]s onto the queue given to [`BlePeripheral::open_gatt_server`]
/// and the bridge consumes them on a single task.
#[async_trait]
pub trait BlePeripheral: Send + Sync {
    async fn is_enabled(&self) -> bool;

    /// Radio can advertise while acting as a peripheral
    async fn supports_multi_advertisement(&self) -> bool;

    /// Name the radio advertises with, if known
    async fn device_name(&self) -> Option<String>;

    async fn open_gatt_server(
        &self,
        events: mpsc::UnboundedSender<GattEvent>,
    ) -> Result<(), BridgeError>;

    /// Register `service`; completion arrives as [`GattEvent::ServiceAdded`]
    async fn add_service(&self, service: &AttributeService) -> Result<(), BridgeError>;

    async fn send_response(
        &self,
        device: &str,
        request_id: u32,
        status: GattStatus,
    ) -> Result<(), BridgeError>;

    /// Push one notification of at most the negotiated MTU
    async fn notify(
        &self,
        device: &str,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), BridgeError>;

    async fn start_advertising(
        &self,
        settings: &AdvertiseSettings,
        data: &AdvertiseData,
        scan_response: &AdvertiseData,
    ) -> Result<(), BridgeError>;

    async fn stop_advertising(&self) -> Result<(), BridgeError>;

    async fn close_gatt_server(&self) -> Result<(), BridgeError>;
}
