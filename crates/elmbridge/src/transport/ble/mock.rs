//! Mock LE peripheral for testing

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use elmbridge_core::BridgeError;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::advertisement::{AdvertiseData, AdvertiseSettings};
use super::gatt::{AttributeService, GattEvent, GattStatus};
use super::peripheral::BlePeripheral;

/// One notify call seen by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub device: String,
    pub characteristic: Uuid,
    pub value: Vec<u8>,
}

/// Mock peripheral
///
/// Confirms every registered service with a `ServiceAdded` event unless
/// told otherwise, and records notifications and responses.
pub struct MockPeripheral {
    enabled: AtomicBool,
    multi_advertisement: AtomicBool,
    /// `None` leaves registration unconfirmed
    service_status: RwLock<Option<GattStatus>>,
    events: Mutex<Option<mpsc::UnboundedSender<GattEvent>>>,
    services: RwLock<Vec<AttributeService>>,
    notifications: Mutex<Vec<Notification>>,
    responses: Mutex<Vec<(String, u32, GattStatus)>>,
    advertising: AtomicBool,
    /// Packet and scan response of the last `start_advertising`
    advertised: Mutex<Option<(AdvertiseData, AdvertiseData)>>,
    notify_delay: RwLock<Duration>,
    fail_teardown: AtomicBool,
}

impl MockPeripheral {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            multi_advertisement: AtomicBool::new(true),
            service_status: RwLock::new(Some(GattStatus::Success)),
            events: Mutex::new(None),
            services: RwLock::new(Vec::new()),
            notifications: Mutex::new(Vec::new()),
            responses: Mutex::new(Vec::new()),
            advertising: AtomicBool::new(false),
            advertised: Mutex::new(None),
            notify_delay: RwLock::new(Duration::ZERO),
            fail_teardown: AtomicBool::new(false),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_multi_advertisement(&self, supported: bool) {
        self.multi_advertisement.store(supported, Ordering::SeqCst);
    }

    /// Status reported for registered services; `None` never confirms
    pub fn set_service_status(&self, status: Option<GattStatus>) {
        *self.service_status.write() = status;
    }

    /// Time each `notify` takes before it is recorded
    pub fn set_notify_delay(&self, delay: Duration) {
        *self.notify_delay.write() = delay;
    }

    /// Make `stop_advertising` and `close_gatt_server` fail
    pub fn set_fail_teardown(&self, fail: bool) {
        self.fail_teardown.store(fail, Ordering::SeqCst);
    }

    /// Deliver an event as if raised by the platform. False when no
    /// attribute server is open.
    pub fn inject(&self, event: GattEvent) -> bool {
        match self.events.lock().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().clone()
    }

    pub fn responses(&self) -> Vec<(String, u32, GattStatus)> {
        self.responses.lock().clone()
    }

    pub fn services(&self) -> Vec<AttributeService> {
        self.services.read().clone()
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising.load(Ordering::SeqCst)
    }

    pub fn advertised(&self) -> Option<(AdvertiseData, AdvertiseData)> {
        self.advertised.lock().clone()
    }

    pub fn is_server_open(&self) -> bool {
        self.events.lock().is_some()
    }

    /// Poll until at least `count` notifications were recorded
    pub async fn wait_for_notifications(&self, count: usize, timeout: Duration) -> Vec<Notification> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let seen = self.notifications();
            if seen.len() >= count || tokio::time::Instant::now() >= deadline {
                return seen;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn teardown_result(&self) -> Result<(), BridgeError> {
        if self.fail_teardown.load(Ordering::SeqCst) {
            Err(BridgeError::Platform("mock teardown failure".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for MockPeripheral {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlePeripheral for MockPeripheral {
    async fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn supports_multi_advertisement(&self) -> bool {
        self.multi_advertisement.load(Ordering::SeqCst)
    }

    async fn device_name(&self) -> Option<String> {
        Some("MockELM".to_string())
    }

    async fn open_gatt_server(
        &self,
        events: mpsc::UnboundedSender<GattEvent>,
    ) -> Result<(), BridgeError> {
        *self.events.lock() = Some(events);
        Ok(())
    }

    async fn add_service(&self, service: &AttributeService) -> Result<(), BridgeError> {
        self.services.write().push(service.clone());
        let status = *self.service_status.read();
        if let Some(status) = status {
            self.inject(GattEvent::ServiceAdded {
                service: service.uuid,
                status,
            });
        }
        Ok(())
    }

    async fn send_response(
        &self,
        device: &str,
        request_id: u32,
        status: GattStatus,
    ) -> Result<(), BridgeError> {
        self.responses
            .lock()
            .push((device.to_string(), request_id, status));
        Ok(())
    }

    async fn notify(
        &self,
        device: &str,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), BridgeError> {
        let delay = *self.notify_delay.read();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.notifications.lock().push(Notification {
            device: device.to_string(),
            characteristic,
            value: value.to_vec(),
        });
        Ok(())
    }

    async fn start_advertising(
        &self,
        _settings: &AdvertiseSettings,
        data: &AdvertiseData,
        scan_response: &AdvertiseData,
    ) -> Result<(), BridgeError> {
        *self.advertised.lock() = Some((data.clone(), scan_response.clone()));
        self.advertising.store(true, Ordering::SeqCst);
        self.inject(GattEvent::AdvertisingStarted);
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), BridgeError> {
        self.advertising.store(false, Ordering::SeqCst);
        self.teardown_result()
    }

    async fn close_gatt_server(&self) -> Result<(), BridgeError> {
        self.events.lock().take();
        self.teardown_result()
    }
}
