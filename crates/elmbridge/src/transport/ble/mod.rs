//! Bluetooth Low Energy bridge
//!
//! ```text
//!            ┌──────────────── BleBridge ────────────────┐
//!  client ─▶ │ GattEvent queue ─▶ event loop ─▶ channel  │ ─▶ emulator
//!  client ◀─ │ notify ◀─ egress task ◀──────── channel   │ ◀─ emulator
//!            └───────────────────────────────────────────┘
//! ```
//!
//! The platform pushes attribute-server callbacks onto one queue. A single
//! event-loop task consumes it: RX writes go straight to the emulator
//! channel, CCCD writes update the subscription. The egress task reads the
//! emulator output and notifies the subscriber in 20-byte fragments.
//! Output produced while nobody is subscribed is dropped.

pub mod advertisement;
pub mod gatt;
pub mod mock;
mod peripheral;

pub use peripheral::BlePeripheral;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use elmbridge_core::{hexdump, BleConfig, BridgeError, BridgeMode, BridgeState, LogSink};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use self::advertisement::{AdvertiseData, AdvertiseSettings};
use self::gatt::{
    AttributeService, DeviceId, GattEvent, GattStatus, CCCD_UUID, ENABLE_NOTIFICATION_VALUE,
    GREETING, RX_CHARACTERISTIC_UUID, SERVICE_UUID, TX_CHARACTERISTIC_UUID,
};
use super::accept::STOP_TIMEOUT;
use super::bridge::Bridge;
use crate::context::BridgeContext;
use crate::relay::BLE_CHUNK_SIZE;

/// Interval between checks for the service registration callback
const SERVICE_POLL_INTERVAL: Duration = Duration::from_millis(10);

// =============================================================================
// Subscription state
// =============================================================================

#[derive(Debug, Default)]
struct SubscriptionInner {
    device: Option<DeviceId>,
    notifications_enabled: bool,
}

/// The single connected device and whether it enabled TX notifications
#[derive(Debug, Default)]
pub struct SubscriptionState {
    inner: Mutex<SubscriptionInner>,
}

impl SubscriptionState {
    pub fn connected(&self, device: &str) {
        self.inner.lock().device = Some(device.to_string());
    }

    /// Any disconnect clears the subscriber and its notification flag
    pub fn disconnected(&self) {
        let mut inner = self.inner.lock();
        inner.device = None;
        inner.notifications_enabled = false;
    }

    pub fn set_notifications(&self, device: &str, enabled: bool) {
        let mut inner = self.inner.lock();
        inner.device = Some(device.to_string());
        inner.notifications_enabled = enabled;
    }

    /// Device that should receive notifications right now
    pub fn subscriber(&self) -> Option<DeviceId> {
        let inner = self.inner.lock();
        if inner.notifications_enabled {
            inner.device.clone()
        } else {
            None
        }
    }

    pub fn is_subscribed(&self, device: &str) -> bool {
        let inner = self.inner.lock();
        inner.notifications_enabled && inner.device.as_deref() == Some(device)
    }

    pub fn clear(&self) {
        *self.inner.lock() = SubscriptionInner::default();
    }
}

/// Send `data` to `device` as ordered notify fragments, stopping as soon as
/// the device is no longer subscribed. Returns the fragments sent.
pub(crate) async fn notify_fragments(
    peripheral: &dyn BlePeripheral,
    subscription: &SubscriptionState,
    device: &str,
    data: &[u8],
) -> Result<usize, BridgeError> {
    let mut sent = 0;
    for fragment in gatt::fragments(data) {
        if !subscription.is_subscribed(device) {
            break;
        }
        peripheral
            .notify(device, TX_CHARACTERISTIC_UUID, fragment)
            .await?;
        sent += 1;
    }
    Ok(sent)
}

// =============================================================================
// Bridge
// =============================================================================

struct Session {
    tasks: Vec<JoinHandle<()>>,
}

pub struct BleBridge {
    peripheral: Arc<dyn BlePeripheral>,
    config: BleConfig,
    ctx: BridgeContext,
    state: Arc<watch::Sender<BridgeState>>,
    subscription: Arc<SubscriptionState>,
    /// Cancels the running session, or a start still waiting on the radio
    cancel: Mutex<Option<CancellationToken>>,
    session: tokio::sync::Mutex<Option<Session>>,
}

impl BleBridge {
    pub fn new(peripheral: Arc<dyn BlePeripheral>, config: BleConfig, ctx: BridgeContext) -> Self {
        let (state, _) = watch::channel(BridgeState::Idle);
        Self {
            peripheral,
            config,
            ctx,
            state: Arc::new(state),
            subscription: Arc::new(SubscriptionState::default()),
            cancel: Mutex::new(None),
            session: tokio::sync::Mutex::new(None),
        }
    }

    /// Current subscriber, if any
    pub fn subscriber(&self) -> Option<DeviceId> {
        self.subscription.subscriber()
    }

    async fn bring_up(&self, cancel: &CancellationToken) -> Result<Session, BridgeError> {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        self.peripheral.open_gatt_server(events_tx).await?;

        self.state.send_replace(BridgeState::ServiceRegistering);
        self.peripheral
            .add_service(&AttributeService::elm327())
            .await?;
        let early = self.wait_for_service(&mut events, cancel).await?;

        let name = match &self.config.device_name {
            Some(name) => Some(name.clone()),
            None => self.peripheral.device_name().await,
        };
        let data = AdvertiseData::named(name);
        let scan_response = AdvertiseData::service(SERVICE_UUID);
        self.peripheral
            .start_advertising(&AdvertiseSettings::elm327(), &data, &scan_response)
            .await?;
        self.log_advertisement(&data, &scan_response);
        self.state.send_replace(BridgeState::Advertising);

        let connector = self.ctx.connector();
        let channel = tokio::select! {
            _ = cancel.cancelled() => return Err(BridgeError::Cancelled),
            channel = connector.connect() => channel?,
        };
        let (channel_read, channel_write) = channel.into_split();

        self.state.send_replace(BridgeState::Ready);

        // one payload's fragments are never interleaved with another's
        let tx_lock = Arc::new(tokio::sync::Mutex::new(()));
        let event_loop = EventLoop {
            peripheral: self.peripheral.clone(),
            subscription: self.subscription.clone(),
            tx_lock: tx_lock.clone(),
            log: self.ctx.log.clone(),
            state: self.state.clone(),
            channel: channel_write,
        };
        let egress = Egress {
            peripheral: self.peripheral.clone(),
            subscription: self.subscription.clone(),
            tx_lock,
            log: self.ctx.log.clone(),
            channel: channel_read,
        };

        Ok(Session {
            tasks: vec![
                tokio::spawn(event_loop.run(early, events, cancel.clone())),
                tokio::spawn(egress.run(cancel.clone())),
            ],
        })
    }

    /// Poll the event queue every 10 ms until the service is registered.
    /// Events that arrive first are handed back for the event loop.
    async fn wait_for_service(
        &self,
        events: &mut mpsc::UnboundedReceiver<GattEvent>,
        cancel: &CancellationToken,
    ) -> Result<Vec<GattEvent>, BridgeError> {
        let deadline = tokio::time::Instant::now()
            + Duration::from_millis(self.config.registration_timeout_ms);
        let mut early = Vec::new();

        loop {
            loop {
                match events.try_recv() {
                    Ok(GattEvent::ServiceAdded {
                        status: GattStatus::Success,
                        ..
                    }) => {
                        self.ctx.log.debug("GATT service added");
                        return Ok(early);
                    }
                    Ok(GattEvent::ServiceAdded { status, .. }) => {
                        self.ctx
                            .log
                            .debug(&format!("Service add failed: {:?}", status));
                        return Err(BridgeError::Platform(format!(
                            "service registration failed: {:?}",
                            status
                        )));
                    }
                    Ok(other) => early.push(other),
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        return Err(BridgeError::Platform(
                            "attribute server closed during registration".to_string(),
                        ));
                    }
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(BridgeError::Platform(format!(
                    "service not registered within {} ms",
                    self.config.registration_timeout_ms
                )));
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(BridgeError::Cancelled),
                _ = tokio::time::sleep(SERVICE_POLL_INTERVAL) => {}
            }
        }
    }

    fn log_advertisement(&self, data: &AdvertiseData, scan_response: &AdvertiseData) {
        let payload = data.combined_payload(scan_response);
        self.ctx
            .log
            .debug(&format!("ADV length = {}", payload.len()));
        self.ctx.log.debug(&hexdump::dump_compact(&payload));
    }

    async fn teardown(&self) {
        if let Err(e) = self.peripheral.stop_advertising().await {
            self.ctx.log.debug(&format!("Error: {}", e));
        }
        if let Err(e) = self.peripheral.close_gatt_server().await {
            self.ctx.log.debug(&format!("Error: {}", e));
        }
        self.subscription.clear();
    }
}

#[async_trait]
impl Bridge for BleBridge {
    fn mode(&self) -> BridgeMode {
        BridgeMode::LowEnergyRadio
    }

    async fn start(&self) -> Result<(), BridgeError> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Ok(());
        }

        if !self.peripheral.is_enabled().await {
            self.ctx.notifier.prompt_enable_radio();
            self.ctx.log.error("Bluetooth is disabled");
            return Err(BridgeError::TransportUnavailable(
                "Bluetooth adapter is disabled".to_string(),
            ));
        }

        if !self.peripheral.supports_multi_advertisement().await {
            self.ctx.log.error("BLE advertising not supported");
            return Err(BridgeError::TransportUnavailable(
                "BLE advertising not supported".to_string(),
            ));
        }

        self.ctx.connector().clear_stale_artifacts();

        let cancel = CancellationToken::new();
        *self.cancel.lock() = Some(cancel.clone());

        match self.bring_up(&cancel).await {
            Ok(started) => {
                tracing::info!(service = %SERVICE_UUID, "BLE bridge ready");
                *session = Some(started);
                Ok(())
            }
            Err(e) => {
                self.ctx.log.debug(&format!("Error: {}", e));
                cancel.cancel();
                self.cancel.lock().take();
                self.teardown().await;
                self.state.send_replace(BridgeState::Stopped);
                Err(e)
            }
        }
    }

    async fn stop(&self) {
        // Interrupt a start still waiting on the radio before taking the lock
        let pending = self.cancel.lock().take();
        if let Some(cancel) = pending {
            cancel.cancel();
        }

        let session = self.session.lock().await.take();
        if let Some(session) = session {
            for mut task in session.tasks {
                if tokio::time::timeout(STOP_TIMEOUT, &mut task).await.is_err() {
                    tracing::warn!("BLE task did not stop in time, aborting");
                    task.abort();
                }
            }
        }

        self.teardown().await;
        self.state.send_replace(BridgeState::Stopped);
    }

    fn state(&self) -> BridgeState {
        *self.state.borrow()
    }

    fn subscribe_state(&self) -> watch::Receiver<BridgeState> {
        self.state.subscribe()
    }
}

// =============================================================================
// Tasks
// =============================================================================

/// Consumes platform events in arrival order
struct EventLoop {
    peripheral: Arc<dyn BlePeripheral>,
    subscription: Arc<SubscriptionState>,
    tx_lock: Arc<tokio::sync::Mutex<()>>,
    log: Arc<dyn LogSink>,
    state: Arc<watch::Sender<BridgeState>>,
    channel: OwnedWriteHalf,
}

impl EventLoop {
    async fn run(
        mut self,
        early: Vec<GattEvent>,
        mut events: mpsc::UnboundedReceiver<GattEvent>,
        cancel: CancellationToken,
    ) {
        for event in early {
            self.handle(event, &cancel).await;
        }

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.handle(event, &cancel).await;
        }
    }

    async fn handle(&mut self, event: GattEvent, cancel: &CancellationToken) {
        match event {
            GattEvent::ConnectionStateChanged {
                device,
                connected: true,
            } => {
                self.log.debug(&format!("{}: connected", device));
                self.subscription.connected(&device);
            }
            GattEvent::ConnectionStateChanged {
                device,
                connected: false,
            } => {
                self.log.debug(&format!("{}: disconnected", device));
                self.subscription.disconnected();
                self.state.send_replace(BridgeState::Ready);
            }
            GattEvent::DescriptorWrite {
                device,
                request_id,
                descriptor,
                value,
                response_needed,
            } => {
                if descriptor == CCCD_UUID {
                    let enabled = value == ENABLE_NOTIFICATION_VALUE;
                    self.subscription.set_notifications(&device, enabled);
                    if enabled {
                        self.state.send_replace(BridgeState::Subscribed);
                        self.send_greeting(&device).await;
                    } else {
                        self.state.send_replace(BridgeState::Ready);
                    }
                }
                if response_needed {
                    self.respond(&device, request_id).await;
                }
            }
            GattEvent::CharacteristicWrite {
                device,
                request_id,
                characteristic,
                value,
                response_needed,
            } => {
                if characteristic == RX_CHARACTERISTIC_UUID {
                    self.forward_to_emulator(&value, cancel).await;
                }
                if response_needed {
                    self.respond(&device, request_id).await;
                }
            }
            GattEvent::AdvertisingStarted => self.log.debug("BLE advertising started"),
            GattEvent::AdvertisingFailed { code } => {
                self.log.debug(&format!("BLE advertising failed: {}", code))
            }
            GattEvent::ServiceAdded { .. } => {}
        }
    }

    async fn send_greeting(&self, device: &str) {
        let _tx = self.tx_lock.lock().await;
        if let Err(e) =
            notify_fragments(&*self.peripheral, &self.subscription, device, GREETING).await
        {
            self.log.debug(&format!("Error: {}", e));
        }
    }

    async fn forward_to_emulator(&mut self, value: &[u8], cancel: &CancellationToken) {
        let written = tokio::select! {
            _ = cancel.cancelled() => return,
            written = async {
                self.channel.write_all(value).await?;
                self.channel.flush().await
            } => written,
        };
        match written {
            Ok(()) => {
                self.log
                    .debug(" * Received from Bluetooth: (passing to loopback)");
                self.log.debug(&hexdump::dump(value));
            }
            Err(e) => self.log.debug(&format!("exiting btToLoop: {}", e)),
        }
    }

    async fn respond(&self, device: &str, request_id: u32) {
        if let Err(e) = self
            .peripheral
            .send_response(device, request_id, GattStatus::Success)
            .await
        {
            self.log.debug(&format!("Error: {}", e));
        }
    }
}

/// Emulator output to the subscriber
struct Egress {
    peripheral: Arc<dyn BlePeripheral>,
    subscription: Arc<SubscriptionState>,
    tx_lock: Arc<tokio::sync::Mutex<()>>,
    log: Arc<dyn LogSink>,
    channel: OwnedReadHalf,
}

impl Egress {
    async fn run(mut self, cancel: CancellationToken) {
        let mut buf = vec![0u8; BLE_CHUNK_SIZE];
        loop {
            let n = tokio::select! {
                _ = cancel.cancelled() => break,
                read = self.channel.read(&mut buf) => match read {
                    Ok(0) => {
                        self.log.debug("exiting loopToBt: end of stream");
                        break;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        self.log.debug(&format!("exiting loopToBt: {}", e));
                        break;
                    }
                },
            };

            let chunk = &buf[..n];
            self.log
                .debug(" * Sending the data received from loopback on bluetooth:");
            self.log.debug(&hexdump::dump(chunk));

            let Some(device) = self.subscription.subscriber() else {
                self.log
                    .debug(&format!("No subscriber, dropped {} bytes", n));
                continue;
            };

            let _tx = self.tx_lock.lock().await;
            if let Err(e) =
                notify_fragments(&*self.peripheral, &self.subscription, &device, chunk).await
            {
                self.log.debug(&format!("Error: {}", e));
            }
        }
    }
}
