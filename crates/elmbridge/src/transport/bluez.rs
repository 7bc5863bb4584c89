//! BlueZ radios (Linux, `bluez` feature)
//!
//! - [`BluezClassic`]: RFCOMM server registered as a BlueZ profile
//! - [`BluezPeripheral`]: GATT application plus LE advertisement
//!
//! BlueZ answers CCCD writes itself. A notify session started by the
//! client is reported as a CCCD enable write, and a stopped session as a
//! disable write, so the bridge sees the same event stream on every
//! platform.

use std::collections::BTreeSet;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bluer::adv::{Advertisement, AdvertisementHandle, Type as AdvertisementType};
use bluer::gatt::local::{
    Application, ApplicationHandle, Characteristic, CharacteristicNotifier,
    CharacteristicNotify, CharacteristicNotifyMethod, CharacteristicWrite,
    CharacteristicWriteMethod, Service,
};
use bluer::rfcomm::{Profile, ProfileHandle, Role};
use bluer::{Adapter, Session};
use elmbridge_core::{BridgeError, ClassicConfig};
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use super::ble::advertisement::{AdvertiseData, AdvertiseSettings};
use super::ble::gatt::{
    AttributeService, GattEvent, GattStatus, CCCD_UUID, ENABLE_NOTIFICATION_VALUE,
};
use super::ble::BlePeripheral;
use super::bridge::{Accepted, Listener};
use super::classic::ClassicRadio;

/// BlueZ does not report which central enabled notifications
const NOTIFY_CENTRAL: &str = "central";

fn platform_error(e: bluer::Error) -> BridgeError {
    BridgeError::Platform(e.to_string())
}

/// Connection to bluetoothd and its default adapter
#[derive(Clone)]
pub struct BluezPlatform {
    session: Session,
    adapter: Adapter,
}

impl BluezPlatform {
    pub async fn new() -> Result<Self, BridgeError> {
        let session = Session::new().await.map_err(|e| {
            BridgeError::TransportUnavailable(format!("bluetoothd unreachable: {}", e))
        })?;
        let adapter = session.default_adapter().await.map_err(|e| {
            BridgeError::TransportUnavailable(format!("no Bluetooth adapter: {}", e))
        })?;
        tracing::info!(adapter = %adapter.name(), "Using Bluetooth adapter");
        Ok(Self { session, adapter })
    }

    pub fn classic(&self) -> BluezClassic {
        BluezClassic {
            session: self.session.clone(),
            adapter: self.adapter.clone(),
        }
    }

    pub fn peripheral(&self) -> BluezPeripheral {
        BluezPeripheral::new(self.adapter.clone())
    }
}

async fn adapter_powered(adapter: &Adapter) -> bool {
    match adapter.is_powered().await {
        Ok(powered) => powered,
        Err(e) => {
            tracing::warn!(error = %e, "Could not read adapter power state");
            false
        }
    }
}

// =============================================================================
// RFCOMM
// =============================================================================

pub struct BluezClassic {
    session: Session,
    adapter: Adapter,
}

#[async_trait]
impl ClassicRadio for BluezClassic {
    async fn is_enabled(&self) -> bool {
        adapter_powered(&self.adapter).await
    }

    async fn listen(&self, profile: &ClassicConfig) -> Result<Box<dyn Listener>, BridgeError> {
        let registration = Profile {
            uuid: profile.service_uuid,
            name: Some(profile.service_name.clone()),
            channel: profile.channel.map(u16::from),
            role: Some(Role::Server),
            require_authentication: Some(false),
            require_authorization: Some(false),
            ..Default::default()
        };

        let handle = self
            .session
            .register_profile(registration)
            .await
            .map_err(|e| BridgeError::BindConflict(e.to_string()))?;

        Ok(Box::new(RfcommListener {
            handle: Box::pin(handle),
        }))
    }
}

struct RfcommListener {
    handle: Pin<Box<ProfileHandle>>,
}

#[async_trait]
impl Listener for RfcommListener {
    async fn accept(&mut self) -> io::Result<Accepted> {
        let request = self.handle.next().await.ok_or_else(|| {
            io::Error::new(io::ErrorKind::ConnectionAborted, "RFCOMM profile unregistered")
        })?;
        let peer = request.device().to_string();
        let stream = request
            .accept()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        Ok(Accepted {
            stream: Box::new(stream),
            peer,
        })
    }
}

// =============================================================================
// GATT + advertising
// =============================================================================

pub struct BluezPeripheral {
    adapter: Adapter,
    events: Mutex<Option<mpsc::UnboundedSender<GattEvent>>>,
    application: Mutex<Option<ApplicationHandle>>,
    advertisement: Mutex<Option<AdvertisementHandle>>,
    notifier: Arc<Mutex<Option<CharacteristicNotifier>>>,
}

impl BluezPeripheral {
    fn new(adapter: Adapter) -> Self {
        Self {
            adapter,
            events: Mutex::new(None),
            application: Mutex::new(None),
            advertisement: Mutex::new(None),
            notifier: Arc::new(Mutex::new(None)),
        }
    }

    fn cccd_event(enabled: bool) -> GattEvent {
        GattEvent::DescriptorWrite {
            device: NOTIFY_CENTRAL.to_string(),
            request_id: 0,
            descriptor: CCCD_UUID,
            value: if enabled {
                ENABLE_NOTIFICATION_VALUE.to_vec()
            } else {
                vec![0x00, 0x00]
            },
            response_needed: false,
        }
    }

    fn characteristic(
        def: &super::ble::gatt::CharacteristicDef,
        events: &mpsc::UnboundedSender<GattEvent>,
        notifier: &Arc<Mutex<Option<CharacteristicNotifier>>>,
    ) -> Characteristic {
        let uuid = def.uuid;

        let write = (def.properties.write || def.properties.write_without_response).then(|| {
            let events = events.clone();
            CharacteristicWrite {
                write: def.properties.write,
                write_without_response: def.properties.write_without_response,
                method: CharacteristicWriteMethod::Fun(Box::new(move |value, request| {
                    let _ = events.send(GattEvent::CharacteristicWrite {
                        device: request.device_address.to_string(),
                        request_id: 0,
                        characteristic: uuid,
                        value,
                        response_needed: false,
                    });
                    Box::pin(async { Ok(()) })
                })),
                ..Default::default()
            }
        });

        let notify = def.properties.notify.then(|| {
            let events = events.clone();
            let slot = notifier.clone();
            CharacteristicNotify {
                notify: true,
                method: CharacteristicNotifyMethod::Fun(Box::new(move |session| {
                    let events = events.clone();
                    let slot = slot.clone();
                    Box::pin(async move {
                        *slot.lock().await = Some(session);
                        let _ = events.send(Self::cccd_event(true));
                    })
                })),
                ..Default::default()
            }
        });

        Characteristic {
            uuid,
            write,
            notify,
            ..Default::default()
        }
    }
}

#[async_trait]
impl BlePeripheral for BluezPeripheral {
    async fn is_enabled(&self) -> bool {
        adapter_powered(&self.adapter).await
    }

    async fn supports_multi_advertisement(&self) -> bool {
        match self.adapter.supported_advertising_instances().await {
            Ok(instances) => instances > 0,
            Err(e) => {
                tracing::warn!(error = %e, "Could not query advertising instances");
                false
            }
        }
    }

    async fn device_name(&self) -> Option<String> {
        self.adapter.alias().await.ok()
    }

    async fn open_gatt_server(
        &self,
        events: mpsc::UnboundedSender<GattEvent>,
    ) -> Result<(), BridgeError> {
        *self.events.lock().await = Some(events);
        Ok(())
    }

    async fn add_service(&self, service: &AttributeService) -> Result<(), BridgeError> {
        let events = self
            .events
            .lock()
            .await
            .clone()
            .ok_or_else(|| BridgeError::Platform("attribute server not open".to_string()))?;

        let application = Application {
            services: vec![Service {
                uuid: service.uuid,
                primary: service.primary,
                characteristics: service
                    .characteristics
                    .iter()
                    .map(|def| Self::characteristic(def, &events, &self.notifier))
                    .collect(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let handle = self
            .adapter
            .serve_gatt_application(application)
            .await
            .map_err(platform_error)?;
        *self.application.lock().await = Some(handle);

        // bluetoothd has registered the application once serve returns
        let _ = events.send(GattEvent::ServiceAdded {
            service: service.uuid,
            status: GattStatus::Success,
        });
        Ok(())
    }

    async fn send_response(
        &self,
        _device: &str,
        _request_id: u32,
        _status: GattStatus,
    ) -> Result<(), BridgeError> {
        // bluetoothd acknowledges writes when the callback returns
        Ok(())
    }

    async fn notify(
        &self,
        _device: &str,
        _characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), BridgeError> {
        let mut slot = self.notifier.lock().await;
        let stopped = match slot.as_mut() {
            Some(session) if !session.is_stopped() => {
                return session.notify(value.to_vec()).await.map_err(platform_error);
            }
            Some(_) => true,
            None => false,
        };

        if stopped {
            slot.take();
            if let Some(events) = self.events.lock().await.as_ref() {
                let _ = events.send(Self::cccd_event(false));
            }
        }
        Err(BridgeError::Platform("no notification session".to_string()))
    }

    async fn start_advertising(
        &self,
        settings: &AdvertiseSettings,
        data: &AdvertiseData,
        scan_response: &AdvertiseData,
    ) -> Result<(), BridgeError> {
        let service_uuids: BTreeSet<Uuid> = data
            .service_uuids
            .iter()
            .chain(scan_response.service_uuids.iter())
            .copied()
            .collect();

        let local_name = data
            .local_name
            .clone()
            .or_else(|| scan_response.local_name.clone());

        let advertisement = Advertisement {
            advertisement_type: if settings.connectable {
                AdvertisementType::Peripheral
            } else {
                AdvertisementType::Broadcast
            },
            service_uuids,
            local_name,
            discoverable: Some(true),
            tx_power: Some(settings.tx_power.dbm()),
            ..Default::default()
        };

        let handle = self
            .adapter
            .advertise(advertisement)
            .await
            .map_err(platform_error)?;
        *self.advertisement.lock().await = Some(handle);

        if let Some(events) = self.events.lock().await.as_ref() {
            let _ = events.send(GattEvent::AdvertisingStarted);
        }
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), BridgeError> {
        // Dropping the handle unregisters the advertisement
        self.advertisement.lock().await.take();
        Ok(())
    }

    async fn close_gatt_server(&self) -> Result<(), BridgeError> {
        self.notifier.lock().await.take();
        self.application.lock().await.take();
        self.events.lock().await.take();
        Ok(())
    }
}
