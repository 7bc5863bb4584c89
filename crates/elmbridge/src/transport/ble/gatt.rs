//! ELM327 GATT profile (Nordic UART style service)
//!
//! ```text
//! Service 6E400001-…  (primary)
//! ├── RX 6E400002-…   write, write-without-response   client → emulator
//! └── TX 6E400003-…   notify                          emulator → client
//!     └── CCCD 0x2902 read, write
//! ```

use uuid::Uuid;

pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x6E400001_B5A3_F393_E0A9_E50E24DCCA9E);
pub const RX_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x6E400002_B5A3_F393_E0A9_E50E24DCCA9E);
pub const TX_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x6E400003_B5A3_F393_E0A9_E50E24DCCA9E);

/// Client Characteristic Configuration Descriptor
pub const CCCD_UUID: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805F9B34FB);

/// CCCD value a client writes to enable notifications
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// Largest notify payload under the default ATT MTU
pub const NOTIFY_FRAGMENT_SIZE: usize = 20;

/// Sent to a client as soon as it subscribes
pub const GREETING: &[u8] = b"ELM327 v1.5\r>";

/// Split `data` into notify-sized fragments, in order
pub fn fragments(data: &[u8]) -> std::slice::Chunks<'_, u8> {
    data.chunks(NOTIFY_FRAGMENT_SIZE)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttributePermissions {
    pub read: bool,
    pub write: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorDef {
    pub uuid: Uuid,
    pub permissions: AttributePermissions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicDef {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
    pub permissions: AttributePermissions,
    pub descriptors: Vec<DescriptorDef>,
}

/// Service definition handed to the platform attribute server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeService {
    pub uuid: Uuid,
    pub primary: bool,
    pub characteristics: Vec<CharacteristicDef>,
}

impl AttributeService {
    /// The ELM327 service: RX (write) and TX (notify + CCCD)
    pub fn elm327() -> Self {
        let rx = CharacteristicDef {
            uuid: RX_CHARACTERISTIC_UUID,
            properties: CharacteristicProperties {
                write: true,
                write_without_response: true,
                ..Default::default()
            },
            permissions: AttributePermissions {
                write: true,
                ..Default::default()
            },
            descriptors: Vec::new(),
        };

        let tx = CharacteristicDef {
            uuid: TX_CHARACTERISTIC_UUID,
            properties: CharacteristicProperties {
                notify: true,
                ..Default::default()
            },
            permissions: AttributePermissions {
                read: true,
                ..Default::default()
            },
            descriptors: vec![DescriptorDef {
                uuid: CCCD_UUID,
                permissions: AttributePermissions {
                    read: true,
                    write: true,
                },
            }],
        };

        Self {
            uuid: SERVICE_UUID,
            primary: true,
            characteristics: vec![rx, tx],
        }
    }

    pub fn characteristic(&self, uuid: Uuid) -> Option<&CharacteristicDef> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

/// Platform address of a remote device
pub type DeviceId = String;

/// Result code attached to attribute server events and responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattStatus {
    Success,
    Failure(i32),
}

/// Callbacks from the platform attribute server and advertiser,
/// delivered in order on one queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattEvent {
    ServiceAdded {
        service: Uuid,
        status: GattStatus,
    },
    ConnectionStateChanged {
        device: DeviceId,
        connected: bool,
    },
    DescriptorWrite {
        device: DeviceId,
        request_id: u32,
        descriptor: Uuid,
        value: Vec<u8>,
        response_needed: bool,
    },
    CharacteristicWrite {
        device: DeviceId,
        request_id: u32,
        characteristic: Uuid,
        value: Vec<u8>,
        response_needed: bool,
    },
    AdvertisingStarted,
    AdvertisingFailed {
        code: i32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_sizes() {
        let data = [0u8; 45];
        let sizes: Vec<usize> = fragments(&data).map(<[u8]>::len).collect();
        assert_eq!(sizes, vec![20, 20, 5]);

        assert_eq!(fragments(GREETING).count(), 1);
        assert_eq!(fragments(&[]).count(), 0);
    }

    #[test]
    fn test_uuid_strings() {
        assert_eq!(
            SERVICE_UUID.to_string(),
            "6e400001-b5a3-f393-e0a9-e50e24dcca9e"
        );
        assert_eq!(CCCD_UUID.to_string(), "00002902-0000-1000-8000-00805f9b34fb");
    }

    #[test]
    fn test_elm327_service_layout() {
        let service = AttributeService::elm327();
        assert!(service.primary);

        let rx = service.characteristic(RX_CHARACTERISTIC_UUID).unwrap();
        assert!(rx.properties.write && rx.properties.write_without_response);
        assert!(!rx.properties.notify);

        let tx = service.characteristic(TX_CHARACTERISTIC_UUID).unwrap();
        assert!(tx.properties.notify);
        assert_eq!(tx.descriptors.len(), 1);
        assert_eq!(tx.descriptors[0].uuid, CCCD_UUID);
    }
}
