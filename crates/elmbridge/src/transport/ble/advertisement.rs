//! LE advertisement settings and raw payload

use uuid::Uuid;

/// AD type: flags
const AD_FLAGS: u8 = 0x01;
/// AD type: complete list of 128-bit service UUIDs
const AD_SERVICE_UUIDS_128: u8 = 0x07;
/// AD type: complete local name
const AD_COMPLETE_NAME: u8 = 0x09;

/// LE General Discoverable, BR/EDR not supported
const FLAGS_VALUE: u8 = 0x06;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertiseMode {
    LowPower,
    Balanced,
    LowLatency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxPowerLevel {
    UltraLow,
    Low,
    Medium,
    High,
}

impl TxPowerLevel {
    /// Nominal transmit power in dBm
    pub fn dbm(self) -> i16 {
        match self {
            Self::UltraLow => -21,
            Self::Low => -15,
            Self::Medium => -7,
            Self::High => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertiseSettings {
    pub mode: AdvertiseMode,
    pub connectable: bool,
    pub tx_power: TxPowerLevel,
}

impl AdvertiseSettings {
    pub fn elm327() -> Self {
        Self {
            mode: AdvertiseMode::LowLatency,
            connectable: true,
            tx_power: TxPowerLevel::High,
        }
    }
}

/// Fields of an advertising or scan-response packet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvertiseData {
    /// Complete local name, already resolved by the caller
    pub local_name: Option<String>,
    pub service_uuids: Vec<Uuid>,
}

impl AdvertiseData {
    /// Primary advertisement: the device name only
    pub fn named(name: Option<String>) -> Self {
        Self {
            local_name: name,
            service_uuids: Vec::new(),
        }
    }

    /// Scan response: the service identifier only
    pub fn service(uuid: Uuid) -> Self {
        Self {
            local_name: None,
            service_uuids: vec![uuid],
        }
    }

    /// Bytes of this packet combined with `scan_response`, in broadcast order
    pub fn combined_payload(&self, scan_response: &AdvertiseData) -> Vec<u8> {
        let name = self
            .local_name
            .as_deref()
            .or(scan_response.local_name.as_deref());
        let service = self
            .service_uuids
            .first()
            .or(scan_response.service_uuids.first())
            .copied();
        payload(name, service)
    }
}

/// Raw advertisement bytes
///
/// `[02 01 06]`, then `[len+1, 09, name…]` when a name is given, then
/// `[17, 07, uuid…]` with the 128-bit identifier in little-endian order.
pub fn payload(name: Option<&str>, service: Option<Uuid>) -> Vec<u8> {
    let mut bytes = vec![0x02, AD_FLAGS, FLAGS_VALUE];

    if let Some(name) = name {
        let name = name.as_bytes();
        let name = &name[..name.len().min(u8::MAX as usize - 1)];
        bytes.push(name.len() as u8 + 1);
        bytes.push(AD_COMPLETE_NAME);
        bytes.extend_from_slice(name);
    }

    if let Some(uuid) = service {
        bytes.push(17);
        bytes.push(AD_SERVICE_UUIDS_128);
        bytes.extend_from_slice(&uuid.as_u128().to_le_bytes());
    }

    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ble::gatt::SERVICE_UUID;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_payload_flags_and_name() {
        let bytes = payload(Some("ELM"), None);
        assert_eq!(bytes, vec![0x02, 0x01, 0x06, 0x04, 0x09, b'E', b'L', b'M']);
    }

    #[test]
    fn test_payload_service_is_little_endian() {
        let bytes = payload(None, Some(SERVICE_UUID));
        assert_eq!(bytes.len(), 3 + 18);
        assert_eq!(&bytes[3..5], &[17, 0x07]);
        // least significant byte first
        assert_eq!(bytes[5], 0x9E);
        assert_eq!(bytes[20], 0x6E);
    }

    #[test]
    fn test_payload_full_length() {
        let bytes = payload(Some("OBDII"), Some(SERVICE_UUID));
        assert_eq!(bytes.len(), 3 + 7 + 18);
    }

    #[test]
    fn test_six_character_name_with_service_is_29_bytes() {
        let bytes = payload(Some("OBDLNK"), Some(SERVICE_UUID));
        assert_eq!(bytes.len(), 29);
        assert_eq!(&bytes[3..5], &[7, 0x09]);
        assert_eq!(&bytes[5..11], b"OBDLNK");
        assert_eq!(&bytes[11..13], &[17, 0x07]);
    }

    #[test]
    fn test_combined_payload_uses_resolved_name() {
        let data = AdvertiseData::named(Some("OBDII".to_string()));
        let scan = AdvertiseData::service(SERVICE_UUID);
        assert_eq!(
            data.combined_payload(&scan),
            payload(Some("OBDII"), Some(SERVICE_UUID))
        );

        let unnamed = AdvertiseData::named(None);
        assert_eq!(unnamed.combined_payload(&scan).len(), 3 + 18);
    }

    #[test]
    fn test_default_settings() {
        let settings = AdvertiseSettings::elm327();
        assert_eq!(settings.mode, AdvertiseMode::LowLatency);
        assert!(settings.connectable);
        assert_eq!(settings.tx_power, TxPowerLevel::High);
    }
}
