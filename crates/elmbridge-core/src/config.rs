//! Bridge configuration
//!
//! Loaded from a TOML file; every field has a default so an empty file (or
//! no file at all) yields a working network bridge on port 35000.
//!
//! ```toml
//! mode = "ble"
//! runtime_dir = "/run/elmbridge"
//!
//! [log]
//! level = "debug"
//! max_entries = 5000
//!
//! [network]
//! base_port = 35000
//!
//! [ble]
//! device_name = "OBDII"
//!
//! [emulator]
//! type = "command"
//! program = "elm327sim"
//! args = ["--socket"]
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BridgeError;
use crate::log::{LogLevel, DEFAULT_LOG_CAPACITY};

/// Serial Port Profile service class
pub const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

/// Which transport is exposed to clients
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BridgeMode {
    /// Bluetooth Classic, RFCOMM serial profile
    #[serde(rename = "classic")]
    ClassicRadio,
    /// Bluetooth Low Energy, GATT server
    #[serde(rename = "ble")]
    LowEnergyRadio,
    /// TCP/IP
    #[default]
    #[serde(rename = "network")]
    NetworkIp,
}

impl fmt::Display for BridgeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ClassicRadio => "classic",
            Self::LowEnergyRadio => "ble",
            Self::NetworkIp => "network",
        };
        f.write_str(s)
    }
}

impl FromStr for BridgeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "classic" | "bt" | "rfcomm" => Ok(Self::ClassicRadio),
            "ble" | "le" => Ok(Self::LowEnergyRadio),
            "network" | "tcp" | "ip" => Ok(Self::NetworkIp),
            other => Err(format!("unknown bridge mode: {}", other)),
        }
    }
}

/// Complete bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Active transport
    #[serde(default)]
    pub mode: BridgeMode,

    /// Writable directory handed to the emulator (socket files live here)
    #[serde(default = "default_runtime_dir")]
    pub runtime_dir: PathBuf,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub classic: ClassicConfig,

    #[serde(default)]
    pub ble: BleConfig,

    #[serde(default)]
    pub emulator: EmulatorConfig,
}

fn default_runtime_dir() -> PathBuf {
    std::env::temp_dir().join("elmbridge")
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mode: BridgeMode::default(),
            runtime_dir: default_runtime_dir(),
            log: LogConfig::default(),
            network: NetworkConfig::default(),
            classic: ClassicConfig::default(),
            ble: BleConfig::default(),
            emulator: EmulatorConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, BridgeError> {
        toml::from_str(content).map_err(|e| BridgeError::Config(e.to_string()))
    }
}

// =============================================================================
// Log
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Most verbose level recorded in the user-facing log
    #[serde(default)]
    pub level: LogLevel,
    /// Capacity of the user-facing log
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Where to write the log on shutdown, if anywhere
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_path: Option<PathBuf>,
}

fn default_max_entries() -> usize {
    DEFAULT_LOG_CAPACITY
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            max_entries: default_max_entries(),
            export_path: None,
        }
    }
}

// =============================================================================
// Transports
// =============================================================================

/// TCP transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// First port tried; taken ports are skipped upwards
    #[serde(default = "default_base_port")]
    pub base_port: u16,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_base_port() -> u16 {
    35000
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            base_port: default_base_port(),
        }
    }
}

/// Bluetooth Classic serial profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassicConfig {
    /// Name published in the SDP record
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_service_uuid")]
    pub service_uuid: Uuid,
    /// Fixed RFCOMM channel; the stack picks one when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<u8>,
}

fn default_service_name() -> String {
    "BTSerial".to_string()
}

fn default_service_uuid() -> Uuid {
    SPP_UUID
}

impl Default for ClassicConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            service_uuid: default_service_uuid(),
            channel: None,
        }
    }
}

/// Bluetooth Low Energy GATT server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BleConfig {
    /// Advertised local name; the adapter alias is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    /// Upper bound on the wait for the service registration confirmation
    #[serde(default = "default_registration_timeout_ms")]
    pub registration_timeout_ms: u64,
}

fn default_registration_timeout_ms() -> u64 {
    5000
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            device_name: None,
            registration_timeout_ms: default_registration_timeout_ms(),
        }
    }
}

// =============================================================================
// Emulator
// =============================================================================

/// How the emulator process is reached
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EmulatorConfig {
    /// Emulator already running, listening on a Unix socket
    Socket {
        /// Absolute, or relative to `runtime_dir`
        #[serde(default = "default_socket_path")]
        path: PathBuf,
    },
    /// Spawned per connection; prints its socket path on the first stdout line
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("elm327.sock")
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self::Socket {
            path: default_socket_path(),
        }
    }
}
