//! elmbridge-core - Core types for the elmbridge transport bridges
//!
//! This crate holds what every bridge shares and nothing transport-specific:
//!
//! - [`hexdump`] - hex + ASCII rendering of relayed chunks
//! - [`log`] - bounded user-facing log ([`LogRepository`]) and the
//!   threshold-filtered [`BridgeLog`] sink
//! - [`config`] - TOML configuration ([`BridgeConfig`])
//! - [`error`] - [`BridgeError`] taxonomy
//! - [`platform`] - collaborator traits ([`EmulatorLauncher`], [`UiNotifier`])
//! - [`state`] - observable [`BridgeState`]

pub mod config;
pub mod error;
pub mod hexdump;
pub mod log;
pub mod platform;
pub mod state;

pub use config::{
    BleConfig, BridgeConfig, BridgeMode, ClassicConfig, EmulatorConfig, LogConfig, NetworkConfig,
    SPP_UUID,
};
pub use error::{BridgeError, BridgeResult};
pub use log::{BridgeLog, LogEntry, LogLevel, LogPage, LogRepository, LogSink};
pub use platform::{clear_socket_files, EmulatorLauncher, TracingNotifier, UiNotifier};
pub use state::BridgeState;
