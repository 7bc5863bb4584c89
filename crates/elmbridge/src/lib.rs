//! elmbridge - Transport bridge for an ELM327 emulator
//!
//! Exposes a locally running emulator (reachable over a Unix socket) to
//! diagnostic clients over one external transport at a time.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      Orchestrator                        │
//! │            (exactly one active Bridge per host)          │
//! ├─────────────────┬─────────────────┬──────────────────────┤
//! │  NetworkBridge  │  ClassicBridge  │      BleBridge       │
//! │  TCP, next port │  RFCOMM / SPP   │  GATT + advertiser   │
//! ├─────────────────┴─────────────────┼──────────────────────┤
//! │     accept loop + relay::run      │  event loop + egress │
//! ├───────────────────────────────────┴──────────────────────┤
//! │         LoopbackConnector  (EmulatorLauncher)            │
//! └──────────────────────────────┬───────────────────────────┘
//!                                │ Unix socket
//!                           ELM327 emulator
//! ```
//!
//! Every stage reports to a [`LogSink`](elmbridge_core::LogSink) as well as
//! to `tracing`.

pub mod context;
pub mod emulator;
pub mod loopback;
pub mod orchestrator;
pub mod relay;
pub mod transport;

pub use context::BridgeContext;
pub use emulator::{launcher_from_config, CommandLauncher, SocketPathLauncher};
pub use loopback::LoopbackConnector;
pub use orchestrator::Orchestrator;
pub use relay::{RelayOptions, RelayReport};
pub use transport::{create_bridge, BleBridge, Bridge, ClassicBridge, NetworkBridge, Radios};

pub use elmbridge_core::{BridgeConfig, BridgeError, BridgeMode, BridgeState};
