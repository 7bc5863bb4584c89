//! elmbridged - ELM327 emulator bridge daemon
//!
//! Serves a locally running ELM327 emulator over TCP, Bluetooth Classic
//! (RFCOMM) or Bluetooth LE (GATT), one at a time.
//!
//! # Usage
//!
//! TCP on the first free port from 35000:
//! ```bash
//! ./elmbridged --mode network
//! ```
//!
//! With a config file, BLE (requires the `bluez` feature):
//! ```bash
//! ./elmbridged --config config/elmbridge.toml --mode ble
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use elmbridge::{launcher_from_config, BridgeContext, Orchestrator, Radios};
use elmbridge_core::{
    BridgeConfig, BridgeLog, BridgeMode, LogLevel, LogRepository, LogSink, TracingNotifier,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "elmbridged")]
#[command(about = "Expose an ELM327 emulator over TCP, Bluetooth Classic or Bluetooth LE")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long, env = "ELMBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Transport to expose: network, classic or ble (overrides the config file)
    #[arg(short, long)]
    mode: Option<BridgeMode>,

    /// Directory handed to the emulator (overrides the config file)
    #[arg(long)]
    runtime_dir: Option<PathBuf>,

    /// Record DEBUG entries (relayed bytes) in the bridge log
    #[arg(short, long)]
    verbose: bool,

    /// Emit tracing output as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(args: &Args) {
    let default_filter = if args.verbose {
        "elmbridged=debug,elmbridge=debug,elmbridge_core=debug"
    } else {
        "elmbridged=info,elmbridge=debug"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if args.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn load_config(args: &Args) -> Result<BridgeConfig> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading config from: {}", path.display());
            BridgeConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?
        }
        None => BridgeConfig::default(),
    };

    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(dir) = &args.runtime_dir {
        config.runtime_dir = dir.clone();
    }
    if args.verbose {
        config.log.level = LogLevel::Debug;
    }
    Ok(config)
}

#[cfg(all(target_os = "linux", feature = "bluez"))]
async fn detect_radios() -> Radios {
    match elmbridge::transport::bluez::BluezPlatform::new().await {
        Ok(platform) => Radios {
            classic: Some(Arc::new(platform.classic())),
            ble: Some(Arc::new(platform.peripheral())),
        },
        Err(e) => {
            warn!(error = %e, "Bluetooth unavailable, only the network bridge can run");
            Radios::default()
        }
    }
}

#[cfg(not(all(target_os = "linux", feature = "bluez")))]
async fn detect_radios() -> Radios {
    Radios::default()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    let config = load_config(&args)?;

    info!("Starting elmbridged");
    info!(
        mode = %config.mode,
        runtime_dir = %config.runtime_dir.display(),
        log_level = %config.log.level
    );

    std::fs::create_dir_all(&config.runtime_dir).with_context(|| {
        format!("Failed to create runtime dir {}", config.runtime_dir.display())
    })?;

    let repository = Arc::new(LogRepository::new(config.log.max_entries));
    let log: Arc<dyn LogSink> = Arc::new(BridgeLog::new(repository.clone(), config.log.level));

    let ctx = BridgeContext::new(
        log,
        launcher_from_config(&config.emulator),
        Arc::new(TracingNotifier),
        config.runtime_dir.clone(),
    );

    let radios = detect_radios().await;
    let orchestrator = Orchestrator::from_config(&config, ctx, &radios);
    info!(
        available = ?orchestrator.available_modes(),
        "Bridges available"
    );

    if let Err(e) = orchestrator.activate(config.mode).await {
        error!(mode = %config.mode, error = %e, "Bridge failed to start");
        export_log(&config, &repository);
        return Err(e).context("Bridge failed to start");
    }

    if let Some(bridge) = orchestrator.bridge(config.mode) {
        let mut states = bridge.subscribe_state();
        tokio::spawn(async move {
            while states.changed().await.is_ok() {
                let state = *states.borrow_and_update();
                info!(?state, "Bridge state changed");
            }
        });
    }

    // Wait for Ctrl+C
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    orchestrator.stop().await;
    export_log(&config, &repository);

    Ok(())
}

fn export_log(config: &BridgeConfig, repository: &LogRepository) {
    let Some(path) = &config.log.export_path else {
        return;
    };
    match repository.export(path) {
        Ok(()) => info!(path = %path.display(), entries = repository.len(), "Log written"),
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to write log"),
    }
}
