//! Local channel to the emulator

use std::path::{Path, PathBuf};
use std::sync::Arc;

use elmbridge_core::{BridgeError, EmulatorLauncher, LogSink};
use tokio::net::UnixStream;

/// Opens the per-connection stream to the emulator
pub struct LoopbackConnector {
    launcher: Arc<dyn EmulatorLauncher>,
    runtime_dir: PathBuf,
    log: Arc<dyn LogSink>,
}

impl LoopbackConnector {
    pub fn new(
        launcher: Arc<dyn EmulatorLauncher>,
        runtime_dir: PathBuf,
        log: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            launcher,
            runtime_dir,
            log,
        }
    }

    pub fn runtime_dir(&self) -> &Path {
        &self.runtime_dir
    }

    /// Launch the emulator and connect to the socket it reports
    pub async fn connect(&self) -> Result<UnixStream, BridgeError> {
        let location = self.launcher.launch(&self.runtime_dir).await?;
        self.log
            .debug(&format!("Native sim location: {}", location.display()));

        let stream = UnixStream::connect(&location).await.map_err(|e| {
            BridgeError::Emulator(format!("connect to {}: {}", location.display(), e))
        })?;

        self.log.debug("Loopback socket connected");
        Ok(stream)
    }

    /// Remove socket files from previous runs. Failures are only logged.
    pub fn clear_stale_artifacts(&self) {
        match self.launcher.clear_stale_artifacts(&self.runtime_dir) {
            Ok(0) => {}
            Ok(n) => self
                .log
                .debug(&format!("Removed {} stale socket file(s)", n)),
            Err(e) => self
                .log
                .debug(&format!("Could not clear {}: {}", self.runtime_dir.display(), e)),
        }
    }
}
