//! Collaborators injected into every bridge

use std::path::PathBuf;
use std::sync::Arc;

use elmbridge_core::{EmulatorLauncher, LogSink, UiNotifier};

use crate::loopback::LoopbackConnector;

/// Everything a bridge needs from the outside world
#[derive(Clone)]
pub struct BridgeContext {
    pub log: Arc<dyn LogSink>,
    pub launcher: Arc<dyn EmulatorLauncher>,
    pub notifier: Arc<dyn UiNotifier>,
    /// Writable directory handed to the emulator
    pub runtime_dir: PathBuf,
}

impl BridgeContext {
    pub fn new(
        log: Arc<dyn LogSink>,
        launcher: Arc<dyn EmulatorLauncher>,
        notifier: Arc<dyn UiNotifier>,
        runtime_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            log,
            launcher,
            notifier,
            runtime_dir: runtime_dir.into(),
        }
    }

    pub fn connector(&self) -> LoopbackConnector {
        LoopbackConnector::new(
            self.launcher.clone(),
            self.runtime_dir.clone(),
            self.log.clone(),
        )
    }
}
