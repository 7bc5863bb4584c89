//! Collaborators the bridges depend on but do not implement
//!
//! - [`EmulatorLauncher`]: starts or locates the emulator process
//! - [`UiNotifier`]: asks the user to switch the radio on

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::BridgeError;

/// Starts (or locates) the emulator and tells the bridge where to reach it
#[async_trait]
pub trait EmulatorLauncher: Send + Sync {
    /// Return the Unix socket path of an emulator ready to accept a
    /// connection. `runtime_dir` is writable and private to the bridge.
    async fn launch(&self, runtime_dir: &Path) -> Result<PathBuf, BridgeError>;

    /// Remove socket files left behind by earlier emulator runs.
    /// Returns the number of files removed.
    fn clear_stale_artifacts(&self, runtime_dir: &Path) -> io::Result<usize> {
        clear_socket_files(runtime_dir, None)
    }
}

/// User-facing prompts raised by the bridges
pub trait UiNotifier: Send + Sync {
    /// The radio is switched off; ask the user to enable it
    fn prompt_enable_radio(&self);
}

/// Notifier that only records the request in the tracing output
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl UiNotifier for TracingNotifier {
    fn prompt_enable_radio(&self) {
        tracing::warn!("Bluetooth is disabled, please enable it and restart the bridge");
    }
}

/// Delete every Unix socket file directly inside `dir`, except `keep`.
///
/// A missing directory is not an error.
pub fn clear_socket_files(dir: &Path, keep: Option<&Path>) -> io::Result<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if keep.is_some_and(|k| k == path) {
            continue;
        }
        if is_socket(&entry.file_type()?) {
            std::fs::remove_file(&path)?;
            tracing::debug!(path = %path.display(), "Removed stale socket file");
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(unix)]
fn is_socket(file_type: &std::fs::FileType) -> bool {
    use std::os::unix::fs::FileTypeExt;
    file_type.is_socket()
}

#[cfg(not(unix))]
fn is_socket(_file_type: &std::fs::FileType) -> bool {
    false
}
