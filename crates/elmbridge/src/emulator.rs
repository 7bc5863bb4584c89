//! Emulator launchers
//!
//! Two ways of reaching the emulator:
//!
//! - [`SocketPathLauncher`]: the emulator is already running and listens on
//!   a fixed Unix socket
//! - [`CommandLauncher`]: spawn the emulator per connection; it prints the
//!   socket path it listens on as its first line of stdout

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use elmbridge_core::{clear_socket_files, BridgeError, EmulatorConfig, EmulatorLauncher};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

/// Build the launcher described by the configuration
pub fn launcher_from_config(config: &EmulatorConfig) -> Arc<dyn EmulatorLauncher> {
    match config {
        EmulatorConfig::Socket { path } => Arc::new(SocketPathLauncher::new(path)),
        EmulatorConfig::Command { program, args } => {
            Arc::new(CommandLauncher::new(program.clone(), args.clone()))
        }
    }
}

/// Resolve a possibly relative emulator path against the runtime directory
fn resolve(path: &Path, runtime_dir: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        runtime_dir.join(path)
    }
}

// =============================================================================
// Fixed socket
// =============================================================================

#[derive(Debug, Clone)]
pub struct SocketPathLauncher {
    path: PathBuf,
}

impl SocketPathLauncher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl EmulatorLauncher for SocketPathLauncher {
    async fn launch(&self, runtime_dir: &Path) -> Result<PathBuf, BridgeError> {
        Ok(resolve(&self.path, runtime_dir))
    }

    fn clear_stale_artifacts(&self, runtime_dir: &Path) -> std::io::Result<usize> {
        // The live emulator socket may sit in the runtime dir
        let live = resolve(&self.path, runtime_dir);
        clear_socket_files(runtime_dir, Some(&live))
    }
}

// =============================================================================
// Spawned process
// =============================================================================

/// Spawns `program args... <runtime_dir>` for every connection.
///
/// The previous child is killed when a new one is launched, and the last
/// child is killed when the launcher is dropped.
pub struct CommandLauncher {
    program: String,
    args: Vec<String>,
    child: Mutex<Option<Child>>,
}

impl CommandLauncher {
    pub fn new(program: String, args: Vec<String>) -> Self {
        Self {
            program,
            args,
            child: Mutex::new(None),
        }
    }
}

#[async_trait]
impl EmulatorLauncher for CommandLauncher {
    async fn launch(&self, runtime_dir: &Path) -> Result<PathBuf, BridgeError> {
        tokio::fs::create_dir_all(runtime_dir).await?;

        let mut current = self.child.lock().await;
        if let Some(mut previous) = current.take() {
            let _ = previous.kill().await;
        }

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(runtime_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BridgeError::Emulator(format!("failed to spawn {}: {}", self.program, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::Emulator("emulator stdout not captured".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();

        let first = lines
            .next_line()
            .await
            .map_err(|e| BridgeError::Emulator(format!("reading emulator output: {}", e)))?
            .ok_or_else(|| {
                BridgeError::Emulator(format!("{} exited before reporting its socket", self.program))
            })?;

        // Keep draining stdout so the child never blocks on a full pipe
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(target: "elmbridge::emulator", "{}", line);
            }
        });

        let location = resolve(Path::new(first.trim()), runtime_dir);
        tracing::info!(
            program = %self.program,
            pid = ?child.id(),
            socket = %location.display(),
            "Emulator started"
        );

        *current = Some(child);
        Ok(location)
    }
}
