//! Shared fixtures: an echoing fake emulator and a capturing bridge context

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use elmbridge::{BridgeContext, SocketPathLauncher};
use elmbridge_core::{BridgeLog, BridgeState, LogLevel, LogRepository, LogSink, UiNotifier};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixListener;
use tokio::task::JoinHandle;

pub const EMULATOR_SOCKET: &str = "elm327.sock";

/// Counts enable-radio prompts
#[derive(Default)]
pub struct CountingNotifier {
    prompts: AtomicUsize,
}

impl CountingNotifier {
    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

impl UiNotifier for CountingNotifier {
    fn prompt_enable_radio(&self) {
        self.prompts.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct Fixture {
    pub dir: TempDir,
    pub ctx: BridgeContext,
    pub log: Arc<LogRepository>,
    pub notifier: Arc<CountingNotifier>,
    emulator: JoinHandle<()>,
    /// Emulator connections that reached end of stream
    emulator_closed: Arc<AtomicUsize>,
}

impl Fixture {
    /// Runtime dir with an echo emulator listening on `elm327.sock`
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let listener = UnixListener::bind(dir.path().join(EMULATOR_SOCKET)).expect("bind emulator");
        let emulator_closed = Arc::new(AtomicUsize::new(0));
        let emulator = tokio::spawn(run_echo_emulator(listener, emulator_closed.clone()));

        let log = Arc::new(LogRepository::new(10_000));
        let sink: Arc<dyn LogSink> = Arc::new(BridgeLog::new(log.clone(), LogLevel::Debug));
        let notifier = Arc::new(CountingNotifier::default());
        let ctx = BridgeContext::new(
            sink,
            Arc::new(SocketPathLauncher::new(EMULATOR_SOCKET)),
            notifier.clone(),
            dir.path(),
        );

        Self {
            dir,
            ctx,
            log,
            notifier,
            emulator,
            emulator_closed,
        }
    }

    /// Number of emulator connections the bridge has closed
    pub fn emulator_channels_closed(&self) -> usize {
        self.emulator_closed.load(Ordering::SeqCst)
    }

    /// Poll until at least `count` emulator connections were closed
    pub async fn wait_for_emulator_closed(&self, count: usize) -> bool {
        for _ in 0..400 {
            if self.emulator_channels_closed() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    pub fn texts(&self) -> Vec<String> {
        self.log.snapshot().into_iter().map(|e| e.text).collect()
    }

    pub fn logged(&self, needle: &str) -> bool {
        self.texts().iter().any(|t| t.contains(needle))
    }

    /// Poll the log until a line containing `needle` shows up
    pub async fn wait_for_log(&self, needle: &str) -> bool {
        for _ in 0..400 {
            if self.logged(needle) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.emulator.abort();
    }
}

/// Echo every byte back on each accepted connection, counting the ones
/// whose peer hung up
async fn run_echo_emulator(listener: UnixListener, closed: Arc<AtomicUsize>) {
    loop {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        let closed = closed.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => {
                        closed.fetch_add(1, Ordering::SeqCst);
                        return;
                    }
                    Ok(n) => {
                        if stream.write_all(&buf[..n]).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });
    }
}

/// Poll `current` until it returns `expected`
pub async fn wait_for_state(current: impl Fn() -> BridgeState, expected: BridgeState) -> bool {
    for _ in 0..400 {
        if current() == expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

/// A localhost port nothing is listening on right now
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .expect("ephemeral port")
}
