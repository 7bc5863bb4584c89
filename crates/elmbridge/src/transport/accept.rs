//! Accept loop shared by the Classic and Network bridges
//!
//! One background task owns the listener. For every client it clears
//! leftover emulator sockets, opens a fresh emulator channel, relays until either side ends, closes both and
//! goes back to accepting. `stop()` cancels the task, waits up to
//! [`STOP_TIMEOUT`] for it and aborts it otherwise.

use std::sync::Arc;
use std::time::Duration;

use elmbridge_core::BridgeState;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::bridge::Listener;
use crate::context::BridgeContext;
use crate::loopback::LoopbackConnector;
use crate::relay::{self, RelayOptions};

/// Upper bound on how long `stop()` waits for the accept task
pub const STOP_TIMEOUT: Duration = Duration::from_secs(2);

const ACCEPT_BACKOFF_INITIAL: Duration = Duration::from_millis(100);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Doubling delay between failed accepts
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(ACCEPT_BACKOFF_INITIAL, ACCEPT_BACKOFF_MAX)
    }
}

/// Transport-specific wording and relay setup for the accept loop
#[derive(Debug, Clone)]
pub(crate) struct AcceptProfile {
    /// `"Network"` or `"Bluetooth"`, used in "<transport> connection closed"
    pub transport: &'static str,
    /// Logged at INFO every time the loop starts waiting for a client
    pub waiting: Option<String>,
    pub relay: RelayOptions,
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the accept task and the published state of one bridge
pub(crate) struct AcceptRunner {
    state: Arc<watch::Sender<BridgeState>>,
    running: Mutex<Option<Running>>,
}

impl AcceptRunner {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(BridgeState::Idle);
        Self {
            state: Arc::new(state),
            running: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> BridgeState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<BridgeState> {
        self.state.subscribe()
    }

    pub(crate) async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Spawn the accept task. A second launch while running drops `listener`.
    pub(crate) async fn launch(
        &self,
        listener: Box<dyn Listener>,
        ctx: BridgeContext,
        profile: AcceptProfile,
    ) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        self.state.send_replace(BridgeState::Listening);
        let handle = tokio::spawn(accept_loop(
            listener,
            ctx,
            profile,
            self.state.clone(),
            cancel.clone(),
        ));
        *running = Some(Running { cancel, handle });
    }

    /// Cancel the accept task and wait for it to release its resources
    pub(crate) async fn shutdown(&self) {
        let Some(running) = self.running.lock().await.take() else {
            self.state.send_replace(BridgeState::Stopped);
            return;
        };

        running.cancel.cancel();
        let mut handle = running.handle;
        if tokio::time::timeout(STOP_TIMEOUT, &mut handle).await.is_err() {
            tracing::warn!("Accept task did not stop in time, aborting");
            handle.abort();
        }
        self.state.send_replace(BridgeState::Stopped);
    }
}

async fn accept_loop(
    mut listener: Box<dyn Listener>,
    ctx: BridgeContext,
    profile: AcceptProfile,
    state: Arc<watch::Sender<BridgeState>>,
    cancel: CancellationToken,
) {
    let connector = ctx.connector();
    let mut backoff = Backoff::default();

    loop {
        state.send_replace(BridgeState::Listening);
        if let Some(waiting) = &profile.waiting {
            ctx.log.info(waiting);
        }

        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let accepted = match accepted {
            Ok(accepted) => {
                backoff.reset();
                accepted
            }
            Err(e) => {
                let delay = backoff.next_delay();
                ctx.log.debug(&format!("Error: {}", e));
                tracing::warn!(
                    transport = profile.transport,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Accept failed, backing off"
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => continue,
                }
            }
        };

        state.send_replace(BridgeState::Connected);
        ctx.log.info(&format!("Client connected: {}", accepted.peer));
        connector.clear_stale_artifacts();

        serve_client(accepted, &connector, &ctx, &profile, &cancel).await;

        ctx.log
            .info(&format!("{} connection closed", profile.transport));
        if cancel.is_cancelled() {
            break;
        }
    }

    state.send_replace(BridgeState::Closing);
    drop(listener);
    ctx.log.debug("Cancelled");
}

async fn serve_client(
    accepted: super::bridge::Accepted,
    connector: &LoopbackConnector,
    ctx: &BridgeContext,
    profile: &AcceptProfile,
    cancel: &CancellationToken,
) {
    let channel = tokio::select! {
        _ = cancel.cancelled() => return,
        channel = connector.connect() => channel,
    };
    let channel = match channel {
        Ok(channel) => channel,
        Err(e) => {
            ctx.log.debug(&format!("Error: {}", e));
            return;
        }
    };

    let report = relay::run(
        accepted.stream,
        channel,
        &profile.relay,
        cancel,
        ctx.log.clone(),
    )
    .await;

    tracing::debug!(
        transport = profile.transport,
        peer = %accepted.peer,
        inbound = report.a_to_b.bytes,
        outbound = report.b_to_a.bytes,
        "Relay finished"
    );
}
