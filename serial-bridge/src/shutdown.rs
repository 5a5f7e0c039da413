//! Process shutdown sequence.
//!
//! On interrupt the daemon stops taking HTTP requests, tells the device to
//! return to its idle state by sending the sentinel command, releases the
//! serial connection and exits with a non-zero status.

use parking_lot::Mutex;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::serial::Bridge;
use crate::tracing::prelude::*;

/// Command written to the device on shutdown.
pub const SENTINEL: &str = "voltage0";

/// How long an in-flight exchange may hold the connection before shutdown
/// gives up on the sentinel.
pub const DRAIN_DEADLINE: Duration = Duration::from_secs(2);

/// Exit status after an interrupt.
pub const EXIT_CODE: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Running,
    ShuttingDown,
}

pub struct ShutdownHandler {
    bridge: Bridge,
    server: CancellationToken,
    drain: Duration,
    state: Mutex<State>,
}

impl ShutdownHandler {
    /// `server` is cancelled first so no new requests reach the device.
    pub fn new(bridge: Bridge, server: CancellationToken) -> Self {
        Self {
            bridge,
            server,
            drain: DRAIN_DEADLINE,
            state: Mutex::new(State::Running),
        }
    }

    pub fn with_drain_deadline(mut self, drain: Duration) -> Self {
        self.drain = drain;
        self
    }

    pub fn state(&self) -> State {
        *self.state.lock()
    }

    /// Run the shutdown sequence and return the exit status.
    ///
    /// Safe to call more than once; later calls repeat the same steps
    /// against an already-closed connection.
    pub async fn trigger(&self) -> i32 {
        let previous = std::mem::replace(&mut *self.state.lock(), State::ShuttingDown);
        if previous == State::ShuttingDown {
            debug!("Shutdown already in progress.");
        }

        info!("Shutting down.");
        self.server.cancel();

        // The device may never acknowledge; nothing waits for a reply.
        match self.bridge.close_with(SENTINEL, self.drain).await {
            Ok(()) => debug!(command = SENTINEL, "Sent shutdown command."),
            Err(e) => warn!(error = %e, "Shutdown command not sent."),
        }

        EXIT_CODE
    }

    /// Run the sequence for every signal `next_signal` yields, until the
    /// first run finishes, and return its exit status.
    ///
    /// A signal arriving while a run is still draining starts another run
    /// alongside it.
    pub async fn run<F, Fut>(self: Arc<Self>, mut next_signal: F) -> io::Result<i32>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = io::Result<()>>,
    {
        let mut runs = JoinSet::new();
        loop {
            tokio::select! {
                signal = next_signal() => {
                    signal?;
                    debug!(signal = "interrupt", "shutdown");
                    let handler = self.clone();
                    runs.spawn(async move { handler.trigger().await });
                }
                Some(done) = runs.join_next() => {
                    return Ok(done.unwrap_or(EXIT_CODE));
                }
            }
        }
    }
}
