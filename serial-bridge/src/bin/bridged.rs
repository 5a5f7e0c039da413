//! The serial-bridge daemon.

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use serial_bridge::api::{self, AppState};
use serial_bridge::config::Config;
use serial_bridge::serial::Bridge;
use serial_bridge::shutdown::ShutdownHandler;
use serial_bridge::tracing::{self, prelude::*};

/// How long to wait for the HTTP server to wind down before exiting.
const SERVER_STOP_TIMEOUT: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    tracing::init_journald_or_stdout();

    let bridge = match Bridge::open(&config.serial) {
        Ok(bridge) => bridge,
        Err(e) => {
            error!(port = %config.serial.port, error = %e, "Failed to open serial port.");
            return Err(e.into());
        }
    };

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to listen on {}", config.listen))?;
    let app = api::router(AppState::new(bridge.clone()), &config.index_file);

    let running = CancellationToken::new();
    let tracker = TaskTracker::new();
    tracker.spawn({
        let running = running.clone();
        async move {
            if let Err(e) = api::serve(listener, app, running).await {
                error!(error = %e, "HTTP server failed.");
            }
        }
    });
    tracker.close();
    info!("running on port {}", config.listen.port());

    let shutdown = Arc::new(ShutdownHandler::new(bridge, running));
    let code = shutdown
        .run(tokio::signal::ctrl_c)
        .await
        .context("failed to listen for interrupt")?;

    if tokio::time::timeout(SERVER_STOP_TIMEOUT, tracker.wait())
        .await
        .is_err()
    {
        debug!("HTTP server still draining connections.");
    }
    info!("Exiting.");
    std::process::exit(code);
}
