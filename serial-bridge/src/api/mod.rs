//! HTTP API server.
//!
//! Serves the message endpoint that forwards to the serial device, a
//! static landing page, and a health probe. Built on Axum.

pub mod msg;

use axum::{routing::get, Router};
use std::{io, path::Path};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{services::ServeFile, trace::TraceLayer};

use crate::serial::Bridge;

pub use msg::{MsgQuery, MsgResponse, NO_MESSAGE};

/// Shared application state for API endpoints.
#[derive(Clone)]
pub struct AppState {
    pub bridge: Bridge,
}

impl AppState {
    pub fn new(bridge: Bridge) -> Self {
        Self { bridge }
    }
}

/// Health check endpoint handler.
async fn health() -> &'static str {
    "OK"
}

/// Build the application router.
pub fn router(state: AppState, index_file: &Path) -> Router {
    Router::new()
        .route_service("/", ServeFile::new(index_file))
        .route("/msg", get(msg::send_message))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `app` on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: CancellationToken,
) -> io::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
