//! Logging setup for the daemon.
//!
//! `main` calls [`init_journald_or_stdout`] once before anything logs. Other
//! modules pull the event macros in with `use crate::tracing::prelude::*`.

use std::env;
use time::OffsetDateTime;
use tracing_subscriber::{
    filter::EnvFilter,
    fmt::{format::Writer, time::FormatTime},
    prelude::*,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

use prelude::*;

// Used when RUST_LOG is unset. This crate logs its serial traffic at debug.
const DEFAULT_FILTER: &str = "info,serial_bridge=debug";

/// Install the global subscriber.
///
/// Under systemd (`JOURNAL_STREAM` set) events go to journald, otherwise to
/// stdout.
pub fn init_journald_or_stdout() {
    if env::var("JOURNAL_STREAM").is_ok() {
        if let Ok(layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(layer)
                .init();
        } else {
            use_stdout();
            error!("Failed to initialize journald logging, using stdout.");
        }
    } else {
        use_stdout();
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

fn use_stdout() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().with_timer(LocalTimer))
        .init();
}

// Local wall-clock time, whole seconds.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = OffsetDateTime::now_local().unwrap_or(OffsetDateTime::now_utc());
        let formatted = now
            .format(time::macros::format_description!(
                "[hour]:[minute]:[second]"
            ))
            .map_err(|_| std::fmt::Error)?;
        write!(w, "{}", formatted)
    }
}
