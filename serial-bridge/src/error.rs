//! Common error types for serial-bridge.
//!
//! This module provides a centralized Error enum using thiserror. The HTTP
//! layer flattens these to their `Display` text, so the messages are what
//! callers of `/msg` see.

use std::io;
use thiserror::Error;

/// Main error type for serial-bridge operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The serial device could not be opened at startup
    #[error("no com port: {0}")]
    Open(#[source] tokio_serial::Error),

    /// Writing the request line failed
    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    /// Flushing the request line failed
    #[error("flush failed: {0}")]
    Flush(#[source] io::Error),

    /// Reading the reply failed
    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    /// A single read waited longer than the read timeout.
    ///
    /// `partial` holds whatever arrived before the timeout. It is kept for
    /// diagnostics and never reported to HTTP callers.
    #[error("read timed out")]
    ReadTimeout { partial: String },

    /// The device stream ended before a newline arrived
    #[error("device closed the connection")]
    Eof,

    /// The connection stayed locked by an in-flight exchange
    #[error("serial connection busy")]
    Busy,

    /// The connection was released by the shutdown path
    #[error("serial connection closed")]
    Closed,
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
