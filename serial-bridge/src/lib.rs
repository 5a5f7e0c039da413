//! HTTP bridge to a line-oriented serial device.
//!
//! Requests arriving on `GET /msg` are written to the serial port as a
//! newline-terminated line; the device's newline-terminated reply is
//! returned to the caller as JSON.

pub mod api;
pub mod api_client;
pub mod config;
pub mod error;
pub mod serial;
pub mod shutdown;
pub mod tracing;
