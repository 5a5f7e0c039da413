//! Configuration for serial-bridge.
//!
//! Everything the daemon needs is collected into [`Config`] once at startup
//! and handed to the components that use it. The only user-settable value
//! is the serial device name; the line parameters are fixed by the device
//! protocol.

use clap::Parser;
use std::env;
use std::ffi::OsString;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Baud rate the device firmware is built for.
pub const BAUD_RATE: u32 = 9600;

/// Upper bound on a single read from the device.
pub const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// HTTP port used when `PORT` is not set.
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Page served on `GET /`, relative to the working directory.
pub const INDEX_FILE: &str = "index.html";

/// Command-line arguments for the daemon.
#[derive(Debug, Clone, Parser)]
#[command(name = "serial-bridged")]
#[command(about = "Bridge HTTP requests to a line-oriented serial device")]
pub struct Args {
    /// port of the serial device (e.g. COM6 or /dev/ttyACM1)
    #[arg(long = "com", value_name = "NAME", default_value = "")]
    pub com: String,
}

/// Parameters for opening the serial connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Platform-specific device name
    pub port: String,
    pub baud_rate: u32,
    /// Applies to each read call, not to a whole reply
    pub read_timeout: Duration,
}

impl SerialConfig {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: BAUD_RATE,
            read_timeout: READ_TIMEOUT,
        }
    }
}

/// Main configuration structure for the daemon.
#[derive(Debug, Clone)]
pub struct Config {
    pub serial: SerialConfig,

    /// HTTP listen address
    pub listen: SocketAddr,

    /// Static page for `GET /`
    pub index_file: PathBuf,
}

impl Config {
    /// Build the configuration from the process arguments and environment.
    ///
    /// Exits the process with a usage message if the arguments don't parse.
    pub fn from_env() -> Self {
        let args = Args::parse_from(normalize_args(env::args_os()));
        Self::new(args, env::var("PORT").ok().as_deref())
    }

    /// Build the configuration from parsed arguments and the value of the
    /// `PORT` environment variable, if any.
    pub fn new(args: Args, http_port: Option<&str>) -> Self {
        Self {
            serial: SerialConfig::new(args.com),
            listen: listen_addr(http_port),
            index_file: PathBuf::from(INDEX_FILE),
        }
    }
}

/// Listen on all interfaces, on `PORT` if it holds a valid port number.
fn listen_addr(http_port: Option<&str>) -> SocketAddr {
    let port = http_port
        .and_then(|p| p.trim().parse::<u16>().ok())
        .unwrap_or(DEFAULT_HTTP_PORT);
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))
}

/// Rewrite the single-dash `-com` spelling to `--com`.
///
/// The daemon has always been started as `-com /dev/ttyACM1`, which clap
/// would read as a cluster of short flags.
pub fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    args.into_iter()
        .map(Into::into)
        .map(|arg| match arg.to_str() {
            Some("-com") => OsString::from("--com"),
            Some(s) if s.starts_with("-com=") => OsString::from(format!("-{}", s)),
            _ => arg,
        })
        .collect()
}
