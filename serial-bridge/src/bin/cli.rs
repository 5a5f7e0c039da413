//! Command-line interface for serial-bridge.
//!
//! Sends one message to the device through a running daemon and prints the
//! reply. Exits non-zero if the daemon reports a failure.

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;

use serial_bridge::api_client::Client;

#[derive(Parser)]
#[command(name = "serial-bridge-cli")]
#[command(about = "Send a message to the serial device through serial-bridged")]
struct Cli {
    /// Base URL of the daemon
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Message to send
    message: String,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let response = Client::new(cli.url).send(&cli.message).await?;

    if response.success {
        println!("{}", response.message);
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("error: {}", response.message);
        Ok(ExitCode::FAILURE)
    }
}
