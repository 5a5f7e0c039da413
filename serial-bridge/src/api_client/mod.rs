//! API client library.
//!
//! A small Rust client for the daemon's HTTP API, used by the CLI binary.

use crate::api::MsgResponse;

/// Client for a running serial-bridge daemon.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
}

impl Client {
    /// `base_url` is the daemon's root, e.g. `http://localhost:8080`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send `message` to the device through the daemon.
    ///
    /// Device and validation failures come back as a response with
    /// `success == false`; only transport and decoding problems are errors.
    pub async fn send(&self, message: &str) -> reqwest::Result<MsgResponse> {
        self.http
            .get(format!("{}/msg", self.base_url))
            .query(&[("msg", message)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    /// Whether the daemon answers its health probe.
    pub async fn health(&self) -> reqwest::Result<bool> {
        let response = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await? == "OK")
    }
}
