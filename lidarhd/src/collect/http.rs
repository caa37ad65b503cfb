//! HTTP access behind a trait so the pipeline can run against a mock in tests.

use anyhow::{Context, Result};
use std::io::Write;
use std::time::Duration;

use crate::collect::global_variables::DEFAULT_TIMEOUT_SECS;

/// Blocking HTTP operations used by the index store and the tile fetcher.
pub trait HttpClient: Send + Sync {
    /// GET `url` and return the whole body.
    fn get(&self, url: &str) -> Result<Vec<u8>>;

    /// GET `url` and stream the body into `dest`, returning the byte count.
    fn download_to(&self, url: &str, dest: &mut dyn Write) -> Result<u64>;
}

/// `reqwest` blocking client.
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT_SECS)
    }

    pub fn with_timeout(timeout_secs: u64) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(ReqwestClient { client })
    }

    fn send(&self, url: &str) -> Result<reqwest::blocking::Response> {
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("Request to {} failed", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            anyhow::bail!("HTTP {} from {}: {}", status, url, body.trim());
        }
        Ok(response)
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &str) -> Result<Vec<u8>> {
        tracing::debug!(url, "GET");
        let bytes = self
            .send(url)?
            .bytes()
            .with_context(|| format!("Failed to read response body from {}", url))?;
        Ok(bytes.to_vec())
    }

    fn download_to(&self, url: &str, dest: &mut dyn Write) -> Result<u64> {
        tracing::debug!(url, "GET (streaming)");
        let mut response = self.send(url)?;
        let written = response
            .copy_to(dest)
            .with_context(|| format!("Failed to read bytes from {}", url))?;
        if written == 0 {
            anyhow::bail!("Empty response from {}", url);
        }
        Ok(written)
    }
}
