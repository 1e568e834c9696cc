//! API client for communicating with the checker daemon

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use observatory_lib::{alerting::AlertState, report::StatusReport, Sample, Target};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use url::Url;

/// API client for the checker's read-only API
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    async fn send(&self, path: &str) -> Result<Response> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }
        Ok(response)
    }

    /// Make a GET request and decode JSON
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(path)
            .await?
            .json()
            .await
            .context("Failed to parse response")
    }

    /// Make a GET request and return the raw body
    pub async fn get_text(&self, path: &str) -> Result<String> {
        self.send(path)
            .await?
            .text()
            .await
            .context("Failed to read response")
    }

    pub async fn status(&self) -> Result<StatusReport> {
        self.get("api/v1/status").await
    }

    pub async fn targets(&self) -> Result<Vec<Target>> {
        self.get("api/v1/targets").await
    }

    pub async fn anomalies(&self, hours: u32) -> Result<Vec<Sample>> {
        self.get(&format!("api/v1/anomalies?hours={hours}")).await
    }

    pub async fn alerts(&self) -> Result<BTreeMap<String, AlertState>> {
        self.get("api/v1/alerts").await
    }

    pub async fn export_csv(&self) -> Result<String> {
        self.get_text("api/v1/export.csv").await
    }
}
