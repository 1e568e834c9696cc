//! reqwest-based HTTP prober

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client};
use tokio::time::Instant;
use tracing::debug;

use super::Prober;
use crate::models::{ProbeOutcome, Target};

/// Default per-probe timeout
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Status codes from this value upward mark a target unhealthy
const SERVER_ERROR_FLOOR: u16 = 500;

/// Probes targets with a GET request
pub struct HttpProber {
    client: Client,
    timeout: Duration,
}

impl HttpProber {
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_PROBE_TIMEOUT)
    }

    /// Create a prober with a custom per-probe timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        // Loopback HTTPS targets present certificates for their public name
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .user_agent(concat!("observatory/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create probe HTTP client")?;

        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, target: &Target) -> ProbeOutcome {
        let mut request = self.client.get(&target.url);
        if let Some(host) = &target.host {
            request = request.header(header::HOST, host);
        }

        let started = Instant::now();
        let sent = tokio::time::timeout(self.timeout, request.send()).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        match sent {
            Ok(Ok(response)) => {
                let status_code = response.status().as_u16();
                debug!(
                    slug = %target.slug,
                    status_code,
                    response_time_ms = elapsed_ms,
                    "Probe completed"
                );
                ProbeOutcome::Completed {
                    healthy: status_code < SERVER_ERROR_FLOOR,
                    status_code,
                    response_time_ms: elapsed_ms,
                }
            }
            Ok(Err(e)) => {
                debug!(slug = %target.slug, error = %e, "Probe failed");
                ProbeOutcome::Failed {
                    error: e.to_string(),
                }
            }
            Err(_) => ProbeOutcome::Failed {
                error: format!("timed out after {}ms", self.timeout.as_millis()),
            },
        }
    }
}
