//! HTTP probing of monitored targets
//!
//! Probers never fail: transport errors and timeouts are reported as
//! `ProbeOutcome::Failed` and feed the alert state machine like any other
//! result.

mod http;

pub use http::HttpProber;

use crate::models::{ProbeOutcome, Target};

pub use async_trait::async_trait;

/// Trait for probe implementations
#[async_trait]
pub trait Prober: Send + Sync {
    /// Probe one target and time the request
    async fn probe(&self, target: &Target) -> ProbeOutcome;
}
