//! Core data models for the checker

use serde::{Deserialize, Serialize};

/// A monitored HTTP endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    /// Stable identifier, unique per endpoint
    pub slug: String,
    /// Human readable name used in notifications
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Public link included in notifications and reports
    #[serde(default)]
    pub link: String,
    /// Address actually probed
    pub url: String,
    /// Optional `Host` header override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Latency budget shown by reporting, not used by the anomaly math
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_ms: Option<u64>,
}

/// Result of a single probe at the transport level.
///
/// Status code and response time are either both known or both absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// The request completed and produced a status code
    Completed {
        healthy: bool,
        status_code: u16,
        response_time_ms: f64,
    },
    /// Connection failure, timeout or any other transport error
    Failed { error: String },
}

impl ProbeOutcome {
    /// Build an outcome from loose parts, rejecting half-populated probes
    pub fn from_parts(
        success: bool,
        status_code: Option<u16>,
        response_time_ms: Option<f64>,
    ) -> Option<Self> {
        match (status_code, response_time_ms) {
            (Some(status_code), Some(response_time_ms)) => Some(ProbeOutcome::Completed {
                healthy: success,
                status_code,
                response_time_ms,
            }),
            (None, None) if !success => Some(ProbeOutcome::Failed {
                error: "probe did not complete".to_string(),
            }),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Completed { healthy: true, .. })
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProbeOutcome::Completed { status_code, .. } => Some(*status_code),
            ProbeOutcome::Failed { .. } => None,
        }
    }

    pub fn response_time_ms(&self) -> Option<f64> {
        match self {
            ProbeOutcome::Completed {
                response_time_ms, ..
            } => Some(*response_time_ms),
            ProbeOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ProbeOutcome::Failed { error } => Some(error),
            ProbeOutcome::Completed { .. } => None,
        }
    }
}

/// Timed probe result handed to the pipeline by the prober
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub target: String,
    pub timestamp: i64,
    pub outcome: ProbeOutcome,
}

/// One stored probe observation.
///
/// Samples are immutable once constructed; `zscore` and `is_anomaly`
/// reflect only the window available when the sample was recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub target: String,
    pub url: String,
    pub timestamp: i64,
    pub success: bool,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<f64>,
    pub zscore: Option<f64>,
    pub is_anomaly: bool,
}

impl Sample {
    /// Whether this sample may contribute to trailing-window statistics
    pub fn is_qualifying(&self) -> bool {
        self.success && self.response_time_ms.is_some()
    }
}

/// Availability state of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Availability {
    #[default]
    Up,
    Down,
}

impl std::fmt::Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Availability::Up => write!(f, "UP"),
            Availability::Down => write!(f, "DOWN"),
        }
    }
}

/// What the pipeline hands back to the prober for each ingested probe
#[derive(Debug, Clone)]
pub struct IngestResult {
    pub zscore: Option<f64>,
    pub is_anomaly: bool,
    pub alert_fired: bool,
    /// Per-channel delivery results, empty when nothing was sent
    pub deliveries: Vec<crate::notify::ChannelResult>,
}
