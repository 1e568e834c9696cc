//! Response-time anomaly detection
//!
//! Scores each new response time against the mean and population standard
//! deviation of the target's trailing window of successful, timed probes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default trailing window (1 hour)
const DEFAULT_WINDOW_SECS: u64 = 60 * 60;

/// Minimum qualifying samples before a verdict is possible
const DEFAULT_MIN_SAMPLES: usize = 5;

/// Default |z| above which a sample is flagged
const DEFAULT_Z_THRESHOLD: f64 = 2.0;

/// Detector settings, overridable per deployment and per target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyConfig {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    #[serde(default = "default_z_threshold")]
    pub z_threshold: f64,
}

fn default_window_secs() -> u64 {
    DEFAULT_WINDOW_SECS
}

fn default_min_samples() -> usize {
    DEFAULT_MIN_SAMPLES
}

fn default_z_threshold() -> f64 {
    DEFAULT_Z_THRESHOLD
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_WINDOW_SECS,
            min_samples: DEFAULT_MIN_SAMPLES,
            z_threshold: DEFAULT_Z_THRESHOLD,
        }
    }
}

impl AnomalyConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Per-target overrides layered on top of the deployment defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnomalyOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_samples: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z_threshold: Option<f64>,
}

impl AnomalyOverrides {
    /// Resolve the effective configuration for one target
    pub fn apply(&self, base: &AnomalyConfig) -> AnomalyConfig {
        AnomalyConfig {
            window_secs: self.window_secs.unwrap_or(base.window_secs),
            min_samples: self.min_samples.unwrap_or(base.min_samples),
            z_threshold: self.z_threshold.unwrap_or(base.z_threshold),
        }
    }
}

/// Mean and population standard deviation of a window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub mean: f64,
    pub std_dev: f64,
    pub count: usize,
}

impl WindowStats {
    /// Compute statistics with a two-pass algorithm. Returns `None` for an
    /// empty window.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;

        Some(Self {
            mean,
            std_dev: variance.sqrt(),
            count,
        })
    }
}

/// Anomaly verdict for one sample
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Assessment {
    /// Absent when the window held too few qualifying samples
    pub zscore: Option<f64>,
    pub is_anomaly: bool,
}

/// Rolling z-score detector. Pure: holds configuration only.
#[derive(Debug, Clone, Default)]
pub struct AnomalyDetector {
    config: AnomalyConfig,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }

    /// Z-score of `current_ms` against the prior window values.
    ///
    /// # Returns
    /// * `None` if the window has fewer than `min_samples` values
    /// * `Some(0.0)` if every window value is identical
    /// * `Some(z)` rounded to three decimals otherwise
    pub fn compute(&self, current_ms: f64, window: &[f64]) -> Option<f64> {
        self.raw_zscore(current_ms, window).map(|z| round_to(z, 3))
    }

    /// Score a sample and apply the anomaly threshold.
    ///
    /// The threshold is applied to the unrounded z-score.
    pub fn assess(&self, current_ms: f64, window: &[f64]) -> Assessment {
        let raw = self.raw_zscore(current_ms, window);
        Assessment {
            zscore: raw.map(|z| round_to(z, 3)),
            is_anomaly: raw.map_or(false, |z| z.abs() > self.config.z_threshold),
        }
    }

    fn raw_zscore(&self, current_ms: f64, window: &[f64]) -> Option<f64> {
        if window.len() < self.config.min_samples {
            return None;
        }

        let stats = WindowStats::from_values(window)?;

        // Zero variance is scored as "no deviation"
        if stats.std_dev == 0.0 {
            return Some(0.0);
        }

        Some((current_ms - stats.mean) / stats.std_dev)
    }
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
