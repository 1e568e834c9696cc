//! Anomaly detection for probe response times
//!
//! Computes a rolling z-score for every successful probe against the
//! trailing window of earlier successful probes for the same target.

mod detector;

pub use detector::{AnomalyConfig, AnomalyDetector, AnomalyOverrides, Assessment, WindowStats};
pub(crate) use detector::round_to;
