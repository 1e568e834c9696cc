//! Observability infrastructure for the checker
//!
//! Provides:
//! - Prometheus metrics (probe latency, probe outcomes, anomalies, alerts, deliveries)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use crate::alerting::{AlertEvent, AlertKind};
use crate::models::Sample;
use crate::notify::DispatchOutcome;

/// Histogram buckets for probe latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<CheckerMetricsInner> = OnceLock::new();

struct CheckerMetricsInner {
    probe_latency_seconds: Histogram,
    probes_total: IntCounterVec,
    anomalies_detected: IntCounter,
    alerts_fired: IntCounterVec,
    notification_failures: IntCounter,
    targets_monitored: IntGauge,
    targets_down: IntGauge,
    tick_duration_seconds: Histogram,
}

impl CheckerMetricsInner {
    fn new() -> Self {
        Self {
            probe_latency_seconds: register_histogram!(
                "observatory_probe_latency_seconds",
                "Response time of successful probes",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register probe_latency_seconds"),

            probes_total: register_int_counter_vec!(
                "observatory_probes_total",
                "Probes executed, by result",
                &["result"]
            )
            .expect("Failed to register probes_total"),

            anomalies_detected: register_int_counter!(
                "observatory_anomalies_detected_total",
                "Samples flagged as latency anomalies"
            )
            .expect("Failed to register anomalies_detected"),

            alerts_fired: register_int_counter_vec!(
                "observatory_alerts_fired_total",
                "Availability transitions, by direction",
                &["kind"]
            )
            .expect("Failed to register alerts_fired"),

            notification_failures: register_int_counter!(
                "observatory_notification_failures_total",
                "Channel deliveries that failed"
            )
            .expect("Failed to register notification_failures"),

            targets_monitored: register_int_gauge!(
                "observatory_targets_monitored",
                "Number of configured targets"
            )
            .expect("Failed to register targets_monitored"),

            targets_down: register_int_gauge!(
                "observatory_targets_down",
                "Number of targets currently DOWN"
            )
            .expect("Failed to register targets_down"),

            tick_duration_seconds: register_histogram!(
                "observatory_tick_duration_seconds",
                "Wall time of one full check pass",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_duration_seconds"),
        }
    }
}

/// Checker metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct CheckerMetrics {
    _private: (),
}

impl Default for CheckerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckerMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(CheckerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &CheckerMetricsInner {
        GLOBAL_METRICS.get_or_init(CheckerMetricsInner::new)
    }

    /// Record one stored sample
    pub fn record_sample(&self, sample: &Sample) {
        let result = if sample.success {
            "success"
        } else if sample.status_code.is_some() {
            "unhealthy"
        } else {
            "failed"
        };
        self.inner().probes_total.with_label_values(&[result]).inc();

        if let (true, Some(ms)) = (sample.success, sample.response_time_ms) {
            self.inner().probe_latency_seconds.observe(ms / 1000.0);
        }
        if sample.is_anomaly {
            self.inner().anomalies_detected.inc();
        }
    }

    pub fn inc_alert(&self, kind: AlertKind) {
        let label = match kind {
            AlertKind::Down => "down",
            AlertKind::Recovery => "recovery",
        };
        self.inner().alerts_fired.with_label_values(&[label]).inc();
    }

    pub fn add_notification_failures(&self, count: usize) {
        self.inner().notification_failures.inc_by(count as u64);
    }

    pub fn set_targets_monitored(&self, count: i64) {
        self.inner().targets_monitored.set(count);
    }

    pub fn set_targets_down(&self, count: i64) {
        self.inner().targets_down.set(count);
    }

    pub fn observe_tick_duration(&self, duration_secs: f64) {
        self.inner().tick_duration_seconds.observe(duration_secs);
    }
}

/// Structured logger for checker events
///
/// Provides consistent JSON-formatted logging for probes, anomalies,
/// state changes and deliveries.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    /// Log a stored probe sample
    pub fn log_probe(&self, sample: &Sample) {
        debug!(
            event = "probe_completed",
            instance = %self.instance,
            slug = %sample.target,
            success = sample.success,
            status_code = ?sample.status_code,
            response_time_ms = ?sample.response_time_ms,
            zscore = ?sample.zscore,
            "Probe recorded"
        );

        if sample.is_anomaly {
            warn!(
                event = "latency_anomaly",
                instance = %self.instance,
                slug = %sample.target,
                response_time_ms = ?sample.response_time_ms,
                zscore = ?sample.zscore,
                "Latency anomaly detected"
            );
        }
    }

    /// Log a failure that has not reached the alert threshold yet
    pub fn log_threshold_pending(&self, slug: &str, failures: u32, threshold: u32) {
        info!(
            event = "threshold_pending",
            instance = %self.instance,
            slug = %slug,
            failures,
            threshold,
            "Failure below alert threshold"
        );
    }

    /// Log an UP/DOWN transition
    pub fn log_state_change(&self, event: &AlertEvent) {
        match event.kind {
            AlertKind::Down => warn!(
                event = "state_change",
                instance = %self.instance,
                slug = %event.target,
                from = "UP",
                to = "DOWN",
                consecutive_failures = event.consecutive_failures,
                "Target went DOWN"
            ),
            AlertKind::Recovery => info!(
                event = "state_change",
                instance = %self.instance,
                slug = %event.target,
                from = "DOWN",
                to = "UP",
                down_since = ?event.down_since,
                "Target recovered"
            ),
        }
    }

    /// Log the aggregate result of a dispatch
    pub fn log_dispatch(&self, event: &AlertEvent, outcome: &DispatchOutcome) {
        if outcome.failed() == 0 {
            info!(
                event = "notification_sent",
                instance = %self.instance,
                slug = %event.target,
                kind = %event.kind,
                channels = outcome.delivered(),
                "Alert notifications sent"
            );
        } else {
            warn!(
                event = "notification_failed",
                instance = %self.instance,
                slug = %event.target,
                kind = %event.kind,
                delivered = outcome.delivered(),
                failed = outcome.failed(),
                "Some alert notifications failed"
            );
        }
    }

    /// Log checker startup
    pub fn log_startup(&self, version: &str, targets: usize, alerting: bool) {
        info!(
            event = "checker_started",
            instance = %self.instance,
            version = %version,
            targets,
            alerting,
            "Observatory checker started"
        );
    }

    /// Log checker shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "checker_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Observatory checker shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checker_metrics_creation() {
        let metrics = CheckerMetrics::new();

        let sample = Sample {
            target: "blog".to_string(),
            url: "http://127.0.0.1/".to_string(),
            timestamp: 0,
            success: true,
            status_code: Some(200),
            response_time_ms: Some(12.0),
            zscore: Some(2.5),
            is_anomaly: true,
        };
        metrics.record_sample(&sample);
        metrics.inc_alert(AlertKind::Down);
        metrics.add_notification_failures(1);
        metrics.set_targets_monitored(3);
        metrics.set_targets_down(1);
        metrics.observe_tick_duration(0.2);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-host");
        assert_eq!(logger.instance, "test-host");
    }
}
