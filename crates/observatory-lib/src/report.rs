//! Read-only views over stored samples and alert states
//!
//! Everything here is derived on demand; nothing feeds back into the pipeline.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::alerting::AlertState;
use crate::anomaly::round_to;
use crate::models::{Sample, Target};
use crate::notify::format_rfc3339;
use crate::store::SampleStore;

const SECS_PER_HOUR: i64 = 3_600;

/// CSV export header
pub const CSV_HEADER: &str = "timestamp_utc,target,url,ok,status_code,response_ms,zscore,anomaly";

/// Aggregates over one target's samples
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UptimeStats {
    pub checks: usize,
    /// Share of healthy checks, two decimals; `None` without checks
    pub uptime_pct: Option<f64>,
    /// Mean response time over healthy checks
    pub avg_ms: Option<f64>,
    pub max_ms: Option<f64>,
    pub anomalies: usize,
}

impl UptimeStats {
    pub fn from_samples(samples: &[Sample]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let healthy = samples.iter().filter(|s| s.success).count();
        let times: Vec<f64> = samples
            .iter()
            .filter(|s| s.is_qualifying())
            .filter_map(|s| s.response_time_ms)
            .collect();

        let avg_ms = (!times.is_empty())
            .then(|| round_to(times.iter().sum::<f64>() / times.len() as f64, 1));
        let max_ms = times.iter().copied().reduce(f64::max);

        Self {
            checks: samples.len(),
            uptime_pct: Some(round_to(healthy as f64 * 100.0 / samples.len() as f64, 2)),
            avg_ms,
            max_ms,
            anomalies: samples.iter().filter(|s| s.is_anomaly).count(),
        }
    }
}

/// Everything known about one target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetReport {
    #[serde(flatten)]
    pub target: Target,
    /// Most recent sample, if the target was ever probed
    pub latest: Option<Sample>,
    pub alert: AlertState,
    /// Last 24 hours
    pub stats: UptimeStats,
}

/// Current status of all configured targets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub generated_at: String,
    pub all_up: bool,
    pub targets: Vec<TargetReport>,
}

impl StatusReport {
    pub fn build<'a>(
        targets: impl IntoIterator<Item = &'a Target>,
        store: &SampleStore,
        alerts: &BTreeMap<String, AlertState>,
        now: i64,
    ) -> Self {
        let targets: Vec<TargetReport> = targets
            .into_iter()
            .map(|target| TargetReport {
                latest: store.latest(&target.slug),
                alert: alerts.get(&target.slug).cloned().unwrap_or_default(),
                stats: UptimeStats::from_samples(&store.last_day(&target.slug, now)),
                target: target.clone(),
            })
            .collect();

        Self {
            generated_at: format_rfc3339(now),
            // Targets without a sample yet do not count against all_up
            all_up: targets
                .iter()
                .filter_map(|t| t.latest.as_ref())
                .all(|s| s.success),
            targets,
        }
    }
}

/// One row of the legacy status page payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub name: String,
    pub slug: String,
    pub description: String,
    pub link: String,
    pub up: bool,
    pub status_code: Option<u16>,
    /// Whole milliseconds
    pub response_ms: Option<i64>,
    pub anomaly: bool,
    pub zscore: Option<f64>,
    pub checked_at: Option<String>,
}

/// Status page payload `{generated_at, services, all_up}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub generated_at: String,
    pub services: Vec<ServiceStatus>,
    pub all_up: bool,
}

impl StatusSnapshot {
    /// Build from the latest sample of each target
    pub fn build<'a>(
        targets: impl IntoIterator<Item = &'a Target>,
        store: &SampleStore,
        now: i64,
    ) -> Self {
        let services: Vec<ServiceStatus> = targets
            .into_iter()
            .map(|target| {
                let latest = store.latest(&target.slug);
                ServiceStatus {
                    name: target.name.clone(),
                    slug: target.slug.clone(),
                    description: target.description.clone(),
                    link: target.link.clone(),
                    up: latest.as_ref().is_some_and(|s| s.success),
                    status_code: latest.as_ref().and_then(|s| s.status_code),
                    response_ms: latest
                        .as_ref()
                        .and_then(|s| s.response_time_ms)
                        .map(|ms| ms.trunc() as i64),
                    anomaly: latest.as_ref().is_some_and(|s| s.is_anomaly),
                    zscore: latest.as_ref().and_then(|s| s.zscore),
                    checked_at: latest.as_ref().map(|s| format_rfc3339(s.timestamp)),
                }
            })
            .collect();

        Self {
            generated_at: format_rfc3339(now),
            all_up: services.iter().all(|s| s.up),
            services,
        }
    }
}

/// Anomalous samples of the last `hours`, newest first
pub fn recent_anomalies(store: &SampleStore, now: i64, hours: u32) -> Vec<Sample> {
    let mut anomalies: Vec<Sample> = store
        .since(now - i64::from(hours) * SECS_PER_HOUR)
        .into_iter()
        .filter(|s| s.is_anomaly)
        .collect();
    anomalies.reverse();
    anomalies
}

/// Last 24 hours of samples as CSV, newest first
pub fn render_csv(store: &SampleStore, now: i64) -> String {
    let mut samples = store.since(now - 24 * SECS_PER_HOUR);
    samples.reverse();

    let mut out = String::with_capacity(64 * (samples.len() + 1));
    out.push_str(CSV_HEADER);
    out.push('\n');

    for s in &samples {
        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{},{}",
            format_rfc3339(s.timestamp),
            csv_field(&s.target),
            csv_field(&s.url),
            u8::from(s.success),
            s.status_code.map(|c| c.to_string()).unwrap_or_default(),
            s.response_time_ms.map(|ms| ms.to_string()).unwrap_or_default(),
            s.zscore.map(|z| z.to_string()).unwrap_or_default(),
            u8::from(s.is_anomaly),
        );
    }
    out
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
