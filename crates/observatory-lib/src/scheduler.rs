//! Periodic check loop
//!
//! Drives one pipeline pass per target per tick, with bounded parallelism
//! across targets, and persists alert state and status snapshots afterwards.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::stream::{self, StreamExt};
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::health::{components, HealthRegistry};
use crate::observability::CheckerMetrics;
use crate::pipeline::Pipeline;
use crate::prober::Prober;
use crate::report::StatusSnapshot;
use crate::store::write_json_atomic;

/// Configuration for the check loop
#[derive(Debug, Clone)]
pub struct CheckConfig {
    /// Time between passes (default: 5 minutes)
    pub interval: Duration,
    /// Targets probed concurrently within one pass
    pub max_concurrent: usize,
    /// Where alert states are snapshotted after each pass
    pub alert_state_path: Option<PathBuf>,
    /// Status page payloads rewritten after each pass
    pub status_paths: Vec<PathBuf>,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            max_concurrent: 4,
            alert_state_path: None,
            status_paths: Vec::new(),
        }
    }
}

/// Outcome of one pass over all targets
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassSummary {
    pub checked: usize,
    pub unreachable: usize,
    pub anomalies: usize,
    pub alerts_fired: usize,
    pub delivery_failures: usize,
    /// Pipeline errors, e.g. persistence failures
    pub errors: usize,
}

/// Check loop that periodically probes all targets
pub struct CheckLoop {
    pipeline: Arc<Pipeline>,
    prober: Arc<dyn Prober>,
    config: CheckConfig,
    health: Option<HealthRegistry>,
    metrics: CheckerMetrics,
}

impl CheckLoop {
    pub fn new(pipeline: Arc<Pipeline>, prober: Arc<dyn Prober>, config: CheckConfig) -> Self {
        Self {
            pipeline,
            prober,
            config,
            health: None,
            metrics: CheckerMetrics::new(),
        }
    }

    pub fn config(&self) -> &CheckConfig {
        &self.config
    }

    /// Run passes until `shutdown` fires. The first pass starts immediately.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            max_concurrent = self.config.max_concurrent,
            "Starting check loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = chrono::Utc::now().timestamp();
                    self.run_once(now).await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down check loop");
                    break;
                }
            }
        }
    }

    /// Probe every target once, stamping all samples with `now`
    pub async fn run_once(&self, now: i64) -> PassSummary {
        let start = Instant::now();
        let slugs: Vec<String> = self.pipeline.targets().map(|t| t.slug.clone()).collect();

        let results: Vec<_> = stream::iter(slugs)
            .map(|slug| async move {
                let result = self
                    .pipeline
                    .check_target(self.prober.as_ref(), &slug, now)
                    .await;
                (slug, result)
            })
            .buffer_unordered(self.config.max_concurrent.max(1))
            .collect()
            .await;

        let mut summary = PassSummary::default();
        for (slug, result) in results {
            summary.checked += 1;
            match result {
                Ok(ingested) => {
                    if !self.was_success(&slug) {
                        summary.unreachable += 1;
                    }
                    summary.anomalies += usize::from(ingested.is_anomaly);
                    summary.alerts_fired += usize::from(ingested.alert_fired);
                    summary.delivery_failures +=
                        ingested.deliveries.iter().filter(|d| !d.ok).count();
                }
                Err(e) => {
                    summary.errors += 1;
                    warn!(slug = %slug, error = %e, "Check failed");
                }
            }
        }

        let persisted = self.persist(now);
        let elapsed = start.elapsed();
        self.metrics.observe_tick_duration(elapsed.as_secs_f64());
        self.update_health(&summary, persisted.is_ok(), now).await;

        debug!(
            checked = summary.checked,
            unreachable = summary.unreachable,
            anomalies = summary.anomalies,
            alerts = summary.alerts_fired,
            elapsed_ms = elapsed.as_millis(),
            "Check pass complete"
        );

        summary
    }

    fn was_success(&self, slug: &str) -> bool {
        self.pipeline
            .store()
            .latest(slug)
            .is_some_and(|s| s.success)
    }

    /// Snapshot alert states and rewrite status payloads
    fn persist(&self, now: i64) -> Result<()> {
        if let Some(path) = &self.config.alert_state_path {
            if let Err(e) = self.pipeline.alerts().save(path) {
                warn!(path = %path.display(), error = %e, "Failed to save alert state");
                return Err(e.into());
            }
        }

        if !self.config.status_paths.is_empty() {
            let snapshot =
                StatusSnapshot::build(self.pipeline.targets(), self.pipeline.store(), now);
            for path in &self.config.status_paths {
                if let Err(e) = write_json_atomic(path, &snapshot) {
                    // The status page is a side output; keep going
                    warn!(path = %path.display(), error = %e, "Failed to write status snapshot");
                }
            }
        }
        Ok(())
    }

    async fn update_health(&self, summary: &PassSummary, persisted: bool, now: i64) {
        let Some(health) = &self.health else {
            return;
        };

        health.set_healthy(components::SCHEDULER).await;

        if summary.errors > 0 || !persisted {
            health
                .set_unhealthy(components::SAMPLE_STORE, "Failed to persist check results")
                .await;
        } else {
            health.set_healthy(components::SAMPLE_STORE).await;
        }

        if summary.checked > 0 && summary.unreachable == summary.checked {
            health
                .set_degraded(components::PROBER, "All targets unreachable")
                .await;
        } else {
            health.set_healthy(components::PROBER).await;
        }

        if summary.delivery_failures > 0 {
            health
                .set_degraded(
                    components::NOTIFIER,
                    format!("{} notification deliveries failed", summary.delivery_failures),
                )
                .await;
        } else if summary.alerts_fired > 0 {
            health.set_healthy(components::NOTIFIER).await;
        }

        health.record_pass(now).await;
    }
}

/// Builder for creating the check loop
pub struct CheckLoopBuilder {
    pipeline: Option<Arc<Pipeline>>,
    prober: Option<Arc<dyn Prober>>,
    config: CheckConfig,
    health: Option<HealthRegistry>,
}

impl CheckLoopBuilder {
    pub fn new() -> Self {
        Self {
            pipeline: None,
            prober: None,
            config: CheckConfig::default(),
            health: None,
        }
    }

    pub fn pipeline(mut self, pipeline: Arc<Pipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = Some(prober);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.config.max_concurrent = max;
        self
    }

    pub fn alert_state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.alert_state_path = Some(path.into());
        self
    }

    pub fn status_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.config.status_paths = paths;
        self
    }

    /// Report component health after each pass
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> Result<CheckLoop> {
        let pipeline = self
            .pipeline
            .ok_or_else(|| anyhow::anyhow!("Pipeline is required"))?;
        let prober = self
            .prober
            .ok_or_else(|| anyhow::anyhow!("Prober is required"))?;

        let mut check_loop = CheckLoop::new(pipeline, prober, self.config);
        check_loop.health = self.health;
        Ok(check_loop)
    }
}

impl Default for CheckLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::AlertStateMachine;
    use crate::anomaly::AnomalyConfig;
    use crate::health::ComponentStatus;
    use crate::models::{Availability, ProbeOutcome, Target};
    use crate::pipeline::TargetSpec;
    use crate::store::{load_json, SampleStore};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails every target whose slug starts with "down"
    struct MockProber {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockProber {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Prober for MockProber {
        async fn probe(&self, target: &Target) -> ProbeOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if target.slug.starts_with("down") {
                ProbeOutcome::Failed {
                    error: "connection refused".to_string(),
                }
            } else {
                ProbeOutcome::Completed {
                    healthy: true,
                    status_code: 200,
                    response_time_ms: 25.0,
                }
            }
        }
    }

    fn pipeline(slugs: &[&str]) -> Arc<Pipeline> {
        let targets = slugs
            .iter()
            .map(|slug| {
                TargetSpec::from(Target {
                    slug: slug.to_string(),
                    name: slug.to_string(),
                    description: String::new(),
                    link: String::new(),
                    url: format!("http://127.0.0.1/{slug}"),
                    host: None,
                    threshold_ms: None,
                })
            })
            .collect();
        Arc::new(Pipeline::new(
            targets,
            &AnomalyConfig::default(),
            Arc::new(SampleStore::in_memory()),
            Arc::new(AlertStateMachine::new(2)),
        ))
    }

    #[test]
    fn test_check_config_default() {
        let config = CheckConfig::default();
        assert_eq!(config.interval, Duration::from_secs(300));
        assert_eq!(config.max_concurrent, 4);
        assert!(config.status_paths.is_empty());
    }

    #[test]
    fn test_builder_missing_prober() {
        let result = CheckLoopBuilder::new().pipeline(pipeline(&["a"])).build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_run_once_checks_every_target() {
        let prober = Arc::new(MockProber::new());
        let check_loop = CheckLoopBuilder::new()
            .pipeline(pipeline(&["a", "b", "down-c"]))
            .prober(prober.clone())
            .build()
            .unwrap();

        let summary = check_loop.run_once(1_000).await;

        assert_eq!(summary.checked, 3);
        assert_eq!(summary.unreachable, 1);
        assert_eq!(summary.errors, 0);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let prober = Arc::new(MockProber::new());
        let check_loop = CheckLoopBuilder::new()
            .pipeline(pipeline(&["a", "b", "c", "d", "e", "f"]))
            .prober(prober.clone())
            .max_concurrent(2)
            .build()
            .unwrap();

        check_loop.run_once(1_000).await;

        assert!(prober.max_in_flight.load(Ordering::SeqCst) <= 2);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_persists_state_and_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("alert_state.json");
        let status_path = dir.path().join("status").join("data.json");

        let pipeline = pipeline(&["up", "down"]);
        let check_loop = CheckLoopBuilder::new()
            .pipeline(pipeline.clone())
            .prober(Arc::new(MockProber::new()))
            .alert_state_path(&state_path)
            .status_paths(vec![status_path.clone()])
            .build()
            .unwrap();

        check_loop.run_once(1_000).await;
        let second = check_loop.run_once(1_300).await;
        assert_eq!(second.alerts_fired, 1);

        let states: BTreeMap<String, crate::alerting::AlertState> =
            load_json(&state_path).unwrap().unwrap();
        assert_eq!(states["down"].state, Availability::Down);
        assert_eq!(states["up"].state, Availability::Up);

        let snapshot: StatusSnapshot = load_json(&status_path).unwrap().unwrap();
        assert!(!snapshot.all_up);
        assert_eq!(snapshot.services.len(), 2);
    }

    #[tokio::test]
    async fn test_health_reflects_pass() {
        let health = HealthRegistry::new();
        health.mark_store_open().await;
        assert!(!health.readiness().await.ready);

        let check_loop = CheckLoopBuilder::new()
            .pipeline(pipeline(&["down-a", "down-b"]))
            .prober(Arc::new(MockProber::new()))
            .health(health.clone())
            .build()
            .unwrap();

        check_loop.run_once(1_000).await;

        let response = health.health().await;
        assert_eq!(
            response.components[components::PROBER].status,
            ComponentStatus::Degraded
        );
        assert_eq!(response.status, ComponentStatus::Degraded);
        assert_eq!(response.last_pass_at, Some(1_000));
        assert!(health.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let prober = Arc::new(MockProber::new());
        let check_loop = CheckLoopBuilder::new()
            .pipeline(pipeline(&["a"]))
            .prober(prober.clone())
            .interval(Duration::from_secs(3600))
            .build()
            .unwrap();

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(check_loop.run(rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(prober.calls.load(Ordering::SeqCst), 1);
    }
}
