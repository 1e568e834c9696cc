//! Measurement-and-decision pipeline
//!
//! One pass per target per tick:
//! probe -> anomaly score -> alert state transition -> notify -> persist.
//! A per-target lock guarantees two passes for the same target never overlap;
//! different targets share no mutable state and run freely in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::alerting::{AlertEvent, AlertStateMachine};
use crate::anomaly::{round_to, AnomalyConfig, AnomalyDetector, AnomalyOverrides, Assessment};
use crate::error::PipelineError;
use crate::models::{Availability, IngestResult, ProbeOutcome, ProbeReport, Sample, Target};
use crate::notify::{ChannelResult, NotificationDispatcher};
use crate::observability::{CheckerMetrics, StructuredLogger};
use crate::prober::Prober;
use crate::store::SampleStore;

/// A configured target with its resolved detector
struct TargetEntry {
    target: Target,
    detector: AnomalyDetector,
    /// Serializes passes for this target
    lock: Mutex<()>,
}

/// Per-target configuration handed to the pipeline
#[derive(Debug, Clone)]
pub struct TargetSpec {
    pub target: Target,
    pub anomaly: Option<AnomalyOverrides>,
}

impl From<Target> for TargetSpec {
    fn from(target: Target) -> Self {
        Self {
            target,
            anomaly: None,
        }
    }
}

/// Runs probes through detection, alerting and persistence
pub struct Pipeline {
    entries: HashMap<String, TargetEntry>,
    /// Configuration order, used for reporting
    order: Vec<String>,
    store: Arc<SampleStore>,
    alerts: Arc<AlertStateMachine>,
    /// `None` when alert delivery is disabled; state is tracked regardless
    dispatcher: Option<NotificationDispatcher>,
    metrics: CheckerMetrics,
    logger: StructuredLogger,
}

impl Pipeline {
    pub fn new(
        targets: Vec<TargetSpec>,
        defaults: &AnomalyConfig,
        store: Arc<SampleStore>,
        alerts: Arc<AlertStateMachine>,
    ) -> Self {
        let mut entries = HashMap::new();
        let mut order = Vec::new();

        for spec in targets {
            let config = spec
                .anomaly
                .as_ref()
                .map(|o| o.apply(defaults))
                .unwrap_or_else(|| defaults.clone());
            order.push(spec.target.slug.clone());
            entries.insert(
                spec.target.slug.clone(),
                TargetEntry {
                    target: spec.target,
                    detector: AnomalyDetector::new(config),
                    lock: Mutex::new(()),
                },
            );
        }

        let metrics = CheckerMetrics::new();
        metrics.set_targets_monitored(order.len() as i64);

        Self {
            entries,
            order,
            store,
            alerts,
            dispatcher: None,
            metrics,
            logger: StructuredLogger::new("observatory"),
        }
    }

    /// Enable alert delivery through `dispatcher`
    pub fn with_dispatcher(mut self, dispatcher: NotificationDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Configured targets in configuration order
    pub fn targets(&self) -> impl Iterator<Item = &Target> {
        self.order
            .iter()
            .filter_map(|slug| self.entries.get(slug).map(|e| &e.target))
    }

    pub fn target(&self, slug: &str) -> Option<&Target> {
        self.entries.get(slug).map(|e| &e.target)
    }

    pub fn store(&self) -> &Arc<SampleStore> {
        &self.store
    }

    pub fn alerts(&self) -> &Arc<AlertStateMachine> {
        &self.alerts
    }

    pub fn alerting_enabled(&self) -> bool {
        self.dispatcher.is_some()
    }

    /// Probe `slug` and ingest the result as one unit
    pub async fn check_target(
        &self,
        prober: &dyn Prober,
        slug: &str,
        timestamp: i64,
    ) -> Result<IngestResult, PipelineError> {
        let entry = self.entry(slug)?;
        let _guard = entry.lock.lock().await;

        let outcome = prober.probe(&entry.target).await;
        self.process(
            entry,
            ProbeReport {
                target: slug.to_string(),
                timestamp,
                outcome,
            },
        )
        .await
    }

    /// Ingest a probe obtained elsewhere
    pub async fn ingest(&self, report: ProbeReport) -> Result<IngestResult, PipelineError> {
        let entry = self.entry(&report.target)?;
        let _guard = entry.lock.lock().await;
        self.process(entry, report).await
    }

    /// Ingest from loose parts, validating that status and timing agree
    pub async fn ingest_parts(
        &self,
        target: &str,
        timestamp: i64,
        success: bool,
        status_code: Option<u16>,
        response_time_ms: Option<f64>,
    ) -> Result<IngestResult, PipelineError> {
        let outcome = ProbeOutcome::from_parts(success, status_code, response_time_ms).ok_or_else(
            || PipelineError::InconsistentProbe {
                target: target.to_string(),
                reason: "status code and response time must be both present or both absent, \
                         and a successful probe must have both"
                    .to_string(),
            },
        )?;

        self.ingest(ProbeReport {
            target: target.to_string(),
            timestamp,
            outcome,
        })
        .await
    }

    fn entry(&self, slug: &str) -> Result<&TargetEntry, PipelineError> {
        self.entries
            .get(slug)
            .ok_or_else(|| PipelineError::UnknownTarget(slug.to_string()))
    }

    async fn process(
        &self,
        entry: &TargetEntry,
        report: ProbeReport,
    ) -> Result<IngestResult, PipelineError> {
        let slug = report.target.as_str();
        let outcome = &report.outcome;

        // Only successful, timed probes are scored
        let assessment = match (outcome.is_success(), outcome.response_time_ms()) {
            (true, Some(ms)) => {
                let window = self.store.trailing_window(
                    slug,
                    report.timestamp,
                    entry.detector.config().window(),
                );
                entry.detector.assess(ms, &window)
            }
            _ => Assessment::default(),
        };

        let sample = Sample {
            target: slug.to_string(),
            url: entry.target.url.clone(),
            timestamp: report.timestamp,
            success: outcome.is_success(),
            status_code: outcome.status_code(),
            response_time_ms: outcome.response_time_ms().map(|ms| round_to(ms, 1)),
            zscore: assessment.zscore,
            is_anomaly: assessment.is_anomaly,
        };
        self.logger.log_probe(&sample);

        let event = self.alerts.observe(slug, outcome, report.timestamp);
        let deliveries = match &event {
            Some(event) => self.on_transition(event, &entry.target).await,
            None => {
                self.note_pending(slug, outcome);
                Vec::new()
            }
        };

        self.store.append(sample.clone())?;
        self.metrics.record_sample(&sample);

        Ok(IngestResult {
            zscore: sample.zscore,
            is_anomaly: sample.is_anomaly,
            alert_fired: event.is_some(),
            deliveries,
        })
    }

    async fn on_transition(&self, event: &AlertEvent, target: &Target) -> Vec<ChannelResult> {
        self.logger.log_state_change(event);
        self.metrics.inc_alert(event.kind);
        self.metrics.set_targets_down(self.alerts.down_count() as i64);

        let Some(dispatcher) = &self.dispatcher else {
            return Vec::new();
        };

        // Delivery failures never roll back the transition
        let outcome = dispatcher.dispatch(event, target).await;
        self.logger.log_dispatch(event, &outcome);
        self.metrics.add_notification_failures(outcome.failed());
        outcome.results
    }

    fn note_pending(&self, slug: &str, outcome: &ProbeOutcome) {
        if outcome.is_success() {
            return;
        }
        if let Some(state) = self.alerts.get(slug) {
            if state.state == Availability::Up {
                self.logger.log_threshold_pending(
                    slug,
                    state.consecutive_failures,
                    self.alerts.failure_threshold(),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::Channel;
    use async_trait::async_trait;
    use reqwest::Method;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn target(slug: &str) -> Target {
        Target {
            slug: slug.to_string(),
            name: slug.to_uppercase(),
            description: String::new(),
            link: format!("https://example.com/{slug}"),
            url: format!("http://127.0.0.1/{slug}"),
            host: None,
            threshold_ms: None,
        }
    }

    fn pipeline(slugs: &[&str]) -> Pipeline {
        Pipeline::new(
            slugs.iter().map(|s| TargetSpec::from(target(s))).collect(),
            &AnomalyConfig::default(),
            Arc::new(SampleStore::in_memory()),
            Arc::new(AlertStateMachine::new(2)),
        )
    }

    /// Prober returning a scripted sequence of outcomes
    struct ScriptedProber {
        outcomes: Vec<ProbeOutcome>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn probe(&self, _target: &Target) -> ProbeOutcome {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcomes[i % self.outcomes.len()].clone()
        }
    }

    #[tokio::test]
    async fn test_zscore_absent_until_min_samples() {
        let pipeline = pipeline(&["blog"]);

        for (i, ms) in [100.0, 110.0, 90.0, 105.0, 95.0].iter().enumerate() {
            let result = pipeline
                .ingest_parts("blog", 1_000 + i as i64 * 60, true, Some(200), Some(*ms))
                .await
                .unwrap();
            assert_eq!(result.zscore, None, "sample {i} has too little history");
            assert!(!result.is_anomaly);
        }

        let result = pipeline
            .ingest_parts("blog", 1_300, true, Some(200), Some(120.0))
            .await
            .unwrap();
        assert!((result.zscore.unwrap() - 2.828).abs() < 0.001);
        assert!(result.is_anomaly);

        let stored = pipeline.store().latest("blog").unwrap();
        assert_eq!(stored.zscore, result.zscore);
        assert!(stored.is_anomaly);
    }

    #[tokio::test]
    async fn test_failed_probe_is_stored_but_not_scored() {
        let pipeline = pipeline(&["blog"]);

        for i in 0..5 {
            pipeline
                .ingest_parts("blog", 1_000 + i * 60, true, Some(200), Some(100.0))
                .await
                .unwrap();
        }
        let failed = pipeline
            .ingest_parts("blog", 1_400, false, None, None)
            .await
            .unwrap();
        assert_eq!(failed.zscore, None);
        assert!(!failed.is_anomaly);

        // 503 responses are timed but not healthy; they are not scored either
        let unhealthy = pipeline
            .ingest_parts("blog", 1_450, false, Some(503), Some(9_000.0))
            .await
            .unwrap();
        assert_eq!(unhealthy.zscore, None);

        // The failures did not enter the window: still a flat window of 100s
        let next = pipeline
            .ingest_parts("blog", 1_500, true, Some(200), Some(100.0))
            .await
            .unwrap();
        assert_eq!(next.zscore, Some(0.0));
        assert_eq!(pipeline.store().len("blog"), 8);
    }

    #[tokio::test]
    async fn test_zscore_is_not_recomputed_later() {
        let pipeline = pipeline(&["blog"]);
        for i in 0..5 {
            pipeline
                .ingest_parts("blog", 1_000 + i * 60, true, Some(200), Some(100.0))
                .await
                .unwrap();
        }
        pipeline
            .ingest_parts("blog", 1_400, true, Some(200), Some(100.0))
            .await
            .unwrap();
        let before = pipeline.store().latest("blog").unwrap();

        pipeline
            .ingest_parts("blog", 1_500, true, Some(200), Some(500.0))
            .await
            .unwrap();

        let history = pipeline.store().range("blog", 1_400, 1_401);
        assert_eq!(history[0], before);
    }

    #[tokio::test]
    async fn test_unknown_target_rejected() {
        let pipeline = pipeline(&["blog"]);
        let err = pipeline
            .ingest_parts("nope", 1_000, true, Some(200), Some(1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnknownTarget(ref s) if s == "nope"));
        assert!(pipeline.store().is_empty());
    }

    #[tokio::test]
    async fn test_inconsistent_probe_rejected() {
        let pipeline = pipeline(&["blog"]);
        let err = pipeline
            .ingest_parts("blog", 1_000, true, Some(200), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InconsistentProbe { .. }));
        assert!(pipeline.alerts().get("blog").is_none());
    }

    #[tokio::test]
    async fn test_alert_fires_once_without_dispatcher() {
        let pipeline = pipeline(&["blog"]);
        assert!(!pipeline.alerting_enabled());

        let mut fired = Vec::new();
        for ts in [100, 400, 700] {
            let result = pipeline.ingest_parts("blog", ts, false, None, None).await.unwrap();
            fired.push(result.alert_fired);
            assert!(result.deliveries.is_empty());
        }
        assert_eq!(fired, vec![false, true, false]);
        assert_eq!(
            pipeline.alerts().get("blog").unwrap().state,
            Availability::Down
        );

        let recovered = pipeline
            .ingest_parts("blog", 1_000, true, Some(200), Some(20.0))
            .await
            .unwrap();
        assert!(recovered.alert_fired);
        assert_eq!(pipeline.alerts().get("blog").unwrap().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_delivery_failure_keeps_transition() {
        let mut server = mockito::Server::new_async().await;
        let broken = server
            .mock("POST", "/broken")
            .with_status(502)
            .expect(1)
            .create_async()
            .await;
        let healthy = server
            .mock("POST", "/healthy")
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let dispatcher = NotificationDispatcher::new(vec![
            Channel::Webhook {
                url: format!("{}/broken", server.url()),
                method: Method::POST,
            },
            Channel::Webhook {
                url: format!("{}/healthy", server.url()),
                method: Method::POST,
            },
        ])
        .unwrap();
        let pipeline = pipeline(&["blog"]).with_dispatcher(dispatcher);

        pipeline.ingest_parts("blog", 100, false, None, None).await.unwrap();
        let result = pipeline.ingest_parts("blog", 400, false, None, None).await.unwrap();

        assert!(result.alert_fired);
        assert_eq!(result.deliveries.len(), 2);
        assert_eq!(result.deliveries.iter().filter(|r| r.ok).count(), 1);
        assert_eq!(
            pipeline.alerts().get("blog").unwrap().state,
            Availability::Down
        );

        // Still DOWN: no second delivery attempt
        let again = pipeline.ingest_parts("blog", 700, false, None, None).await.unwrap();
        assert!(!again.alert_fired);
        assert!(again.deliveries.is_empty());

        broken.assert_async().await;
        healthy.assert_async().await;
    }

    #[tokio::test]
    async fn test_check_target_uses_prober() {
        let pipeline = pipeline(&["blog", "drop"]);
        let prober = ScriptedProber {
            outcomes: vec![ProbeOutcome::Failed {
                error: "refused".to_string(),
            }],
            calls: AtomicUsize::new(0),
        };

        pipeline.check_target(&prober, "blog", 100).await.unwrap();
        let second = pipeline.check_target(&prober, "blog", 400).await.unwrap();

        assert!(second.alert_fired);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 2);
        assert!(pipeline.alerts().get("drop").is_none());
        assert_eq!(pipeline.store().len("blog"), 2);
    }

    #[tokio::test]
    async fn test_per_target_overrides() {
        let specs = vec![TargetSpec {
            target: target("blog"),
            anomaly: Some(AnomalyOverrides {
                min_samples: Some(2),
                ..Default::default()
            }),
        }];
        let pipeline = Pipeline::new(
            specs,
            &AnomalyConfig::default(),
            Arc::new(SampleStore::in_memory()),
            Arc::new(AlertStateMachine::default()),
        );

        pipeline.ingest_parts("blog", 100, true, Some(200), Some(10.0)).await.unwrap();
        pipeline.ingest_parts("blog", 200, true, Some(200), Some(20.0)).await.unwrap();
        let third = pipeline
            .ingest_parts("blog", 300, true, Some(200), Some(15.0))
            .await
            .unwrap();
        assert_eq!(third.zscore, Some(0.0));
    }

    #[tokio::test]
    async fn test_replaying_sequence_is_identical() {
        let sequence = [
            (true, Some(200), Some(40.0)),
            (false, None, None),
            (false, Some(500), Some(3.0)),
            (false, None, None),
            (true, Some(200), Some(41.0)),
            (false, None, None),
        ];

        let run = || async {
            let pipeline = pipeline(&["blog"]);
            let mut kinds = Vec::new();
            for (i, (ok, code, ms)) in sequence.iter().enumerate() {
                let result = pipeline
                    .ingest_parts("blog", 100 + i as i64 * 300, *ok, *code, *ms)
                    .await
                    .unwrap();
                if result.alert_fired {
                    kinds.push(i);
                }
            }
            (pipeline.alerts().get("blog").unwrap(), kinds)
        };

        let first = run().await;
        let second = run().await;
        assert_eq!(first, second);
        assert_eq!(first.1, vec![2, 4]);
        assert_eq!(first.0.consecutive_failures, 1);
    }
}
