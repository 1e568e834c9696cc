//! HTTP API for reports, health checks and Prometheus metrics

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use observatory_lib::{
    alerting::AlertState,
    health::{ComponentStatus, HealthRegistry},
    report::{recent_anomalies, render_csv, StatusReport},
    Pipeline, Sample, Target,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use tracing::{info, warn};

/// Default lookback of the anomalies endpoint
const DEFAULT_ANOMALY_HOURS: u32 = 1;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, pipeline: Arc<Pipeline>) -> Self {
        Self {
            health_registry,
            pipeline,
        }
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Latest sample, alert state and 24h stats of every target
async fn status(State(state): State<Arc<AppState>>) -> Json<StatusReport> {
    let pipeline = &state.pipeline;
    Json(StatusReport::build(
        pipeline.targets(),
        pipeline.store(),
        &pipeline.alerts().snapshot(),
        now(),
    ))
}

async fn targets(State(state): State<Arc<AppState>>) -> Json<Vec<Target>> {
    Json(state.pipeline.targets().cloned().collect())
}

#[derive(Debug, Deserialize)]
struct AnomalyQuery {
    hours: Option<u32>,
}

async fn anomalies(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AnomalyQuery>,
) -> Json<Vec<Sample>> {
    let hours = query.hours.unwrap_or(DEFAULT_ANOMALY_HOURS);
    Json(recent_anomalies(state.pipeline.store(), now(), hours))
}

async fn alerts(State(state): State<Arc<AppState>>) -> Json<BTreeMap<String, AlertState>> {
    Json(state.pipeline.alerts().snapshot())
}

/// Last 24 hours of samples as CSV
async fn export_csv(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"observatory-24h.csv\"",
            ),
        ],
        render_csv(state.pipeline.store(), now()),
    )
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/status", get(status))
        .route("/api/v1/targets", get(targets))
        .route("/api/v1/anomalies", get(anomalies))
        .route("/api/v1/alerts", get(alerts))
        .route("/api/v1/export.csv", get(export_csv))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
