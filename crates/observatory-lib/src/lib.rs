//! Observatory library for HTTP uptime checking
//!
//! This crate provides the core functionality for:
//! - Probing HTTP targets and timing responses
//! - Rolling z-score latency anomaly detection
//! - UP/DOWN alerting with hysteresis and notification delivery
//! - Sample persistence and reporting
//! - Health checks and observability

pub mod alerting;
pub mod anomaly;
pub mod coverage;
pub mod error;
pub mod health;
pub mod models;
pub mod notify;
pub mod observability;
pub mod pipeline;
pub mod prober;
pub mod report;
pub mod scheduler;
pub mod store;

pub use error::{PipelineError, StoreError};
pub use health::{ComponentHealth, ComponentStatus, HealthRegistry, HealthReport, Readiness};
pub use models::*;
pub use observability::{CheckerMetrics, StructuredLogger};
pub use pipeline::{Pipeline, TargetSpec};
pub use scheduler::{CheckConfig, CheckLoop, CheckLoopBuilder, PassSummary};
