//! Liveness and readiness of the checker itself.
//!
//! The checker is ready once its sample store is open and one full check
//! pass has finished, and stays ready while no component is unhealthy.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Component names reported by `/healthz`
pub mod components {
    pub const PROBER: &str = "prober";
    pub const SAMPLE_STORE: &str = "sample_store";
    pub const NOTIFIER: &str = "notifier";
    pub const SCHEDULER: &str = "scheduler";

    pub const ALL: &[&str] = &[PROBER, SAMPLE_STORE, NOTIFIER, SCHEDULER];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still serving, e.g. every target unreachable or a channel failing
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub updated_at: i64,
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Worst status over all components
    pub status: ComponentStatus,
    /// Unix time of the last finished check pass
    pub last_pass_at: Option<i64>,
    pub components: BTreeMap<String, ComponentHealth>,
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Readiness {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    components: BTreeMap<String, ComponentHealth>,
    store_open: bool,
    last_pass_at: Option<i64>,
}

/// Shared handle updated by startup and the check loop, read by the API
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    /// Every checker component starts out healthy
    pub fn new() -> Self {
        let now = chrono::Utc::now().timestamp();
        let components = components::ALL
            .iter()
            .map(|name| {
                let health = ComponentHealth {
                    status: ComponentStatus::Healthy,
                    message: None,
                    updated_at: now,
                };
                (name.to_string(), health)
            })
            .collect();

        Self {
            inner: Arc::new(RwLock::new(Inner {
                components,
                ..Inner::default()
            })),
        }
    }

    async fn set(&self, name: &str, status: ComponentStatus, message: Option<String>) {
        let health = ComponentHealth {
            status,
            message,
            updated_at: chrono::Utc::now().timestamp(),
        };
        self.inner
            .write()
            .await
            .components
            .insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Degraded, Some(message.into())).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Unhealthy, Some(message.into())).await;
    }

    /// The sample journal was replayed and is accepting appends
    pub async fn mark_store_open(&self) {
        self.inner.write().await.store_open = true;
    }

    /// A check pass finished at `ts`
    pub async fn record_pass(&self, ts: i64) {
        self.inner.write().await.last_pass_at = Some(ts);
    }

    pub async fn health(&self) -> HealthReport {
        let inner = self.inner.read().await;
        let status = inner
            .components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);

        HealthReport {
            status,
            last_pass_at: inner.last_pass_at,
            components: inner.components.clone(),
        }
    }

    pub async fn readiness(&self) -> Readiness {
        let inner = self.inner.read().await;

        let reason = if !inner.store_open {
            Some("Sample store not open".to_string())
        } else if inner.last_pass_at.is_none() {
            Some("First check pass not finished".to_string())
        } else {
            let unhealthy: Vec<&str> = inner
                .components
                .iter()
                .filter(|(_, c)| c.status == ComponentStatus::Unhealthy)
                .map(|(name, _)| name.as_str())
                .collect();
            (!unhealthy.is_empty()).then(|| format!("Unhealthy: {}", unhealthy.join(", ")))
        };

        Readiness {
            ready: reason.is_none(),
            reason,
        }
    }
}
