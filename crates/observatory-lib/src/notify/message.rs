//! Human-readable alert text and webhook payloads

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::alerting::{AlertEvent, AlertKind};
use crate::models::Target;

/// Rendered notification text
#[derive(Debug, Clone, PartialEq)]
pub struct AlertMessage {
    /// First line, also used in log output
    pub subject: String,
    /// Full multi-line body
    pub body: String,
}

impl AlertMessage {
    pub fn render(event: &AlertEvent, target: &Target) -> Self {
        let (subject, detail) = match event.kind {
            AlertKind::Down => (
                format!("🔴 {} — DOWN", target.name),
                format!(
                    "Unreachable after {} consecutive failures.",
                    event.consecutive_failures
                ),
            ),
            AlertKind::Recovery => {
                let detail = match event.down_since {
                    Some(since) => {
                        let minutes = (event.timestamp - since).max(0) / 60;
                        format!("Was down approximately {} min.", minutes)
                    }
                    None => "Service restored.".to_string(),
                };
                (format!("🟢 {} — UP (recovered)", target.name), detail)
            }
        };

        let body = format!("{}\n{}\n{}", subject, detail, target.link);
        Self { subject, body }
    }
}

/// JSON body posted to generic webhooks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub service: String,
    pub slug: String,
    /// `DOWN` or `UP`
    pub state: String,
    pub message: String,
    pub link: String,
    /// RFC 3339 time of the transition
    pub timestamp: String,
}

impl WebhookPayload {
    pub fn new(event: &AlertEvent, target: &Target, message: &AlertMessage) -> Self {
        Self {
            service: target.name.clone(),
            slug: target.slug.clone(),
            state: event.kind.new_state().to_string(),
            message: message.body.clone(),
            link: target.link.clone(),
            timestamp: format_rfc3339(event.timestamp),
        }
    }
}

/// Render unix seconds as RFC 3339, falling back to the raw number
pub fn format_rfc3339(timestamp: i64) -> String {
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| timestamp.to_string())
}
