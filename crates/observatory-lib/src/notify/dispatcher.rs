//! Fan-out of alert events to every configured channel

use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::channel::Channel;
use super::message::{AlertMessage, WebhookPayload};
use crate::alerting::AlertEvent;
use crate::models::Target;

/// Default per-channel delivery timeout
const DEFAULT_CHANNEL_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivery result for one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelResult {
    pub channel: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate of all channel results for one event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub results: Vec<ChannelResult>,
}

impl DispatchOutcome {
    pub fn delivered(&self) -> usize {
        self.results.iter().filter(|r| r.ok).count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| !r.ok).count()
    }
}

/// Sends alert events to every configured channel independently
pub struct NotificationDispatcher {
    channels: Vec<Channel>,
    client: Client,
    channel_timeout: Duration,
}

impl NotificationDispatcher {
    /// Create a dispatcher with the default 10 second channel timeout
    pub fn new(channels: Vec<Channel>) -> Result<Self> {
        Self::with_timeout(channels, DEFAULT_CHANNEL_TIMEOUT)
    }

    pub fn with_timeout(channels: Vec<Channel>, channel_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(channel_timeout)
            .build()
            .context("Failed to create notification HTTP client")?;

        Ok(Self {
            channels,
            client,
            channel_timeout,
        })
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Deliver `event` to every channel concurrently.
    ///
    /// Never fails: each channel's error is captured in its `ChannelResult`.
    pub async fn dispatch(&self, event: &AlertEvent, target: &Target) -> DispatchOutcome {
        let message = AlertMessage::render(event, target);
        let payload = WebhookPayload::new(event, target, &message);

        let sends = self.channels.iter().map(|channel| {
            let message = &message;
            let payload = &payload;
            async move {
                let sent = tokio::time::timeout(
                    self.channel_timeout,
                    channel.send(&self.client, message, payload),
                )
                .await;

                let error = match sent {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(format!("{:#}", e)),
                    Err(_) => Some(format!(
                        "timed out after {}s",
                        self.channel_timeout.as_secs()
                    )),
                };

                match &error {
                    None => info!(
                        channel = channel.name(),
                        slug = %event.target,
                        subject = %message.subject,
                        "Alert delivered"
                    ),
                    Some(e) => warn!(
                        channel = channel.name(),
                        slug = %event.target,
                        error = %e,
                        "Alert delivery failed"
                    ),
                }

                ChannelResult {
                    channel: channel.name().to_string(),
                    ok: error.is_none(),
                    error,
                }
            }
        });

        DispatchOutcome {
            results: join_all(sends).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::AlertKind;
    use reqwest::Method;

    fn target() -> Target {
        Target {
            slug: "blog".to_string(),
            name: "Blog".to_string(),
            description: String::new(),
            link: "https://example.com/".to_string(),
            url: "http://127.0.0.1/".to_string(),
            host: None,
            threshold_ms: None,
        }
    }

    fn down_event() -> AlertEvent {
        AlertEvent {
            target: "blog".to_string(),
            kind: AlertKind::Down,
            timestamp: 1_700_000_000,
            consecutive_failures: 2,
            down_since: None,
            detail: None,
        }
    }

    #[tokio::test]
    async fn test_no_channels_yields_empty_outcome() {
        let dispatcher = NotificationDispatcher::new(vec![]).unwrap();
        let outcome = dispatcher.dispatch(&down_event(), &target()).await;
        assert!(outcome.results.is_empty());
        assert!(dispatcher.is_empty());
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_other_channel() {
        let mut server = mockito::Server::new_async().await;
        let broken = server
            .mock("POST", "/broken")
            .with_status(500)
            .create_async()
            .await;
        let healthy = server
            .mock("POST", "/healthy")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"slug":"blog","state":"DOWN"}"#.to_string(),
            ))
            .with_status(200)
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

        let outcome = dispatcher.dispatch(&down_event(), &target()).await;

        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.failed(), 1);
        assert_eq!(outcome.delivered(), 1);
        assert!(!outcome.results[0].ok);
        assert!(outcome.results[0].error.as_ref().unwrap().contains("500"));
        assert!(outcome.results[1].ok);

        broken.assert_async().await;
        healthy.assert_async().await;
    }

    #[tokio::test]
    async fn test_telegram_reports_api_rejection() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/botsecret/sendMessage")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"chat_id":"42","parse_mode":"HTML"}"#.to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":false,"description":"chat not found"}"#)
            .create_async()
            .await;

        let dispatcher = NotificationDispatcher::new(vec![Channel::Telegram {
            token: "secret".to_string(),
            chat_id: "42".to_string(),
            api_base: server.url(),
        }])
        .unwrap();

        let outcome = dispatcher.dispatch(&down_event(), &target()).await;
        assert_eq!(outcome.failed(), 1);
        assert!(outcome.results[0]
            .error
            .as_ref()
            .unwrap()
            .contains("chat not found"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_telegram_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/botsecret/sendMessage")
            .with_status(200)
            .with_body(r#"{"ok":true,"result":{}}"#)
            .create_async()
            .await;

        let dispatcher = NotificationDispatcher::new(vec![Channel::Telegram {
            token: "secret".to_string(),
            chat_id: "42".to_string(),
            api_base: server.url(),
        }])
        .unwrap();

        let outcome = dispatcher.dispatch(&down_event(), &target()).await;
        assert_eq!(outcome.delivered(), 1);
        assert_eq!(outcome.results[0].channel, "telegram");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unreachable_channel_is_captured() {
        // Nothing listens on port 9 locally
        let dispatcher = NotificationDispatcher::with_timeout(
            vec![Channel::Webhook {
                url: "http://127.0.0.1:9/hook".to_string(),
                method: Method::POST,
            }],
            Duration::from_secs(2),
        )
        .unwrap();

        let outcome = dispatcher.dispatch(&down_event(), &target()).await;
        assert_eq!(outcome.failed(), 1);
        assert!(outcome.results[0].error.is_some());
    }
}
