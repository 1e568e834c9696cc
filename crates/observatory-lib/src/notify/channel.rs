//! Notification channels
//!
//! A closed set of delivery variants behind a single `send` operation.

use anyhow::{Context, Result};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};

use super::message::{AlertMessage, WebhookPayload};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Telegram Bot API settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub chat_id: String,
    /// Override for the Bot API base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
}

/// Generic outbound HTTP callback settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_webhook_method")]
    pub method: String,
}

fn default_webhook_method() -> String {
    "POST".to_string()
}

/// Channel section of the alerting configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram: Option<TelegramConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookConfig>,
}

impl ChannelsConfig {
    /// Build the channels that are fully configured; incomplete entries are skipped
    pub fn build(&self) -> Result<Vec<Channel>> {
        let mut channels = Vec::new();

        if let Some(tg) = &self.telegram {
            if !tg.token.is_empty() && !tg.chat_id.is_empty() {
                channels.push(Channel::Telegram {
                    token: tg.token.clone(),
                    chat_id: tg.chat_id.clone(),
                    api_base: tg
                        .api_base
                        .clone()
                        .unwrap_or_else(|| TELEGRAM_API_BASE.to_string()),
                });
            }
        }

        if let Some(wh) = &self.webhook {
            if !wh.url.is_empty() {
                let method = Method::from_bytes(wh.method.to_uppercase().as_bytes())
                    .with_context(|| format!("Invalid webhook method {:?}", wh.method))?;
                channels.push(Channel::Webhook {
                    url: wh.url.clone(),
                    method,
                });
            }
        }

        Ok(channels)
    }
}

/// A configured delivery channel
#[derive(Debug, Clone)]
pub enum Channel {
    /// Bot API message push
    Telegram {
        token: String,
        chat_id: String,
        api_base: String,
    },
    /// JSON callback to an arbitrary URL
    Webhook { url: String, method: Method },
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl Channel {
    /// Short name used in logs and delivery results
    pub fn name(&self) -> &'static str {
        match self {
            Channel::Telegram { .. } => "telegram",
            Channel::Webhook { .. } => "webhook",
        }
    }

    /// Deliver one message
    pub async fn send(
        &self,
        client: &Client,
        message: &AlertMessage,
        payload: &WebhookPayload,
    ) -> Result<()> {
        match self {
            Channel::Telegram {
                token,
                chat_id,
                api_base,
            } => {
                let url = format!("{}/bot{}/sendMessage", api_base.trim_end_matches('/'), token);
                let body = serde_json::json!({
                    "chat_id": chat_id,
                    "text": message.body,
                    "parse_mode": "HTML",
                });

                let response = client
                    .post(url)
                    .json(&body)
                    .send()
                    .await
                    .context("Failed to send telegram request")?;

                let status = response.status();
                let result: TelegramResponse = response
                    .json()
                    .await
                    .with_context(|| format!("Unreadable telegram response ({})", status))?;

                if !status.is_success() || !result.ok {
                    anyhow::bail!(
                        "telegram error ({}): {}",
                        status,
                        result.description.unwrap_or_default()
                    );
                }
                Ok(())
            }
            Channel::Webhook { url, method } => {
                let response = client
                    .request(method.clone(), url)
                    .json(payload)
                    .send()
                    .await
                    .context("Failed to send webhook request")?;

                if !response.status().is_success() {
                    anyhow::bail!("webhook error ({})", response.status());
                }
                Ok(())
            }
        }
    }
}
