//! Alert notification delivery
//!
//! This module provides:
//! - Message rendering for DOWN and recovery transitions
//! - Telegram and webhook channels behind one `send` operation
//! - A dispatcher that fans out to all channels and never fails

mod channel;
mod dispatcher;
mod message;

pub use channel::{Channel, ChannelsConfig, TelegramConfig, WebhookConfig};
pub use dispatcher::{ChannelResult, DispatchOutcome, NotificationDispatcher};
pub use message::{format_rfc3339, AlertMessage, WebhookPayload};
