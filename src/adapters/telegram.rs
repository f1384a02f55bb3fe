//! Outbound notification channels
//!
//! Telegram Bot API delivery, plus a log-only channel used when no bot
//! credentials are configured.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::TelegramConfig;
use crate::error::{GoalwatchError, NotifyError, Result};

/// Delivers a text message to a destination
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(&self, destination: &str, text: &str) -> std::result::Result<(), NotifyError>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Telegram Bot API client
#[derive(Clone)]
pub struct TelegramChannel {
    client: Client,
    api_base: String,
    token: String,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
}

impl TelegramChannel {
    pub fn new(api_base: &str, token: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                GoalwatchError::Internal(format!("failed to build Telegram HTTP client: {}", e))
            })?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    /// Build from config; `None` when the bot token is missing
    pub fn from_config(config: &TelegramConfig) -> Result<Option<Self>> {
        match config.bot_token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => {
                info!("Telegram notifications enabled");
                Self::new(&config.api_base, token).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn send_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.token)
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    async fn send(&self, destination: &str, text: &str) -> std::result::Result<(), NotifyError> {
        let message = SendMessage {
            chat_id: destination,
            text,
            disable_web_page_preview: true,
        };

        // The URL embeds the token; keep it out of error text
        let resp = self
            .client
            .post(self.send_url())
            .json(&message)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string().replace(&self.token, "<token>")))?;

        let status = resp.status();
        if status.is_success() {
            debug!("Telegram message sent");
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            error!(status = status.as_u16(), body = %body, "Telegram sendMessage failed");
            Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}

/// Dry-run channel: writes the message to the log instead of sending it
#[derive(Debug, Clone, Default)]
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    async fn send(&self, destination: &str, text: &str) -> std::result::Result<(), NotifyError> {
        info!(destination, text, "Notification (dry run)");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
