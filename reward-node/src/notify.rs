//! Notifier adapters: structured log output and the Telegram Bot API.

use async_trait::async_trait;
use reward_core::notify::{Notifier, NotifyError, NotifyTarget};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

/// Writes announcements to the log instead of a platform. Used in mock mode.
#[derive(Debug, Default, Clone)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send(&self, target: &NotifyTarget, text: &str) -> Result<(), NotifyError> {
        info!(event = "announcement", target = %target, text, "announcement");
        Ok(())
    }
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: String::new(),
            api_base: default_api_base(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to_message_id: Option<i64>,
}

/// Posts to a Telegram group via `sendMessage`.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    cfg: TelegramConfig,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(cfg: TelegramConfig) -> Result<Self, NotifyError> {
        if cfg.bot_token.trim().is_empty() {
            return Err(NotifyError::Config("notifier.telegram.bot_token is empty".to_string()));
        }
        if cfg.chat_id.trim().is_empty() {
            return Err(NotifyError::Config("notifier.telegram.chat_id is empty".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotifyError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self { cfg, client })
    }

    fn url(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.cfg.api_base.trim_end_matches('/'),
            self.cfg.bot_token
        )
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, target: &NotifyTarget, text: &str) -> Result<(), NotifyError> {
        // Chat content refs are message ids; anything else posts to the group.
        let reply_to_message_id = match target {
            NotifyTarget::Reply(r) => r.parse::<i64>().ok(),
            NotifyTarget::Channel => None,
        };
        let body = SendMessage {
            chat_id: &self.cfg.chat_id,
            text,
            reply_to_message_id,
        };
        let resp = self
            .client
            .post(self.url())
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::Network(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        debug!(target = %target, "telegram message sent");
        Ok(())
    }
}
