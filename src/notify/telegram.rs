// src/notify/telegram.rs
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{render_message, ParseMode, Publisher};
use crate::config::TelegramConfig;
use crate::store::StoredItem;

/// Posts rendered items to a Telegram chat through the Bot API `sendMessage` call.
pub struct TelegramPublisher {
    client: Client,
    api_base: String,
    token: String,
    chat_id: String,
    mode: ParseMode,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'static str>,
    disable_web_page_preview: bool,
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramPublisher {
    pub fn new(token: String, chat_id: String, mode: ParseMode) -> Result<Self> {
        Self::build(
            token,
            chat_id,
            mode,
            "https://api.telegram.org".to_string(),
            Duration::from_secs(10),
        )
    }

    pub fn from_config(cfg: &TelegramConfig) -> Result<Self> {
        Self::build(
            cfg.bot_token.clone(),
            cfg.channel_id.clone(),
            cfg.parse_mode,
            cfg.api_base.clone(),
            Duration::from_secs(cfg.timeout_secs),
        )
    }

    /// Point the publisher at another Bot API host (self-hosted server, tests).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    fn build(
        token: String,
        chat_id: String,
        mode: ParseMode,
        api_base: String,
        timeout: Duration,
    ) -> Result<Self> {
        if token.trim().is_empty() {
            anyhow::bail!("telegram bot token is empty");
        }
        if chat_id.trim().is_empty() {
            anyhow::bail!("telegram channel id is empty");
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("building telegram http client")?;
        Ok(Self {
            client,
            api_base,
            token,
            chat_id,
            mode,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.api_base.trim_end_matches('/'),
            self.token
        )
    }
}

#[async_trait::async_trait]
impl Publisher for TelegramPublisher {
    async fn publish(&self, item: &StoredItem) -> Result<()> {
        let text = render_message(item, self.mode);
        let body = SendMessage {
            chat_id: &self.chat_id,
            text: &text,
            parse_mode: self.mode.api_value(),
            disable_web_page_preview: false,
        };

        // The endpoint embeds the bot token; keep it out of error messages.
        let resp = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| e.without_url())
            .context("telegram sendMessage")?;

        let status = resp.status();
        let api: ApiResponse = resp
            .json()
            .await
            .map_err(|e| e.without_url())
            .with_context(|| format!("telegram response body (status {status})"))?;

        if !api.ok {
            return Err(anyhow!(
                "telegram rejected message: {}",
                api.description.unwrap_or_else(|| status.to_string())
            ));
        }
        tracing::debug!(id = item.id, "telegram message sent");
        Ok(())
    }
}
