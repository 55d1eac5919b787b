//! Telegram Bot API transport.
//!
//! Sends replies with `sendMessage` (chunked, anchored to the source message
//! and thread) and typing indicators with `sendChatAction`. Inbound updates
//! arrive through the gateway webhook and are parsed by [`crate::update`].

use crate::split::split_message;
use async_trait::async_trait;
use parley_config::TelegramConfig;
use parley_core::channel::{Channel, ChatTarget};
use parley_core::error::ChannelError;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

const CHANNEL_NAME: &str = "telegram";

/// Telegram Bot API client.
pub struct TelegramChannel {
    api_base: String,
    token: String,
    parse_mode: Option<String>,
    chunk_limit: usize,
    client: reqwest::Client,
}

impl std::fmt::Debug for TelegramChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramChannel")
            .field("api_base", &self.api_base)
            .field("token", &"[REDACTED]")
            .field("parse_mode", &self.parse_mode)
            .field("chunk_limit", &self.chunk_limit)
            .finish()
    }
}

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramChannel {
    pub fn new(token: impl Into<String>, timeout: Duration) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChannelError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            api_base: "https://api.telegram.org".into(),
            token: token.into(),
            parse_mode: None,
            chunk_limit: 4000,
            client,
        })
    }

    /// Build from the `[telegram]` config section. Fails without a token.
    pub fn from_config(config: &TelegramConfig) -> Result<Self, ChannelError> {
        let token = config
            .bot_token
            .clone()
            .ok_or_else(|| ChannelError::NotConfigured("TELEGRAM_BOT_TOKEN is not set".into()))?;
        Ok(Self::new(token, Duration::from_secs(config.timeout_secs))?
            .with_api_base(&config.api_base)
            .with_parse_mode(config.parse_mode.clone())
            .with_chunk_limit(config.chunk_limit))
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_parse_mode(mut self, parse_mode: Option<String>) -> Self {
        self.parse_mode = parse_mode;
        self
    }

    pub fn with_chunk_limit(mut self, limit: usize) -> Self {
        self.chunk_limit = limit;
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// Call a Bot API method and check both HTTP status and the `ok` flag.
    async fn call(&self, method: &str, body: &serde_json::Value) -> Result<(), ChannelError> {
        let failed = |reason: String| ChannelError::DeliveryFailed {
            channel: CHANNEL_NAME.into(),
            reason: format!("{method}: {reason}"),
        };

        let response = self
            .client
            .post(self.method_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        let envelope: Option<ApiResponse> = response.json().await.ok();

        match envelope {
            Some(ApiResponse { ok: true, .. }) if status.is_success() => Ok(()),
            Some(ApiResponse { description, .. }) => Err(failed(format!(
                "status {}: {}",
                status.as_u16(),
                description.unwrap_or_else(|| "no description".into())
            ))),
            None => Err(failed(format!("status {} with unreadable body", status.as_u16()))),
        }
    }

    /// Register the webhook URL Telegram should push updates to.
    pub async fn set_webhook(&self, url: &str, secret_token: Option<&str>) -> Result<(), ChannelError> {
        let mut body = serde_json::json!({
            "url": url,
            "allowed_updates": ["message", "edited_message", "channel_post"],
        });
        if let Some(secret) = secret_token {
            body["secret_token"] = serde_json::json!(secret);
        }
        self.call("setWebhook", &body).await?;
        info!(url, "Telegram webhook registered");
        Ok(())
    }

    fn message_body(&self, target: &ChatTarget, text: &str) -> serde_json::Value {
        let mut body = serde_json::json!({
            "chat_id": target.chat_id,
            "text": text,
        });
        if let Some(thread_id) = target.thread_id {
            body["message_thread_id"] = serde_json::json!(thread_id);
        }
        if let Some(reply_to) = target.reply_to {
            body["reply_to_message_id"] = serde_json::json!(reply_to);
            body["allow_sending_without_reply"] = serde_json::json!(true);
        }
        if let Some(mode) = &self.parse_mode {
            body["parse_mode"] = serde_json::json!(mode);
        }
        body
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    async fn send(&self, target: &ChatTarget, text: &str) -> Result<usize, ChannelError> {
        if target.is_unanchored_broadcast() {
            info!(chat_id = target.chat_id, "Skip sending: channel post without anchor");
            return Ok(0);
        }

        let chunks = split_message(text, self.chunk_limit);
        for (i, chunk) in chunks.iter().enumerate() {
            self.call("sendMessage", &self.message_body(target, chunk)).await?;
            debug!(chat_id = target.chat_id, chunk = i + 1, of = chunks.len(), "Chunk sent");
        }
        Ok(chunks.len())
    }

    async fn send_typing(&self, target: &ChatTarget) -> Result<(), ChannelError> {
        let mut body = serde_json::json!({
            "chat_id": target.chat_id,
            "action": "typing",
        });
        if let Some(thread_id) = target.thread_id {
            body["message_thread_id"] = serde_json::json!(thread_id);
        }
        self.call("sendChatAction", &body).await.inspect_err(|e| {
            warn!(error = %e, "Typing indicator failed");
        })
    }
}
