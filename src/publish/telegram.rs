use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{excerpt, Channel, PublishRequest};
use crate::breaker;
use crate::config::{RetryConfig, TelegramConfig};
use crate::error::{AppError, Result};
use crate::render::fit_to_limit;
use crate::retry::RetryPolicy;

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    ok: bool,
    result: Option<SentMessage>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

/// Bot API `sendMessage`, one call per message part.
pub struct TelegramChannel {
    client: Client,
    api_base: String,
    bot_token: Option<String>,
    chat_id: Option<String>,
    max_message_chars: usize,
    retry: RetryPolicy,
}

impl TelegramChannel {
    pub fn new(config: &TelegramConfig, retry: &RetryConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone().filter(|t| !t.trim().is_empty()),
            chat_id: config.chat_id.clone().filter(|c| !c.trim().is_empty()),
            max_message_chars: config.max_message_chars,
            retry: RetryPolicy::new(retry.max_attempts, Duration::from_millis(retry.backoff_base_ms)),
        })
    }

    fn endpoint(&self, token: &str) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, token)
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &'static str {
        breaker::TELEGRAM
    }

    fn is_configured(&self) -> bool {
        self.bot_token.is_some() && self.chat_id.is_some()
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Parts over the wire limit are split again.
    fn messages(&self, request: &PublishRequest) -> Vec<String> {
        fit_to_limit(&request.parts, self.max_message_chars)
    }

    async fn send(&self, _request: &PublishRequest, _index: usize, text: &str) -> Result<Option<String>> {
        let (Some(token), Some(chat_id)) = (&self.bot_token, &self.chat_id) else {
            return Err(AppError::channel(self.name(), "bot token or chat id not configured"));
        };

        let response = self
            .client
            .post(self.endpoint(token))
            .json(&SendMessageRequest { chat_id, text })
            .send()
            .await
            .map_err(|e| AppError::channel(self.name(), e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::channel(self.name(), e.to_string()))?;
        let parsed: Option<SendMessageResponse> = serde_json::from_str(&body).ok();

        match parsed {
            Some(SendMessageResponse {
                ok: true,
                result: Some(message),
                ..
            }) if status.is_success() => Ok(Some(message.message_id.to_string())),
            Some(SendMessageResponse {
                description: Some(description),
                ..
            }) => Err(AppError::channel(
                self.name(),
                format!("HTTP {status}: {description}"),
            )),
            _ => Err(AppError::channel(
                self.name(),
                format!("HTTP {status}: {}", excerpt(&body, 200)),
            )),
        }
    }
}
