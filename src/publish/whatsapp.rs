use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{excerpt, Channel, PublishRequest};
use crate::breaker;
use crate::config::{RetryConfig, WhatsAppConfig};
use crate::error::{AppError, Result};
use crate::retry::RetryPolicy;

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    text: &'a str,
    idempotency_key: String,
    meta: Value,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    message_ids: Vec<Value>,
    error: Option<String>,
}

/// Internal WhatsApp bridge: `POST {base}/send`. The bridge splits long text itself, so the
/// rendered parts go out as one message.
pub struct WhatsAppChannel {
    client: Client,
    base_url: Option<String>,
    retry: RetryPolicy,
}

impl WhatsAppChannel {
    pub fn new(config: &WhatsAppConfig, retry: &RetryConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config
                .base_url
                .as_deref()
                .map(|u| u.trim().trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty()),
            retry: RetryPolicy::new(retry.max_attempts, Duration::from_millis(retry.backoff_base_ms)),
        })
    }
}

/// The bridge drops a repeated key, so a retried send never posts twice.
pub fn idempotency_key(request: &PublishRequest) -> String {
    format!("{}:{}:{}", breaker::WHATSAPP_WEB, request.item_id, request.template)
}

fn join_ids(ids: &[Value]) -> Option<String> {
    let ids: Vec<String> = ids
        .iter()
        .map(|id| match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    (!ids.is_empty()).then(|| ids.join(","))
}

#[async_trait]
impl Channel for WhatsAppChannel {
    fn name(&self) -> &'static str {
        breaker::WHATSAPP_WEB
    }

    fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn messages(&self, request: &PublishRequest) -> Vec<String> {
        vec![request.joined_text()]
    }

    async fn send(&self, request: &PublishRequest, _index: usize, text: &str) -> Result<Option<String>> {
        let Some(base_url) = &self.base_url else {
            return Err(AppError::channel(self.name(), "bridge URL not configured"));
        };
        let body = SendRequest {
            text,
            idempotency_key: idempotency_key(request),
            meta: request.meta(),
        };

        let response = self
            .client
            .post(format!("{base_url}/send"))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::channel(self.name(), e.to_string()))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|e| AppError::channel(self.name(), e.to_string()))?;
        let parsed: Option<SendResponse> = serde_json::from_str(&raw).ok();

        match parsed {
            Some(reply) if reply.ok && status == reqwest::StatusCode::OK => Ok(join_ids(&reply.message_ids)),
            Some(SendResponse {
                error: Some(error), ..
            }) => Err(AppError::channel(self.name(), format!("HTTP {status}: {error}"))),
            _ => Err(AppError::channel(
                self.name(),
                format!("HTTP {status}: {}", excerpt(&raw, 500)),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Template;
    use crate::publish::testing::request;
    use serde_json::json;

    #[test]
    fn key_is_stable_per_item_and_template() {
        let mut req = request(&["a"]);
        assert_eq!(idempotency_key(&req), "whatsapp_web:1:ANALISE_INTEL");
        req.template = Template::FlashSetorial;
        assert_eq!(idempotency_key(&req), "whatsapp_web:1:FLASH_SETORIAL");
    }

    #[test]
    fn parts_go_out_as_one_message() {
        let ch = WhatsAppChannel::new(
            &WhatsAppConfig {
                base_url: Some("http://bridge:3100/".into()),
                ..WhatsAppConfig::default()
            },
            &RetryConfig::default(),
        )
        .unwrap();
        assert!(ch.is_configured());
        assert_eq!(ch.messages(&request(&["a", "b"])), vec!["a\n---\nb".to_string()]);
    }

    #[test]
    fn blank_url_means_unconfigured() {
        let ch = WhatsAppChannel::new(
            &WhatsAppConfig {
                base_url: Some("  ".into()),
                ..WhatsAppConfig::default()
            },
            &RetryConfig::default(),
        )
        .unwrap();
        assert!(!ch.is_configured());
    }

    #[test]
    fn message_ids_are_joined() {
        assert_eq!(join_ids(&[json!("a1")]).as_deref(), Some("a1"));
        assert_eq!(join_ids(&[json!("a1"), json!(7)]).as_deref(), Some("a1,7"));
        assert_eq!(join_ids(&[]), None);
    }
}
