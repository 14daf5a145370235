use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{excerpt, Channel, Delivery, PublishRequest};
use crate::breaker;
use crate::config::MakeConfig;
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::{event, PublicationStatus, Template};
use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize)]
struct WebhookReply {
    id: Option<Value>,
}

/// Make webhook that forwards to WhatsApp. One POST per message part; exhausted retries end
/// as a dead-letter publication.
pub struct MakeChannel {
    client: Client,
    webhook_url: Option<String>,
    retry: RetryPolicy,
}

impl MakeChannel {
    pub fn new(config: &MakeConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            webhook_url: config
                .webhook_url
                .as_deref()
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(String::from),
            retry: RetryPolicy::new(config.max_attempts, Duration::from_millis(config.backoff_base_ms)),
        })
    }
}

/// Webhook body `{channel, text, template, priority, meta}`. The scenario only knows the two
/// fixed layouts, so the default template goes out as ANALISE_INTEL.
pub fn webhook_payload(request: &PublishRequest, text: &str) -> Value {
    let template = match request.template {
        Template::Default => Template::AnaliseIntel,
        other => other,
    };
    json!({
        "channel": "whatsapp",
        "text": text,
        "template": template.as_str(),
        "priority": format!("P{}", request.priority.unwrap_or(2)),
        "meta": request.meta(),
    })
}

#[async_trait]
impl Channel for MakeChannel {
    fn name(&self) -> &'static str {
        breaker::MAKE
    }

    fn is_configured(&self) -> bool {
        self.webhook_url.is_some()
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn exhausted_status(&self) -> PublicationStatus {
        PublicationStatus::DeadLetter
    }

    async fn send(&self, request: &PublishRequest, _index: usize, text: &str) -> Result<Option<String>> {
        let Some(url) = &self.webhook_url else {
            return Err(AppError::channel(self.name(), "webhook URL not configured"));
        };

        let response = self
            .client
            .post(url)
            .json(&webhook_payload(request, text))
            .send()
            .await
            .map_err(|e| AppError::channel(self.name(), e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(AppError::channel(
                self.name(),
                format!("HTTP {status}: {}", excerpt(&body, 200)),
            ));
        }

        let id = serde_json::from_str::<WebhookReply>(&body)
            .ok()
            .and_then(|reply| reply.id)
            .map(|id| match id {
                Value::String(s) => s,
                other => other.to_string(),
            });
        Ok(id)
    }

    async fn after_delivery(
        &self,
        repo: &Repository,
        request: &PublishRequest,
        delivery: &Delivery,
    ) -> Result<()> {
        match delivery.status {
            PublicationStatus::DryRun => {
                for (i, part) in request.parts.iter().enumerate() {
                    info!(
                        item_id = request.item_id,
                        part = i + 1,
                        total = request.parts.len(),
                        payload = %webhook_payload(request, part),
                        "make dry run"
                    );
                }
                repo.log_event(
                    event::MAKE_DRY_RUN,
                    json!({"item_id": request.item_id, "parts": request.parts.len()}),
                )
                .await?;
            }
            PublicationStatus::Sent => {
                repo.log_event(
                    event::MAKE_PUBLISH_SUCCESS,
                    json!({
                        "item_id": request.item_id,
                        "publication_id": delivery.publication_id,
                        "attempts": delivery.attempts,
                        "external_id": delivery.external_id,
                    }),
                )
                .await?;
            }
            _ => {
                let text = delivery
                    .failed_part
                    .and_then(|i| request.parts.get(i))
                    .map(String::as_str)
                    .unwrap_or("");
                let payload = webhook_payload(request, text);
                let error = delivery.error.as_deref().unwrap_or("unknown");
                repo.log_event(
                    event::MAKE_PUBLISH_FAILURE,
                    json!({
                        "item_id": request.item_id,
                        "attempts": delivery.attempts,
                        "error": error,
                        "payload": payload,
                    }),
                )
                .await?;
                if delivery.status == PublicationStatus::DeadLetter {
                    repo.log_event(
                        event::MAKE_DEAD_LETTER,
                        json!({"payload": payload, "attempts": delivery.attempts, "last_error": error}),
                    )
                    .await?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerRegistry;
    use crate::config::BreakerConfig;
    use crate::kv::MemoryKv;
    use crate::models::NewItem;
    use crate::publish::testing::request;
    use crate::publish::{deliver, PublishContext};
    use chrono::Utc;
    use std::sync::Arc;

    #[test]
    fn payload_shape_and_defaults() {
        let mut req = request(&["texto"]);
        let payload = webhook_payload(&req, "texto");
        assert_eq!(payload["channel"], "whatsapp");
        assert_eq!(payload["template"], "ANALISE_INTEL");
        assert_eq!(payload["priority"], "P1");
        assert_eq!(payload["meta"]["source"], "Reuters");
        assert_eq!(payload["meta"]["item_id"], 1);

        req.priority = None;
        req.template = Template::Default;
        req.source = None;
        let payload = webhook_payload(&req, "texto");
        assert_eq!(payload["priority"], "P2");
        assert_eq!(payload["template"], "ANALISE_INTEL");
        assert_eq!(payload["meta"]["source"], "");
    }

    async fn repo_with_item() -> (tempfile::TempDir, Repository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::new(dir.path().join("m.db").to_str().unwrap())
            .await
            .unwrap();
        repo.insert_item(
            NewItem {
                fingerprint: "fp".into(),
                title: "t".into(),
                url: None,
                summary: None,
                source_name: None,
                source_type: "rss".into(),
                published_at: None,
            },
            Utc::now(),
        )
        .await
        .unwrap();
        (dir, repo)
    }

    #[tokio::test]
    async fn unconfigured_webhook_logs_dry_run_event() {
        let (_dir, repo) = repo_with_item().await;
        let breakers = BreakerRegistry::new(Arc::new(MemoryKv::new()), &BreakerConfig::default());
        let ctx = PublishContext { repo: &repo, breakers: &breakers, dry_run: false };

        let channel = MakeChannel::new(&MakeConfig::default()).unwrap();
        let delivery = deliver(&channel, &ctx, &request(&["a", "b"])).await.unwrap();
        assert_eq!(delivery.status, PublicationStatus::DryRun);

        let events = repo.events(Some(event::MAKE_DRY_RUN.into()), 5).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload.as_ref().unwrap()["parts"], 2);
    }

    #[tokio::test]
    async fn exhausted_retries_dead_letter_with_events() {
        let (_dir, repo) = repo_with_item().await;
        let breakers = BreakerRegistry::new(Arc::new(MemoryKv::new()), &BreakerConfig::default());
        let ctx = PublishContext { repo: &repo, breakers: &breakers, dry_run: false };

        // nothing listens on port 9 of localhost, so every attempt fails fast
        let config = MakeConfig {
            webhook_url: Some("http://127.0.0.1:9/hook".into()),
            timeout_secs: 2,
            max_attempts: 2,
            backoff_base_ms: 1,
        };
        let channel = MakeChannel::new(&config).unwrap();
        let delivery = deliver(&channel, &ctx, &request(&["a"])).await.unwrap();

        assert_eq!(delivery.status, PublicationStatus::DeadLetter);
        assert_eq!(delivery.attempts, 2);
        let failures = repo.events(Some(event::MAKE_PUBLISH_FAILURE.into()), 5).await.unwrap();
        let dead = repo.events(Some(event::MAKE_DEAD_LETTER.into()), 5).await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].payload.as_ref().unwrap()["payload"]["text"], "a");
    }

    #[tokio::test]
    async fn open_breaker_fails_without_dead_letter() {
        let (_dir, repo) = repo_with_item().await;
        let breakers = BreakerRegistry::new(
            Arc::new(MemoryKv::new()),
            &BreakerConfig {
                failure_threshold: 1,
                recovery_timeout_secs: 60.0,
            },
        );
        breakers
            .get(breaker::MAKE)
            .call(|| async { Err::<(), _>(AppError::channel("make", "HTTP 500")) })
            .await
            .ok();
        let ctx = PublishContext { repo: &repo, breakers: &breakers, dry_run: false };

        let config = MakeConfig {
            webhook_url: Some("http://127.0.0.1:9/hook".into()),
            timeout_secs: 2,
            max_attempts: 3,
            backoff_base_ms: 1,
        };
        let channel = MakeChannel::new(&config).unwrap();
        let delivery = deliver(&channel, &ctx, &request(&["a"])).await.unwrap();

        assert_eq!(delivery.status, PublicationStatus::Failed);
        assert_eq!(delivery.attempts, 1);
        assert!(delivery.error.unwrap().contains("Circuit open"));
        let failures = repo.events(Some(event::MAKE_PUBLISH_FAILURE.into()), 5).await.unwrap();
        let dead = repo.events(Some(event::MAKE_DEAD_LETTER.into()), 5).await.unwrap();
        assert_eq!(failures.len(), 1);
        assert!(dead.is_empty());
    }
}
