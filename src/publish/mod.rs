pub mod make;
pub mod telegram;
pub mod whatsapp;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::breaker::BreakerRegistry;
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::{event, NewPublication, PublicationStatus, Settings, Template};
use crate::retry::{run_with_retry, RetryPolicy};

pub use make::MakeChannel;
pub use telegram::TelegramChannel;
pub use whatsapp::WhatsAppChannel;

/// Joins rendered parts wherever they travel or are stored as a single text.
pub const PART_SEPARATOR: &str = "\n---\n";

/// Everything a channel needs to deliver one item.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub item_id: i64,
    pub template: Template,
    pub priority: Option<u8>,
    pub source: Option<String>,
    pub url: Option<String>,
    /// Rendered messages, already split to the render budget.
    pub parts: Vec<String>,
}

impl PublishRequest {
    pub fn joined_text(&self) -> String {
        self.parts.join(PART_SEPARATOR)
    }

    pub fn meta(&self) -> serde_json::Value {
        json!({
            "source": self.source.as_deref().unwrap_or(""),
            "url": self.url.as_deref().unwrap_or(""),
            "item_id": self.item_id,
        })
    }
}

/// Result of one channel's delivery, mirrored by its publication row.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub channel: String,
    pub publication_id: i64,
    pub status: PublicationStatus,
    pub external_id: Option<String>,
    pub attempts: u32,
    pub error: Option<String>,
    /// Index of the message that could not be sent.
    pub failed_part: Option<usize>,
}

impl Delivery {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

#[async_trait]
pub trait Channel: Send + Sync {
    /// Name used for publications, breakers, rate limits and feature flags.
    fn name(&self) -> &'static str;

    /// An unconfigured channel runs as dry-run.
    fn is_configured(&self) -> bool;

    fn retry_policy(&self) -> RetryPolicy;

    /// Groups the rendered parts into the messages this channel sends.
    fn messages(&self, request: &PublishRequest) -> Vec<String> {
        request.parts.clone()
    }

    /// Sends one message; returns the provider's id for it, if any.
    async fn send(&self, request: &PublishRequest, index: usize, text: &str) -> Result<Option<String>>;

    /// Publication status once retries are exhausted. Sends refused by an open breaker are
    /// recorded as failed instead.
    fn exhausted_status(&self) -> PublicationStatus {
        PublicationStatus::Failed
    }

    /// Extra audit records after the publication row is written.
    async fn after_delivery(
        &self,
        _repo: &Repository,
        _request: &PublishRequest,
        _delivery: &Delivery,
    ) -> Result<()> {
        Ok(())
    }
}

pub struct PublishContext<'a> {
    pub repo: &'a Repository,
    pub breakers: &'a BreakerRegistry,
    pub dry_run: bool,
}

pub fn ensure_publish_allowed(settings: &Settings) -> Result<()> {
    if settings.pause_all_publish {
        return Err(AppError::PublishPaused);
    }
    Ok(())
}

/// Audit trail for a paused cycle: one event and a blocked publication per channel.
pub async fn record_blocked(repo: &Repository, channels: &[&str]) -> Result<()> {
    repo.log_event(
        event::PUBLISH_BLOCKED,
        json!({"reason": "pause_all_publish", "message": "publish blocked by pause"}),
    )
    .await?;
    for channel in channels {
        let mut publication = NewPublication::new(None, channel, PublicationStatus::Blocked);
        publication.published_at = Some(Utc::now());
        repo.insert_publication(publication).await?;
    }
    warn!(channels = channels.len(), "publishing paused, cycle blocked");
    Ok(())
}

/// Sends every message of `request` through `channel`, each with retry inside the channel's
/// breaker, and writes exactly one publication row for the whole send.
pub async fn deliver(
    channel: &dyn Channel,
    ctx: &PublishContext<'_>,
    request: &PublishRequest,
) -> Result<Delivery> {
    let name = channel.name();
    let messages = channel.messages(request);

    if ctx.dry_run || !channel.is_configured() {
        let mut publication = NewPublication::new(Some(request.item_id), name, PublicationStatus::DryRun);
        publication.published_at = Some(Utc::now());
        let publication_id = ctx.repo.insert_publication(publication).await?;
        info!(item_id = request.item_id, channel = name, parts = messages.len(), "dry run, not sent");
        let delivery = Delivery {
            channel: name.to_string(),
            publication_id,
            status: PublicationStatus::DryRun,
            external_id: None,
            attempts: 0,
            error: None,
            failed_part: None,
        };
        channel.after_delivery(ctx.repo, request, &delivery).await?;
        return Ok(delivery);
    }

    let breaker = ctx.breakers.get(name);
    let policy = channel.retry_policy();
    let mut ids = Vec::new();
    let mut attempts = 0;
    let mut failure = None;

    for (index, text) in messages.iter().enumerate() {
        let breaker = &breaker;
        let text = text.as_str();
        let outcome = run_with_retry(&policy, || async move {
            breaker.call(|| channel.send(request, index, text)).await
        })
        .await;
        attempts = outcome.attempts;
        match outcome.result {
            Ok(id) => ids.extend(id),
            Err(e) => {
                failure = Some((index, e));
                break;
            }
        }
    }

    let (status, error, failed_part) = match failure {
        None => (PublicationStatus::Sent, None, None),
        Some((index, e)) => {
            warn!(item_id = request.item_id, channel = name, attempts, error = %e, "delivery failed");
            // A short-circuited send never reached the provider, so it is not exhausted.
            let status = if e.is_retryable() {
                channel.exhausted_status()
            } else {
                PublicationStatus::Failed
            };
            (status, Some(e.to_string()), Some(index))
        }
    };
    let external_id = (!ids.is_empty() && error.is_none()).then(|| ids.join(","));

    let publication = NewPublication {
        item_id: Some(request.item_id),
        channel: name.to_string(),
        status,
        external_id: external_id.clone(),
        attempts,
        published_at: Some(Utc::now()),
    };
    let publication_id = ctx.repo.insert_publication(publication).await?;
    if error.is_none() {
        info!(item_id = request.item_id, channel = name, attempts, "delivered");
    }

    let delivery = Delivery {
        channel: name.to_string(),
        publication_id,
        status,
        external_id,
        attempts,
        error,
        failed_part,
    };
    channel.after_delivery(ctx.repo, request, &delivery).await?;
    Ok(delivery)
}

/// Shortens provider error bodies for logs and error messages.
pub(crate) fn excerpt(body: &str, max: usize) -> String {
    body.chars().take(max).collect()
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::config::BreakerConfig;
    use crate::kv::MemoryKv;
    use crate::models::{NewItem, ItemStatus};
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, Repository, BreakerRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::new(dir.path().join("p.db").to_str().unwrap())
            .await
            .unwrap();
        let item = NewItem {
            fingerprint: "fp".into(),
            title: "t".into(),
            url: None,
            summary: None,
            source_name: None,
            source_type: "rss".into(),
            published_at: None,
        };
        repo.insert_item(item, Utc::now()).await.unwrap();
        let breakers = BreakerRegistry::new(Arc::new(MemoryKv::new()), &BreakerConfig::default());
        (dir, repo, breakers)
    }

    #[tokio::test]
    async fn sends_every_part_and_joins_ids() {
        let (_dir, repo, breakers) = setup().await;
        let ctx = PublishContext { repo: &repo, breakers: &breakers, dry_run: false };
        let channel = FakeChannel::new(
            "telegram",
            vec![
                Err(AppError::channel("telegram", "timeout")),
                Ok(Some("10".into())),
                Ok(Some("11".into())),
            ],
        );

        let delivery = deliver(&channel, &ctx, &request(&["one", "two"])).await.unwrap();
        assert_eq!(delivery.status, PublicationStatus::Sent);
        assert_eq!(delivery.external_id.as_deref(), Some("10,11"));
        assert_eq!(channel.sent.lock().unwrap().as_slice(), ["one", "one", "two"]);

        let rows = repo.publications_for_item(1).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].external_id.as_deref(), Some("10,11"));
    }

    #[tokio::test]
    async fn exhausted_retries_fail_with_one_row() {
        let (_dir, repo, breakers) = setup().await;
        let ctx = PublishContext { repo: &repo, breakers: &breakers, dry_run: false };
        let channel = FakeChannel::new(
            "whatsapp_web",
            (0..3).map(|_| Err(AppError::channel("whatsapp_web", "502"))).collect(),
        );

        let delivery = deliver(&channel, &ctx, &request(&["only"])).await.unwrap();
        assert_eq!(delivery.status, PublicationStatus::Failed);
        assert_eq!(delivery.attempts, 3);
        assert_eq!(delivery.failed_part, Some(0));
        assert!(delivery.error.unwrap().contains("502"));
        assert_eq!(repo.publications_for_item(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dry_run_and_unconfigured_skip_the_network() {
        let (_dir, repo, breakers) = setup().await;
        let ctx = PublishContext { repo: &repo, breakers: &breakers, dry_run: true };
        let channel = FakeChannel::new("telegram", vec![]);
        let delivery = deliver(&channel, &ctx, &request(&["x"])).await.unwrap();
        assert_eq!(delivery.status, PublicationStatus::DryRun);
        assert_eq!(delivery.attempts, 0);

        let live = PublishContext { repo: &repo, breakers: &breakers, dry_run: false };
        let mut unconfigured = FakeChannel::new("make", vec![]);
        unconfigured.configured = false;
        let delivery = deliver(&unconfigured, &live, &request(&["x"])).await.unwrap();
        assert_eq!(delivery.status, PublicationStatus::DryRun);
        assert!(channel.sent.lock().unwrap().is_empty());
        assert!(unconfigured.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn pause_blocks_and_records_without_touching_items() {
        let (_dir, repo, _breakers) = setup().await;
        let settings = Settings {
            pause_all_publish: true,
            ..repo.get_settings().await.unwrap()
        };
        assert!(matches!(ensure_publish_allowed(&settings), Err(AppError::PublishPaused)));

        record_blocked(&repo, &["telegram", "make"]).await.unwrap();
        let events = repo.events(Some(event::PUBLISH_BLOCKED.into()), 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload.as_ref().unwrap()["reason"], "pause_all_publish");
        assert_eq!(repo.get_item(1).await.unwrap().unwrap().status, ItemStatus::New);
    }
}
