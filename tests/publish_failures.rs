mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use newsrelay::config::Config;
use newsrelay::dedup::IngestOutcome;
use newsrelay::models::{
    event, ChannelLimits, ItemEvent, ItemStatus, ItemUpdate, NewItem, PublicationStatus, Stage,
};
use newsrelay::pipeline::dlq;
use newsrelay::publish::{Channel, PublishRequest};
use newsrelay::retry::RetryPolicy;
use newsrelay::{AppError, Result};

use common::{harness_with, scripted_llm, sec_rumor, Harness};

/// Configured telegram stand-in: either the provider always answers 502 or every send lands.
struct Telegram {
    failing: bool,
    sends: AtomicUsize,
}

impl Telegram {
    fn failing() -> Arc<Self> {
        Arc::new(Self {
            failing: true,
            sends: AtomicUsize::new(0),
        })
    }

    fn healthy() -> Arc<Self> {
        Arc::new(Self {
            failing: false,
            sends: AtomicUsize::new(0),
        })
    }

    fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Channel for Telegram {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn is_configured(&self) -> bool {
        true
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(1, Duration::from_millis(1))
    }

    async fn send(&self, _request: &PublishRequest, index: usize, _text: &str) -> Result<Option<String>> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            Err(AppError::channel("telegram", "HTTP 502"))
        } else {
            Ok(Some(format!("m{index}")))
        }
    }
}

async fn setup(config: Config, channel: Arc<Telegram>) -> (Harness, i64) {
    let h = harness_with(scripted_llm(), config, vec![channel]).await;
    let ctx = h.ctx();
    let IngestOutcome::Inserted(item_id) = ctx.dedup.ingest(&ctx.repo, sec_rumor()).await.unwrap() else {
        panic!("expected insert");
    };
    (h, item_id)
}

#[tokio::test]
async fn channel_failures_retry_then_dead_letter_at_publish() {
    let telegram = Telegram::failing();
    let (h, item_id) = setup(Config::default(), telegram.clone()).await;
    let ctx = h.ctx();

    let first = h.pipeline.run_once(false, None).await.unwrap();
    assert_eq!((first.llm_draft, first.publish), (1, 0));
    let item = ctx.repo.get_item(item_id).await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Drafted);
    assert_eq!(item.retry_count, 1);
    assert!(item.last_error.as_deref().unwrap().contains("HTTP 502"));

    let rows = ctx.repo.publications_for_item(item_id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, PublicationStatus::Failed);

    for _ in 0..2 {
        h.pipeline.run_once(false, None).await.unwrap();
    }
    let item = ctx.repo.get_item(item_id).await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Dlq);
    assert_eq!(item.retry_count, 3);

    h.pipeline.run_once(false, None).await.unwrap();
    assert_eq!(telegram.sends(), 3);
    let entries = dlq::list(&ctx.repo, 10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!((entries[0].item_id, entries[0].stage, entries[0].attempts), (item_id, Stage::Publish, 3));

    let (_, status) = dlq::retry(&ctx.repo, entries[0].id).await.unwrap();
    assert_eq!(status, ItemStatus::Drafted);
}

#[tokio::test]
async fn open_breaker_counts_as_publish_failure() {
    let mut config = Config::default();
    config.breaker.failure_threshold = 1;
    let telegram = Telegram::failing();
    let (h, item_id) = setup(config, telegram.clone()).await;
    let ctx = h.ctx();

    h.pipeline.run_once(false, None).await.unwrap();
    h.pipeline.run_once(false, None).await.unwrap();

    let item = ctx.repo.get_item(item_id).await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Drafted);
    assert_eq!(item.retry_count, 2);
    assert!(item
        .last_error
        .as_deref()
        .unwrap()
        .contains("Circuit open for telegram"));
    // the second cycle never reached the provider
    assert_eq!(telegram.sends(), 1);
}

#[tokio::test]
async fn drafted_item_without_draft_fails() {
    let telegram = Telegram::healthy();
    let h = harness_with(scripted_llm(), Config::default(), vec![telegram.clone()]).await;
    let ctx = h.ctx();

    let item_id = ctx
        .repo
        .insert_item(
            NewItem {
                fingerprint: "orphan".into(),
                title: "Orphaned draft".into(),
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
    for (from, event) in [
        (ItemStatus::New, ItemEvent::Scored),
        (ItemStatus::Scored, ItemEvent::Drafted),
    ] {
        let update = ItemUpdate::transition(item_id, from, event).unwrap();
        ctx.repo.apply_item_updates(vec![update]).await.unwrap();
    }

    let run = h.pipeline.run_once(false, None).await.unwrap();
    assert_eq!(run.publish, 0);

    let item = ctx.repo.get_item(item_id).await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Failed);
    assert_eq!(item.last_error.as_deref(), Some("no draft data"));
    assert_eq!(telegram.sends(), 0);
}

#[tokio::test]
async fn rate_limited_item_stays_drafted_without_spending_a_retry() {
    let telegram = Telegram::healthy();
    let (h, item_id) = setup(Config::default(), telegram.clone()).await;
    let ctx = h.ctx();

    let mut settings = ctx.repo.get_settings().await.unwrap();
    settings.set_channel_limits(
        "telegram",
        ChannelLimits {
            per_minute: 0,
            per_hour: 100,
        },
    );
    ctx.repo.save_settings(settings).await.unwrap();

    let run = h.pipeline.run_once(false, None).await.unwrap();
    assert_eq!(run.publish, 0);

    let item = ctx.repo.get_item(item_id).await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Drafted);
    assert_eq!(item.retry_count, 0);
    assert!(item.last_error.is_none());
    assert_eq!(telegram.sends(), 0);
    assert!(ctx.repo.publications_for_item(item_id).await.unwrap().is_empty());

    let events = ctx
        .repo
        .events(Some(event::RATE_LIMIT_EXCEEDED.into()), 10)
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    let payload = events[0].payload.as_ref().unwrap();
    assert_eq!(payload["item_id"], item_id);
    assert_eq!(payload["channel"], "telegram");
    assert_eq!(payload["limit"], 0);
}

#[tokio::test]
async fn paused_live_cycle_is_blocked_and_logged() {
    let telegram = Telegram::healthy();
    let (h, item_id) = setup(Config::default(), telegram.clone()).await;
    let ctx = h.ctx();

    let mut settings = ctx.repo.get_settings().await.unwrap();
    settings.set_pause(true);
    ctx.repo.save_settings(settings).await.unwrap();

    let run = h.pipeline.run_once(false, None).await.unwrap();
    assert_eq!(run.publish, 0);
    assert_eq!(telegram.sends(), 0);

    let item = ctx.repo.get_item(item_id).await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Drafted);
    assert_eq!(item.retry_count, 0);

    let blocked = ctx
        .repo
        .events(Some(event::PUBLISH_BLOCKED.into()), 10)
        .await
        .unwrap();
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].payload.as_ref().unwrap()["reason"], "pause_all_publish");

    let mut settings = ctx.repo.get_settings().await.unwrap();
    settings.set_pause(false);
    ctx.repo.save_settings(settings).await.unwrap();
    let run = h.pipeline.run_once(false, None).await.unwrap();
    assert_eq!(run.publish, 1);
    assert_eq!(telegram.sends(), 1);
    let item = ctx.repo.get_item(item_id).await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Published);
}
