mod common;

use std::sync::Arc;

use newsrelay::dedup::IngestOutcome;
use newsrelay::models::{ItemStatus, Stage};
use newsrelay::pipeline::dlq;

use common::{harness, sec_rumor, DownLlm};

#[tokio::test]
async fn failing_drafts_dead_letter_once_then_requeue() {
    let h = harness(Arc::new(DownLlm)).await;
    let ctx = h.ctx();
    let IngestOutcome::Inserted(item_id) = ctx.dedup.ingest(&ctx.repo, sec_rumor()).await.unwrap() else {
        panic!("expected insert");
    };

    let first = h.pipeline.run_once(false, None).await.unwrap();
    assert_eq!((first.scoring, first.llm_draft), (1, 0));
    let item = ctx.repo.get_item(item_id).await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Scored);
    assert_eq!(item.retry_count, 1);
    assert!(item.last_error.as_deref().unwrap().contains("503"));

    for _ in 0..2 {
        h.pipeline.run_once(false, None).await.unwrap();
    }
    let item = ctx.repo.get_item(item_id).await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Dlq);
    assert_eq!(item.retry_count, 3);

    // A dead-lettered item is out of every stage.
    h.pipeline.run_once(false, None).await.unwrap();
    let entries = dlq::list(&ctx.repo, 10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].item_id, item_id);
    assert_eq!(entries[0].stage, Stage::LlmDraft);
    assert_eq!(entries[0].attempts, 3);

    let (_, status) = dlq::retry(&ctx.repo, entries[0].id).await.unwrap();
    assert_eq!(status, ItemStatus::Scored);
    let item = ctx.repo.get_item(item_id).await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Scored);
    assert_eq!(item.retry_count, 0);
    assert!(dlq::list(&ctx.repo, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn dropped_entry_fails_the_item() {
    let h = harness(Arc::new(DownLlm)).await;
    let ctx = h.ctx();
    let IngestOutcome::Inserted(item_id) = ctx.dedup.ingest(&ctx.repo, sec_rumor()).await.unwrap() else {
        panic!("expected insert");
    };
    for _ in 0..3 {
        h.pipeline.run_once(false, None).await.unwrap();
    }

    let entry = dlq::list(&ctx.repo, 10).await.unwrap().remove(0);
    dlq::drop(&ctx.repo, entry.id).await.unwrap();

    let item = ctx.repo.get_item(item_id).await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Failed);
    assert!(dlq::list(&ctx.repo, 10).await.unwrap().is_empty());
}
