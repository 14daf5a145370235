//! Operator actions on dead-lettered items.

use tracing::info;

use crate::db::Repository;
use crate::error::Result;
use crate::models::{DeadLetter, ItemStatus};

pub async fn list(repo: &Repository, limit: usize) -> Result<Vec<DeadLetter>> {
    repo.list_dead_letters(limit).await
}

/// Puts the item back in front of the stage that failed, with a fresh retry budget, and
/// removes the entry. Returns the entry and the item's new status.
pub async fn retry(repo: &Repository, id: i64) -> Result<(DeadLetter, ItemStatus)> {
    let (entry, status) = repo.requeue_dead_letter(id).await?;
    info!(dlq_id = id, item_id = entry.item_id, stage = %entry.stage, %status, "dead letter requeued");
    Ok((entry, status))
}

/// Gives up on the item: status failed, entry removed.
pub async fn drop(repo: &Repository, id: i64) -> Result<DeadLetter> {
    let entry = repo.drop_dead_letter(id).await?;
    info!(dlq_id = id, item_id = entry.item_id, stage = %entry.stage, "dead letter dropped");
    Ok(entry)
}
