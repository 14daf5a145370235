//! The item state machine, one stage at a time: score new items, draft scored items with the
//! LLM, publish drafted items to every enabled channel.

pub mod dlq;
pub mod scheduler;

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::breaker;
use crate::cache::score_key;
use crate::context::AppContext;
use crate::db::{Repository, StageCommit};
use crate::error::{AppError, Result};
use crate::models::{
    event, Draft, Item, ItemEvent, ItemStatus, ItemUpdate, NewDeadLetter, NewDraft, ScoreResult,
    Settings, Stage, Template,
};
use crate::publish::{self, Channel, PublishContext, PublishRequest};
use crate::ratelimit::ChannelLimits;
use crate::render;

const MAX_ERROR_CHARS: usize = 500;

/// Counts of items that advanced in each stage of one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineRun {
    pub scoring: usize,
    pub llm_draft: usize,
    pub publish: usize,
    pub dry_run: bool,
}

/// How a single item left the publish stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PublishResult {
    Published,
    /// Kept in drafted, quota exhausted for this cycle.
    RateLimited,
    Retrying,
    DeadLettered,
    MissingDraft,
    /// Status moved on under us; nothing written.
    Skipped,
}

pub struct Pipeline {
    ctx: Arc<AppContext>,
}

impl Pipeline {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    /// One full cycle. `item_ids` restricts every stage to those items.
    pub async fn run_once(&self, dry_run: bool, item_ids: Option<Vec<i64>>) -> Result<PipelineRun> {
        let dry_run = dry_run || self.ctx.config.dry_run;
        let limits = &self.ctx.config.pipeline;

        let run = PipelineRun {
            scoring: self.step_scoring(limits.scoring_batch, item_ids.clone()).await?,
            llm_draft: self.step_llm_draft(limits.llm_batch, item_ids.clone()).await?,
            publish: self.step_publish(limits.publish_batch, item_ids, dry_run).await?,
            dry_run,
        };
        info!(
            scoring = run.scoring,
            llm_draft = run.llm_draft,
            publish = run.publish,
            dry_run,
            "pipeline cycle finished"
        );
        Ok(run)
    }

    /// new -> scored. Pure rules, cached by fingerprint.
    pub async fn step_scoring(&self, limit: usize, item_ids: Option<Vec<i64>>) -> Result<usize> {
        let items = self
            .ctx
            .repo
            .items_by_status(ItemStatus::New, limit, item_ids)
            .await?;
        if items.is_empty() {
            return Ok(0);
        }

        let mut updates = Vec::with_capacity(items.len());
        for item in &items {
            let key = score_key(&item.fingerprint);
            let score = match self.ctx.cache.get::<ScoreResult>(&key).await {
                Some(score) => score,
                None => {
                    let score = self.ctx.rules.score(
                        &item.title,
                        item.summary.as_deref(),
                        item.source_name.as_deref(),
                    );
                    self.ctx.cache.set(&key, &score).await;
                    score
                }
            };
            debug!(item_id = item.id, priority = score.priority, template = %score.template, "scored");
            updates.push(ItemUpdate::transition(item.id, ItemStatus::New, ItemEvent::Scored)?.score(score));
        }

        let applied = self.ctx.repo.apply_item_updates(updates).await?;
        info!(applied, "scoring step done");
        Ok(applied)
    }

    /// scored -> drafted, or back to scored / dead-lettered on failure.
    pub async fn step_llm_draft(&self, limit: usize, item_ids: Option<Vec<i64>>) -> Result<usize> {
        let items = self
            .ctx
            .repo
            .items_by_status(ItemStatus::Scored, limit, item_ids)
            .await?;
        if items.is_empty() {
            return Ok(0);
        }

        let llm_breaker = self.ctx.breakers.get(breaker::LLM);
        let mut drafted = Vec::new();
        let mut failed = Vec::new();

        for item in &items {
            let outcome = llm_breaker
                .call(|| {
                    self.ctx.llm.draft(
                        &item.title,
                        item.summary.as_deref(),
                        item.source_name.as_deref(),
                        item.risk.as_deref(),
                    )
                })
                .await;

            match outcome {
                Ok(outcome) => {
                    info!(item_id = item.id, template = %outcome.template, "draft generated");
                    let update = ItemUpdate::transition(item.id, ItemStatus::Scored, ItemEvent::Drafted)?
                        .template(outcome.template)
                        .clear_error();
                    drafted.push(StageCommit {
                        update,
                        draft: Some(NewDraft {
                            item_id: item.id,
                            payload: outcome.payload,
                        }),
                        dead_letter: None,
                    });
                }
                Err(e) => {
                    warn!(item_id = item.id, error = %e, "draft failed");
                    failed.push(self.failure_commit(item, Stage::LlmDraft, &e.to_string())?);
                }
            }
        }

        self.ctx.repo.commit_stage(failed).await?;
        let applied = self.ctx.repo.commit_stage(drafted).await?;
        info!(applied, "llm draft step done");
        Ok(applied)
    }

    /// drafted -> published, fanned out over a bounded pool of workers.
    pub async fn step_publish(
        &self,
        limit: usize,
        item_ids: Option<Vec<i64>>,
        dry_run: bool,
    ) -> Result<usize> {
        let items = self
            .ctx
            .repo
            .items_by_status(ItemStatus::Drafted, limit, item_ids)
            .await?;
        if items.is_empty() {
            return Ok(0);
        }

        let settings = self.ctx.repo.get_settings().await?;
        let channels: Vec<Arc<dyn Channel>> = self
            .ctx
            .channels
            .iter()
            .filter(|c| settings.channel_enabled(c.name()))
            .cloned()
            .collect();

        if let Err(e) = publish::ensure_publish_allowed(&settings) {
            info!(error = %e, items = items.len(), "publish step skipped");
            let names: Vec<&str> = channels.iter().map(|c| c.name()).collect();
            publish::record_blocked(&self.ctx.repo, &names).await?;
            return Ok(0);
        }

        let mut drafts = self
            .ctx
            .repo
            .latest_drafts_for(items.iter().map(|i| i.id).collect())
            .await?;
        let jobs: Vec<(Item, Option<Draft>)> = items
            .into_iter()
            .map(|item| {
                let draft = drafts.remove(&item.id);
                (item, draft)
            })
            .collect();

        let workers = self.ctx.config.pipeline.publish_max_workers.max(1).min(jobs.len());
        let mut connections = Vec::with_capacity(workers);
        for _ in 0..workers {
            connections.push(self.ctx.repo.reopen().await?);
        }

        let results: Vec<(i64, Result<PublishResult>)> = stream::iter(jobs.into_iter().enumerate())
            .map(|(slot, (item, draft))| {
                let repo = &connections[slot % workers];
                let settings = &settings;
                let channels = &channels;
                async move {
                    let id = item.id;
                    (id, self.publish_item(repo, item, draft, settings, channels, dry_run).await)
                }
            })
            .buffer_unordered(workers)
            .collect()
            .await;

        let mut published = 0;
        let mut first_error = None;
        for (item_id, result) in results {
            match result {
                Ok(PublishResult::Published) => published += 1,
                Ok(other) => debug!(item_id, outcome = ?other, "item not published"),
                Err(e) => {
                    error!(item_id, error = %e, "publish worker failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        info!(published, "publish step done");
        Ok(published)
    }

    /// One item's full publish sequence on a worker's store connection.
    async fn publish_item(
        &self,
        repo: &Repository,
        item: Item,
        draft: Option<Draft>,
        settings: &Settings,
        channels: &[Arc<dyn Channel>],
        dry_run: bool,
    ) -> Result<PublishResult> {
        let Some(draft) = draft else {
            warn!(item_id = item.id, "drafted item has no draft");
            let update = ItemUpdate::transition(item.id, ItemStatus::Drafted, ItemEvent::MissingDraft)?
                .error("no draft data");
            repo.apply_item_updates(vec![update]).await?;
            return Ok(PublishResult::MissingDraft);
        };

        if !dry_run {
            let quota: Vec<(String, ChannelLimits)> = channels
                .iter()
                .filter(|c| c.is_configured())
                .map(|c| (c.name().to_string(), settings.limits_for(c.name())))
                .collect();
            match self.ctx.rate_limiter.reserve_all(&quota).await {
                Ok(()) => {}
                Err(AppError::RateLimited {
                    channel,
                    limit_type,
                    current,
                    limit,
                }) => {
                    warn!(item_id = item.id, %channel, %limit_type, current, limit, "rate limited");
                    repo.log_event(
                        event::RATE_LIMIT_EXCEEDED,
                        json!({
                            "item_id": item.id,
                            "channel": channel,
                            "limit_type": limit_type,
                            "current": current,
                            "limit": limit,
                        }),
                    )
                    .await?;
                    return Ok(PublishResult::RateLimited);
                }
                Err(e) => return Err(e),
            }
        }

        let template = item.template.unwrap_or(Template::Default);
        let parts = render::render(
            template,
            &draft.payload,
            item.source_name.as_deref(),
            None,
            self.ctx.config.render.max_chars,
        );
        let request = PublishRequest {
            item_id: item.id,
            template,
            priority: item.priority,
            source: item.source_name.clone(),
            url: item.url.clone(),
            parts,
        };
        let ctx = PublishContext {
            repo,
            breakers: &self.ctx.breakers,
            dry_run,
        };

        let mut failure = None;
        for channel in channels {
            let delivery = publish::deliver(channel.as_ref(), &ctx, &request).await?;
            if !delivery.is_success() {
                failure = Some(format!(
                    "{}: {}",
                    delivery.channel,
                    delivery.error.as_deref().unwrap_or("delivery failed")
                ));
                break;
            }
        }

        if let Some(message) = failure {
            let commit = self.failure_commit(&item, Stage::Publish, &message)?;
            let dead = commit.dead_letter.is_some();
            if repo.commit_stage(vec![commit]).await? == 0 {
                return Ok(PublishResult::Skipped);
            }
            return Ok(if dead {
                PublishResult::DeadLettered
            } else {
                PublishResult::Retrying
            });
        }

        repo.set_draft_rendered(draft.id, request.joined_text())
            .await?;
        let update = ItemUpdate::transition(item.id, ItemStatus::Drafted, ItemEvent::Published)?.clear_error();
        if repo.apply_item_updates(vec![update]).await? == 0 {
            return Ok(PublishResult::Skipped);
        }
        info!(item_id = item.id, dry_run, "item published");
        Ok(PublishResult::Published)
    }

    /// Counts a failed attempt: back to the stage's input status, or to the DLQ once the
    /// attempt budget is spent.
    fn failure_commit(&self, item: &Item, stage: Stage, message: &str) -> Result<StageCommit> {
        let message: String = message.chars().take(MAX_ERROR_CHARS).collect();
        let attempts = item.retry_count + 1;
        let max_attempts = self.ctx.config.pipeline.max_attempts.max(1);

        if attempts >= max_attempts {
            warn!(item_id = item.id, stage = %stage, attempts, "retries exhausted, dead-lettering");
            let update = ItemUpdate::transition(item.id, item.status, ItemEvent::DeadLettered)?
                .retry_count(attempts)
                .error(message.clone());
            return Ok(StageCommit {
                update,
                draft: None,
                dead_letter: Some(NewDeadLetter {
                    item_id: item.id,
                    stage,
                    error: message,
                    attempts,
                }),
            });
        }

        let event = match stage {
            Stage::Publish => ItemEvent::PublishFailed,
            _ => ItemEvent::DraftFailed,
        };
        let update = ItemUpdate::transition(item.id, item.status, event)?
            .retry_count(attempts)
            .error(message);
        Ok(update.into())
    }
}

