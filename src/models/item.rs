use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Template {
    #[serde(rename = "ANALISE_INTEL")]
    AnaliseIntel,
    #[serde(rename = "FLASH_SETORIAL")]
    FlashSetorial,
    #[default]
    #[serde(rename = "DEFAULT")]
    Default,
}

impl Template {
    pub fn as_str(&self) -> &'static str {
        match self {
            Template::AnaliseIntel => "ANALISE_INTEL",
            Template::FlashSetorial => "FLASH_SETORIAL",
            Template::Default => "DEFAULT",
        }
    }

    /// Lenient parse for LLM output: anything unrecognised is `Default`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "ANALISE_INTEL" => Template::AnaliseIntel,
            "FLASH_SETORIAL" => Template::FlashSetorial,
            _ => Template::Default,
        }
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    New,
    Scored,
    Drafted,
    Published,
    Failed,
    Dlq,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::New => "new",
            ItemStatus::Scored => "scored",
            ItemStatus::Drafted => "drafted",
            ItemStatus::Published => "published",
            ItemStatus::Failed => "failed",
            ItemStatus::Dlq => "dlq",
        }
    }

    /// Transition table for the item lifecycle. Anything not listed is rejected.
    pub fn on(self, event: ItemEvent) -> Result<ItemStatus> {
        use ItemEvent as E;
        use ItemStatus as S;

        let next = match (self, event) {
            (S::New, E::Scored) => S::Scored,
            (S::Scored, E::Drafted) => S::Drafted,
            (S::Scored, E::DraftFailed) => S::Scored,
            (S::Drafted, E::Published) => S::Published,
            (S::Drafted, E::PublishFailed) => S::Drafted,
            (S::Drafted, E::MissingDraft) => S::Failed,
            (S::New | S::Scored | S::Drafted, E::DeadLettered) => S::Dlq,
            (S::Dlq, E::Requeued(stage)) => stage.resume_status(),
            (S::Dlq, E::Dropped) => S::Failed,
            (from, event) => {
                return Err(AppError::InvalidTransition {
                    from: from.to_string(),
                    event: event.to_string(),
                })
            }
        };
        Ok(next)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "new" => Ok(ItemStatus::New),
            "scored" => Ok(ItemStatus::Scored),
            "drafted" => Ok(ItemStatus::Drafted),
            "published" => Ok(ItemStatus::Published),
            "failed" => Ok(ItemStatus::Failed),
            "dlq" => Ok(ItemStatus::Dlq),
            other => Err(AppError::Validation(format!("unknown item status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Scoring,
    LlmDraft,
    Publish,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Scoring => "scoring",
            Stage::LlmDraft => "llm_draft",
            Stage::Publish => "publish",
        }
    }

    /// Status an item returns to when a dead-lettered stage is retried.
    pub fn resume_status(&self) -> ItemStatus {
        match self {
            Stage::Scoring => ItemStatus::New,
            Stage::LlmDraft => ItemStatus::Scored,
            Stage::Publish => ItemStatus::Drafted,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "scoring" => Ok(Stage::Scoring),
            "llm_draft" => Ok(Stage::LlmDraft),
            "publish" => Ok(Stage::Publish),
            other => Err(AppError::Validation(format!("unknown stage: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemEvent {
    Scored,
    Drafted,
    DraftFailed,
    Published,
    PublishFailed,
    MissingDraft,
    DeadLettered,
    Requeued(Stage),
    Dropped,
}

impl fmt::Display for ItemEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemEvent::Scored => f.write_str("scored"),
            ItemEvent::Drafted => f.write_str("drafted"),
            ItemEvent::DraftFailed => f.write_str("draft_failed"),
            ItemEvent::Published => f.write_str("published"),
            ItemEvent::PublishFailed => f.write_str("publish_failed"),
            ItemEvent::MissingDraft => f.write_str("missing_draft"),
            ItemEvent::DeadLettered => f.write_str("dead_lettered"),
            ItemEvent::Requeued(stage) => write!(f, "requeued({stage})"),
            ItemEvent::Dropped => f.write_str("dropped"),
        }
    }
}

/// Output of rule-based scoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub priority: u8,
    pub risk: Option<String>,
    pub template: Template,
    pub needs_review: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub fingerprint: String,
    pub title: String,
    pub url: Option<String>,
    pub summary: Option<String>,
    pub source_name: Option<String>,
    pub source_type: String,
    pub published_at: Option<DateTime<Utc>>,
    pub risk: Option<String>,
    pub priority: Option<u8>,
    pub template: Option<Template>,
    pub needs_review: bool,
    pub status: ItemStatus,
    pub last_error: Option<String>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Normalized item as handed over by an ingestion connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawItem {
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub source_name: Option<String>,
    #[serde(default = "default_source_type")]
    pub source_type: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

fn default_source_type() -> String {
    "rss".to_string()
}

#[derive(Debug, Clone)]
pub struct NewItem {
    pub fingerprint: String,
    pub title: String,
    pub url: Option<String>,
    pub summary: Option<String>,
    pub source_name: Option<String>,
    pub source_type: String,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ErrorField {
    #[default]
    Keep,
    Clear,
    Set(String),
}

/// Conditional status change: applied only while the row still has `expected` status.
#[derive(Debug, Clone)]
pub struct ItemUpdate {
    pub id: i64,
    pub expected: ItemStatus,
    pub status: ItemStatus,
    pub retry_count: Option<u32>,
    pub last_error: ErrorField,
    pub score: Option<ScoreResult>,
    /// Template chosen by the classifier, applied after `score`.
    pub template: Option<Template>,
}

impl ItemUpdate {
    /// Resolves the next status through the transition table.
    pub fn transition(id: i64, from: ItemStatus, event: ItemEvent) -> Result<Self> {
        Ok(Self {
            id,
            expected: from,
            status: from.on(event)?,
            retry_count: None,
            last_error: ErrorField::Keep,
            score: None,
            template: None,
        })
    }

    pub fn retry_count(mut self, count: u32) -> Self {
        self.retry_count = Some(count);
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.last_error = ErrorField::Set(message.into());
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.last_error = ErrorField::Clear;
        self
    }

    pub fn score(mut self, score: ScoreResult) -> Self {
        self.score = Some(score);
        self
    }

    pub fn template(mut self, template: Template) -> Self {
        self.template = Some(template);
        self
    }
}
