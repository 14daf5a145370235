use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicationStatus {
    Pending,
    DryRun,
    Sent,
    Failed,
    DeadLetter,
    Blocked,
}

impl PublicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublicationStatus::Pending => "pending",
            PublicationStatus::DryRun => "dry_run",
            PublicationStatus::Sent => "sent",
            PublicationStatus::Failed => "failed",
            PublicationStatus::DeadLetter => "dead_letter",
            PublicationStatus::Blocked => "blocked",
        }
    }

    /// Whether this outcome counts as delivered (or intentionally skipped) for the item.
    pub fn is_success(&self) -> bool {
        matches!(self, PublicationStatus::Sent | PublicationStatus::DryRun)
    }
}

impl fmt::Display for PublicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PublicationStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(PublicationStatus::Pending),
            "dry_run" => Ok(PublicationStatus::DryRun),
            "sent" => Ok(PublicationStatus::Sent),
            "failed" => Ok(PublicationStatus::Failed),
            "dead_letter" => Ok(PublicationStatus::DeadLetter),
            "blocked" => Ok(PublicationStatus::Blocked),
            other => Err(AppError::Validation(format!(
                "unknown publication status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Publication {
    pub id: i64,
    pub item_id: Option<i64>,
    pub channel: String,
    pub status: PublicationStatus,
    pub external_id: Option<String>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewPublication {
    pub item_id: Option<i64>,
    pub channel: String,
    pub status: PublicationStatus,
    pub external_id: Option<String>,
    pub attempts: u32,
    pub published_at: Option<DateTime<Utc>>,
}

impl NewPublication {
    pub fn new(item_id: Option<i64>, channel: &str, status: PublicationStatus) -> Self {
        Self {
            item_id,
            channel: channel.to_string(),
            status,
            external_id: None,
            attempts: 0,
            published_at: None,
        }
    }
}
