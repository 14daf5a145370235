use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const RATE_LIMIT_EXCEEDED: &str = "rate_limit_exceeded";
pub const PUBLISH_BLOCKED: &str = "publish_blocked";
pub const MAKE_DRY_RUN: &str = "make_dry_run";
pub const MAKE_PUBLISH_SUCCESS: &str = "make_publish_success";
pub const MAKE_PUBLISH_FAILURE: &str = "make_publish_failure";
pub const MAKE_DEAD_LETTER: &str = "make_dead_letter";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLog {
    pub id: i64,
    pub event_type: String,
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
