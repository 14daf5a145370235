use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Stage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: i64,
    pub item_id: i64,
    pub stage: Stage,
    pub error: Option<String>,
    pub attempts: u32,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDeadLetter {
    pub item_id: i64,
    pub stage: Stage,
    pub error: String,
    pub attempts: u32,
}
