use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, OptionalExtension, Row, Transaction};
use tokio_rusqlite::Connection;

use crate::error::{AppError, Result};
use crate::models::{
    DeadLetter, Draft, ErrorField, EventLog, Item, ItemEvent, ItemStatus, ItemUpdate,
    NewDeadLetter, NewDraft, NewItem, NewPublication, Publication, Settings, Stage, Template,
};

use super::schema::SCHEMA;

const ITEM_COLUMNS: &str = "id, fingerprint, title, url, summary, source_name, source_type, \
     published_at, risk, priority, template, needs_review, status, last_error, retry_count, \
     created_at, updated_at";

/// One item's worth of stage output, committed atomically with its status change.
#[derive(Debug, Clone)]
pub struct StageCommit {
    pub update: ItemUpdate,
    pub draft: Option<NewDraft>,
    pub dead_letter: Option<NewDeadLetter>,
}

impl From<ItemUpdate> for StageCommit {
    fn from(update: ItemUpdate) -> Self {
        Self {
            update,
            draft: None,
            dead_letter: None,
        }
    }
}

pub struct Repository {
    conn: Connection,
    path: String,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let repo = Self::connect(db_path).await?;
        repo.conn
            .call(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(repo)
    }

    /// Opens a second, independent connection to the same database file. The schema is
    /// already in place; only the per-connection settings are applied.
    pub async fn reopen(&self) -> Result<Self> {
        Self::connect(&self.path).await
    }

    async fn connect(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
            conn.busy_timeout(Duration::from_secs(5))?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            Ok(())
        })
        .await?;

        Ok(Self {
            conn,
            path: db_path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    // Item operations

    pub async fn insert_item(&self, item: NewItem, at: DateTime<Utc>) -> Result<i64> {
        let now = ts(at);
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO items (fingerprint, title, url, summary, source_name, source_type,
                                          published_at, status, created_at, updated_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'new', ?8, ?8)"#,
                    params![
                        item.fingerprint,
                        item.title,
                        item.url,
                        item.summary,
                        item.source_name,
                        item.source_type,
                        item.published_at.map(ts),
                        now,
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    pub async fn get_item(&self, id: i64) -> Result<Option<Item>> {
        let item = self
            .conn
            .call(move |conn| {
                let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1");
                let item = conn
                    .query_row(&sql, params![id], item_from_row)
                    .optional()?;
                Ok(item)
            })
            .await?;
        Ok(item)
    }

    pub async fn item_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Item>> {
        let fingerprint = fingerprint.to_string();
        let item = self
            .conn
            .call(move |conn| {
                let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE fingerprint = ?1");
                let item = conn
                    .query_row(&sql, params![fingerprint], item_from_row)
                    .optional()?;
                Ok(item)
            })
            .await?;
        Ok(item)
    }

    /// Most recent items created at or after `since`, newest first.
    pub async fn items_created_since(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<Item>> {
        let since = ts(since);
        let items = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {ITEM_COLUMNS} FROM items WHERE created_at >= ?1 ORDER BY created_at DESC LIMIT ?2"
                );
                let mut stmt = conn.prepare(&sql)?;
                let items = stmt
                    .query_map(params![since, limit as i64], item_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?;
        Ok(items)
    }

    pub async fn touch_item(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let now = ts(at);
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE items SET updated_at = ?1 WHERE id = ?2",
                    params![now, id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// New cycle of a known story: refresh content fields, keep the row and its status.
    pub async fn refresh_item(&self, id: i64, item: NewItem, at: DateTime<Utc>) -> Result<()> {
        let now = ts(at);
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"UPDATE items SET title = ?1, url = ?2, summary = ?3, source_name = ?4,
                                        published_at = ?5, updated_at = ?6
                       WHERE id = ?7"#,
                    params![
                        item.title,
                        item.url,
                        item.summary,
                        item.source_name,
                        item.published_at.map(ts),
                        now,
                        id,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Up to `limit` items in `status`, oldest first, optionally restricted to `ids`.
    pub async fn items_by_status(
        &self,
        status: ItemStatus,
        limit: usize,
        ids: Option<Vec<i64>>,
    ) -> Result<Vec<Item>> {
        let items = self
            .conn
            .call(move |conn| {
                let mut values: Vec<Value> = vec![Value::Text(status.as_str().to_string())];
                let mut sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE status = ?");
                if let Some(ids) = ids {
                    if ids.is_empty() {
                        return Ok(Vec::new());
                    }
                    sql.push_str(&format!(" AND id IN ({})", placeholders(ids.len())));
                    values.extend(ids.into_iter().map(Value::Integer));
                }
                sql.push_str(" ORDER BY id LIMIT ?");
                values.push(Value::Integer(limit as i64));

                let mut stmt = conn.prepare(&sql)?;
                let items = stmt
                    .query_map(params_from_iter(values.iter()), item_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?;
        Ok(items)
    }

    pub async fn count_by_status(&self) -> Result<Vec<(String, i64)>> {
        let counts = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT status, COUNT(*) FROM items GROUP BY status ORDER BY status")?;
                let counts = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(counts)
            })
            .await?;
        Ok(counts)
    }

    pub async fn apply_item_updates(&self, updates: Vec<ItemUpdate>) -> Result<usize> {
        self.commit_stage(updates.into_iter().map(StageCommit::from).collect())
            .await
    }

    /// Applies status changes in one transaction. Rows whose status moved on since they were
    /// read are skipped together with their draft and dead letter. Returns the applied count.
    pub async fn commit_stage(&self, commits: Vec<StageCommit>) -> Result<usize> {
        if commits.is_empty() {
            return Ok(0);
        }
        let now = ts(Utc::now());
        let applied = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut applied = 0;
                for commit in commits {
                    if !apply_update(&tx, &commit.update, &now)? {
                        continue;
                    }
                    applied += 1;
                    if let Some(draft) = commit.draft {
                        tx.execute(
                            "INSERT INTO drafts (item_id, payload, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
                            params![draft.item_id, draft.payload.to_string(), now],
                        )?;
                    }
                    if let Some(dead) = commit.dead_letter {
                        upsert_dead_letter(&tx, &dead, &now)?;
                    }
                }
                tx.commit()?;
                Ok(applied)
            })
            .await?;
        Ok(applied)
    }

    // Draft operations

    /// Current draft (max id) for each of `item_ids` that has one.
    pub async fn latest_drafts_for(&self, item_ids: Vec<i64>) -> Result<HashMap<i64, Draft>> {
        if item_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let drafts = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    r#"SELECT id, item_id, payload, rendered_text, created_at, updated_at FROM drafts
                       WHERE id IN (SELECT MAX(id) FROM drafts WHERE item_id IN ({}) GROUP BY item_id)"#,
                    placeholders(item_ids.len())
                );
                let mut stmt = conn.prepare(&sql)?;
                let drafts = stmt
                    .query_map(params_from_iter(item_ids.iter()), draft_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(drafts)
            })
            .await?;
        Ok(drafts.into_iter().map(|d| (d.item_id, d)).collect())
    }

    pub async fn set_draft_rendered(&self, draft_id: i64, text: String) -> Result<()> {
        let now = ts(Utc::now());
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE drafts SET rendered_text = ?1, updated_at = ?2 WHERE id = ?3",
                    params![text, now, draft_id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Publication operations

    pub async fn insert_publication(&self, publication: NewPublication) -> Result<i64> {
        let now = ts(Utc::now());
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO publications (item_id, channel, status, external_id, attempts, created_at, published_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
                    params![
                        publication.item_id,
                        publication.channel,
                        publication.status.as_str(),
                        publication.external_id,
                        publication.attempts,
                        now,
                        publication.published_at.map(ts),
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    pub async fn publications_for_item(&self, item_id: i64) -> Result<Vec<Publication>> {
        let publications = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT id, item_id, channel, status, external_id, attempts, created_at, published_at
                       FROM publications WHERE item_id = ?1 ORDER BY id"#,
                )?;
                let publications = stmt
                    .query_map(params![item_id], publication_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(publications)
            })
            .await?;
        Ok(publications)
    }

    // Events

    pub async fn log_event(&self, event_type: &str, payload: serde_json::Value) -> Result<i64> {
        let event_type = event_type.to_string();
        let now = ts(Utc::now());
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO events_log (event_type, payload, created_at) VALUES (?1, ?2, ?3)",
                    params![event_type, payload.to_string(), now],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    pub async fn events(&self, event_type: Option<String>, limit: usize) -> Result<Vec<EventLog>> {
        let events = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT id, event_type, payload, created_at FROM events_log
                       WHERE (?1 IS NULL OR event_type = ?1)
                       ORDER BY id DESC LIMIT ?2"#,
                )?;
                let events = stmt
                    .query_map(params![event_type, limit as i64], event_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(events)
            })
            .await?;
        Ok(events)
    }

    // Settings

    pub async fn get_settings(&self) -> Result<Settings> {
        let settings = self
            .conn
            .call(|conn| {
                conn.execute("INSERT OR IGNORE INTO settings (id) VALUES (1)", [])?;
                let settings = conn.query_row(
                    r#"SELECT pause_all_publish, autopilot_enabled, rate_limits, feature_flags, updated_at
                       FROM settings WHERE id = 1"#,
                    [],
                    settings_from_row,
                )?;
                Ok(settings)
            })
            .await?;
        Ok(settings)
    }

    pub async fn save_settings(&self, settings: Settings) -> Result<()> {
        let now = ts(Utc::now());
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO settings (id, pause_all_publish, autopilot_enabled, rate_limits, feature_flags, updated_at)
                       VALUES (1, ?1, ?2, ?3, ?4, ?5)
                       ON CONFLICT(id) DO UPDATE SET
                           pause_all_publish = excluded.pause_all_publish,
                           autopilot_enabled = excluded.autopilot_enabled,
                           rate_limits = excluded.rate_limits,
                           feature_flags = excluded.feature_flags,
                           updated_at = excluded.updated_at"#,
                    params![
                        settings.pause_all_publish,
                        settings.autopilot_enabled,
                        settings.rate_limits.map(|v| v.to_string()),
                        settings.feature_flags.map(|v| v.to_string()),
                        now,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Dead letter queue

    pub async fn list_dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT id, item_id, stage, error, attempts, last_seen, created_at
                       FROM dead_letter_queue ORDER BY id DESC LIMIT ?1"#,
                )?;
                let rows = stmt
                    .query_map(params![limit as i64], dead_letter_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    pub async fn get_dead_letter(&self, id: i64) -> Result<Option<DeadLetter>> {
        let row = self
            .conn
            .call(move |conn| Ok(select_dead_letter(conn, id)?))
            .await?;
        Ok(row)
    }

    /// Sends a dead-lettered item back to the status before its failed stage with a fresh
    /// retry budget, and deletes the DLQ row.
    pub async fn requeue_dead_letter(&self, id: i64) -> Result<(DeadLetter, ItemStatus)> {
        let now = ts(Utc::now());
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let Some(dead) = select_dead_letter(&tx, id)? else {
                    return Ok(Err(AppError::NotFound(format!("dlq entry {id}"))));
                };
                let current = item_status(&tx, dead.item_id)?;
                let next = match current.map(|s| s.on(ItemEvent::Requeued(dead.stage))) {
                    Some(Ok(next)) => next,
                    Some(Err(e)) => return Ok(Err(e)),
                    None => return Ok(Err(AppError::NotFound(format!("item {}", dead.item_id)))),
                };
                tx.execute(
                    r#"UPDATE items SET status = ?1, retry_count = 0, last_error = NULL, updated_at = ?2
                       WHERE id = ?3"#,
                    params![next.as_str(), now, dead.item_id],
                )?;
                tx.execute("DELETE FROM dead_letter_queue WHERE id = ?1", params![id])?;
                tx.commit()?;
                Ok(Ok((dead, next)))
            })
            .await?;
        outcome
    }

    /// Marks the item failed for good and deletes the DLQ row.
    pub async fn drop_dead_letter(&self, id: i64) -> Result<DeadLetter> {
        let now = ts(Utc::now());
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let Some(dead) = select_dead_letter(&tx, id)? else {
                    return Ok(Err(AppError::NotFound(format!("dlq entry {id}"))));
                };
                if let Some(current) = item_status(&tx, dead.item_id)? {
                    if let Err(e) = current.on(ItemEvent::Dropped) {
                        return Ok(Err(e));
                    }
                }
                tx.execute(
                    r#"UPDATE items SET status = 'failed',
                                        last_error = COALESCE(last_error, '') || ' [dropped from DLQ]',
                                        updated_at = ?1
                       WHERE id = ?2"#,
                    params![now, dead.item_id],
                )?;
                tx.execute("DELETE FROM dead_letter_queue WHERE id = ?1", params![id])?;
                tx.commit()?;
                Ok(Ok(dead))
            })
            .await?;
        outcome
    }
}

fn apply_update(tx: &Transaction, update: &ItemUpdate, now: &str) -> rusqlite::Result<bool> {
    let mut sets = vec!["status = ?", "updated_at = ?"];
    let mut values: Vec<Value> = vec![
        Value::Text(update.status.as_str().to_string()),
        Value::Text(now.to_string()),
    ];
    if let Some(count) = update.retry_count {
        sets.push("retry_count = ?");
        values.push(Value::Integer(count as i64));
    }
    match &update.last_error {
        ErrorField::Keep => {}
        ErrorField::Clear => {
            sets.push("last_error = ?");
            values.push(Value::Null);
        }
        ErrorField::Set(message) => {
            sets.push("last_error = ?");
            values.push(Value::Text(message.clone()));
        }
    }
    if let Some(score) = &update.score {
        sets.extend(["priority = ?", "risk = ?", "template = ?", "needs_review = ?"]);
        values.push(Value::Integer(score.priority as i64));
        values.push(score.risk.clone().map(Value::Text).unwrap_or(Value::Null));
        values.push(Value::Text(score.template.as_str().to_string()));
        values.push(Value::Integer(score.needs_review as i64));
    }
    if let Some(template) = update.template {
        sets.push("template = ?");
        values.push(Value::Text(template.as_str().to_string()));
    }
    values.push(Value::Integer(update.id));
    values.push(Value::Text(update.expected.as_str().to_string()));

    let sql = format!(
        "UPDATE items SET {} WHERE id = ? AND status = ?",
        sets.join(", ")
    );
    let changed = tx.execute(&sql, params_from_iter(values.iter()))?;
    Ok(changed > 0)
}

fn upsert_dead_letter(tx: &Transaction, dead: &NewDeadLetter, now: &str) -> rusqlite::Result<()> {
    let updated = tx.execute(
        r#"UPDATE dead_letter_queue SET error = ?1, attempts = ?2, last_seen = ?3
           WHERE item_id = ?4 AND stage = ?5"#,
        params![dead.error, dead.attempts, now, dead.item_id, dead.stage.as_str()],
    )?;
    if updated == 0 {
        tx.execute(
            r#"INSERT INTO dead_letter_queue (item_id, stage, error, attempts, last_seen, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?5)"#,
            params![dead.item_id, dead.stage.as_str(), dead.error, dead.attempts, now],
        )?;
    }
    Ok(())
}

fn select_dead_letter(conn: &rusqlite::Connection, id: i64) -> rusqlite::Result<Option<DeadLetter>> {
    conn.query_row(
        r#"SELECT id, item_id, stage, error, attempts, last_seen, created_at
           FROM dead_letter_queue WHERE id = ?1"#,
        params![id],
        dead_letter_from_row,
    )
    .optional()
}

fn item_status(conn: &rusqlite::Connection, item_id: i64) -> rusqlite::Result<Option<ItemStatus>> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM items WHERE id = ?1",
            params![item_id],
            |row| row.get(0),
        )
        .optional()?;
    status
        .map(|s| s.parse::<ItemStatus>().map_err(|e| conversion_error(0, e)))
        .transpose()
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// RFC 3339 with millisecond precision and a `Z` suffix, so text order is time order.
pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // SQLite datetime('now') format
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn conversion_error(idx: usize, e: AppError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn get_datetime(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_datetime(&raw)
        .ok_or_else(|| conversion_error(idx, AppError::Validation(format!("bad timestamp: {raw}"))))
}

fn get_opt_datetime(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    Ok(row
        .get::<_, Option<String>>(idx)?
        .and_then(|s| parse_datetime(&s)))
}

fn get_json(row: &Row, idx: usize) -> rusqlite::Result<Option<serde_json::Value>> {
    row.get::<_, Option<String>>(idx)?
        .map(|s| serde_json::from_str(&s).map_err(|e| conversion_error(idx, e.into())))
        .transpose()
}

fn item_from_row(row: &Row) -> rusqlite::Result<Item> {
    Ok(Item {
        id: row.get(0)?,
        fingerprint: row.get(1)?,
        title: row.get(2)?,
        url: row.get(3)?,
        summary: row.get(4)?,
        source_name: row.get(5)?,
        source_type: row.get(6)?,
        published_at: get_opt_datetime(row, 7)?,
        risk: row.get(8)?,
        priority: row.get(9)?,
        template: row
            .get::<_, Option<String>>(10)?
            .map(|s| Template::parse_lenient(&s)),
        needs_review: row.get(11)?,
        status: row
            .get::<_, String>(12)?
            .parse()
            .map_err(|e| conversion_error(12, e))?,
        last_error: row.get(13)?,
        retry_count: row.get(14)?,
        created_at: get_datetime(row, 15)?,
        updated_at: get_datetime(row, 16)?,
    })
}

fn draft_from_row(row: &Row) -> rusqlite::Result<Draft> {
    Ok(Draft {
        id: row.get(0)?,
        item_id: row.get(1)?,
        payload: get_json(row, 2)?.unwrap_or(serde_json::Value::Null),
        rendered_text: row.get(3)?,
        created_at: get_datetime(row, 4)?,
        updated_at: get_datetime(row, 5)?,
    })
}

fn publication_from_row(row: &Row) -> rusqlite::Result<Publication> {
    Ok(Publication {
        id: row.get(0)?,
        item_id: row.get(1)?,
        channel: row.get(2)?,
        status: row
            .get::<_, String>(3)?
            .parse()
            .map_err(|e| conversion_error(3, e))?,
        external_id: row.get(4)?,
        attempts: row.get(5)?,
        created_at: get_datetime(row, 6)?,
        published_at: get_opt_datetime(row, 7)?,
    })
}

fn event_from_row(row: &Row) -> rusqlite::Result<EventLog> {
    Ok(EventLog {
        id: row.get(0)?,
        event_type: row.get(1)?,
        payload: get_json(row, 2)?,
        created_at: get_datetime(row, 3)?,
    })
}

fn settings_from_row(row: &Row) -> rusqlite::Result<Settings> {
    Ok(Settings {
        pause_all_publish: row.get(0)?,
        autopilot_enabled: row.get(1)?,
        rate_limits: get_json(row, 2)?,
        feature_flags: get_json(row, 3)?,
        updated_at: get_opt_datetime(row, 4)?,
    })
}

fn dead_letter_from_row(row: &Row) -> rusqlite::Result<DeadLetter> {
    Ok(DeadLetter {
        id: row.get(0)?,
        item_id: row.get(1)?,
        stage: row
            .get::<_, String>(2)?
            .parse::<Stage>()
            .map_err(|e| conversion_error(2, e))?,
        error: row.get(3)?,
        attempts: row.get(4)?,
        last_seen: get_datetime(row, 5)?,
        created_at: get_datetime(row, 6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewPublication, PublicationStatus, ScoreResult};
    use tempfile::TempDir;

    async fn repo() -> (TempDir, Repository) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let repo = Repository::new(path.to_str().unwrap()).await.unwrap();
        (dir, repo)
    }

    fn new_item(fp: &str) -> NewItem {
        NewItem {
            fingerprint: fp.to_string(),
            title: format!("title {fp}"),
            url: Some("https://example.com/a".into()),
            summary: None,
            source_name: Some("Reuters".into()),
            source_type: "rss".into(),
            published_at: None,
        }
    }

    #[tokio::test]
    async fn conditional_update_skips_moved_rows() {
        let (_dir, repo) = repo().await;
        let id = repo.insert_item(new_item("a"), Utc::now()).await.unwrap();

        let score = ScoreResult {
            priority: 1,
            risk: Some("high".into()),
            template: Template::AnaliseIntel,
            needs_review: true,
        };
        let update = ItemUpdate::transition(id, ItemStatus::New, ItemEvent::Scored)
            .unwrap()
            .score(score);
        assert_eq!(repo.apply_item_updates(vec![update.clone()]).await.unwrap(), 1);
        // second application no longer matches status = 'new'
        assert_eq!(repo.apply_item_updates(vec![update]).await.unwrap(), 0);

        let item = repo.get_item(id).await.unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Scored);
        assert_eq!(item.risk.as_deref(), Some("high"));
        assert_eq!(item.template, Some(Template::AnaliseIntel));
        assert!(item.needs_review);
    }

    #[tokio::test]
    async fn latest_draft_is_max_id() {
        let (_dir, repo) = repo().await;
        let id = repo.insert_item(new_item("a"), Utc::now()).await.unwrap();
        for n in 0..2 {
            let update = ItemUpdate::transition(id, ItemStatus::New, ItemEvent::Scored).unwrap();
            repo.apply_item_updates(vec![update]).await.unwrap();
            let commit = StageCommit {
                update: ItemUpdate::transition(id, ItemStatus::Scored, ItemEvent::Drafted).unwrap(),
                draft: Some(NewDraft {
                    item_id: id,
                    payload: serde_json::json!({ "n": n }),
                }),
                dead_letter: None,
            };
            assert_eq!(repo.commit_stage(vec![commit]).await.unwrap(), 1);
            // put it back so the loop can draft again
            repo.conn
                .call(move |conn| {
                    conn.execute("UPDATE items SET status = 'new' WHERE id = ?1", params![id])?;
                    Ok(())
                })
                .await
                .unwrap();
        }
        let drafts = repo.latest_drafts_for(vec![id, 999]).await.unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[&id].payload["n"], 1);
    }

    #[tokio::test]
    async fn settings_row_is_created_on_first_read() {
        let (_dir, repo) = repo().await;
        let mut settings = repo.get_settings().await.unwrap();
        assert!(!settings.pause_all_publish);
        settings.pause_all_publish = true;
        settings.set_feature_flag("make", false);
        repo.save_settings(settings).await.unwrap();

        let settings = repo.get_settings().await.unwrap();
        assert!(settings.pause_all_publish);
        assert!(!settings.channel_enabled("make"));
    }

    #[tokio::test]
    async fn publications_are_listed_per_item() {
        let (_dir, repo) = repo().await;
        let id = repo.insert_item(new_item("a"), Utc::now()).await.unwrap();
        for channel in ["telegram", "make"] {
            repo.insert_publication(NewPublication::new(Some(id), channel, PublicationStatus::DryRun))
                .await
                .unwrap();
        }
        let pubs = repo.publications_for_item(id).await.unwrap();
        assert_eq!(pubs.len(), 2);
        assert_eq!(pubs[0].channel, "telegram");
        assert_eq!(pubs[1].status, PublicationStatus::DryRun);
    }

    #[tokio::test]
    async fn events_filter_by_type() {
        let (_dir, repo) = repo().await;
        repo.log_event("publish_blocked", serde_json::json!({"reason": "pause"}))
            .await
            .unwrap();
        repo.log_event("rate_limit_exceeded", serde_json::json!({"channel": "telegram"}))
            .await
            .unwrap();
        let blocked = repo.events(Some("publish_blocked".into()), 10).await.unwrap();
        assert_eq!(blocked.len(), 1);
        assert_eq!(repo.events(None, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn timestamps_sort_lexically() {
        let early = ts(DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z").unwrap().into());
        let late = ts(DateTime::parse_from_rfc3339("2026-01-02T03:04:05.5Z").unwrap().into());
        assert_eq!(early, "2026-01-02T03:04:05.000Z");
        assert!(early < late);
        assert_eq!(parse_datetime("2026-01-11 12:34:56").unwrap().to_rfc3339(), "2026-01-11T12:34:56+00:00");
    }

    #[tokio::test]
    async fn reopened_connection_shares_the_file_and_enforces_keys() {
        let (_dir, repo) = repo().await;
        let worker = repo.reopen().await.unwrap();
        assert_eq!(worker.path(), repo.path());

        let id = worker.insert_item(new_item("w"), Utc::now()).await.unwrap();
        assert!(repo.get_item(id).await.unwrap().is_some());

        let orphan = NewPublication::new(Some(id + 100), "telegram", PublicationStatus::Sent);
        assert!(worker.insert_publication(orphan).await.is_err());
    }
}
