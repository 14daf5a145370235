use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use url::Url;

use crate::config::{DedupConfig, DedupPolicy};
use crate::db::Repository;
use crate::error::Result;
use crate::models::{Item, NewItem, RawItem};

const STRIP_QUERY_PREFIXES: [&str; 6] = ["utm_", "fbclid", "gclid", "ref", "mc_", "_ga"];
const MAX_SUMMARY_CHARS: usize = 10_000;
const FUZZY_CANDIDATES: usize = 1000;

/// Lower-cases scheme and host, drops tracking parameters, the fragment and a trailing slash.
/// Input that does not parse as an absolute URL is returned trimmed.
pub fn canonical_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };
    if url.host_str().is_none() {
        return trimmed.to_string();
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, v)| {
            let k = k.to_lowercase();
            !v.is_empty() && !STRIP_QUERY_PREFIXES.iter().any(|p| k.starts_with(p))
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let path = url.path().trim_end_matches('/').to_string();
    url.set_path(if path.is_empty() { "/" } else { &path });
    url.set_fragment(None);
    url.to_string()
}

pub fn normalize_title(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn normalize_summary(summary: &str) -> String {
    normalize_title(summary).chars().take(MAX_SUMMARY_CHARS).collect()
}

/// SHA-256 over source type, canonical URL and normalized title. The source type is part of
/// the key so the same story from two kinds of source stays two items.
pub fn build_fingerprint(source_type: &str, canonical_url: &str, normalized_title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{source_type}\n{canonical_url}\n{normalized_title}").as_bytes());
    hex::encode(hasher.finalize())
}

/// Start of the window; a window reaching past the representable range starts at the minimum.
pub fn window_cutoff(window_days: i64, now: DateTime<Utc>) -> DateTime<Utc> {
    Duration::try_days(window_days)
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Whether `created_at` is recent enough for a repeat to count as the same item.
pub fn created_at_in_window(created_at: DateTime<Utc>, window_days: i64, now: DateTime<Utc>) -> bool {
    created_at >= window_cutoff(window_days, now)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Inserted(i64),
    /// Seen within the window: only `updated_at` moved.
    Touched(i64),
    /// Seen before the window: same row, fields refreshed for a new cycle.
    Refreshed(i64),
}

pub struct Deduplicator {
    policy: DedupPolicy,
    window_days: i64,
    similarity: f64,
}

impl Deduplicator {
    pub fn new(config: &DedupConfig) -> Self {
        Self {
            policy: config.policy,
            window_days: config.window_days,
            similarity: config.title_similarity,
        }
    }

    /// Exact fingerprint match first; under the relaxed policy, fall back to the most similar
    /// title among items created inside the window.
    pub async fn find_duplicate(
        &self,
        repo: &Repository,
        fingerprint: &str,
        title: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Item>> {
        if let Some(item) = repo.item_by_fingerprint(fingerprint).await? {
            return Ok(Some(item));
        }
        let title = match (self.policy, title.map(str::trim)) {
            (DedupPolicy::Relaxed, Some(t)) if !t.is_empty() => t.to_lowercase(),
            _ => return Ok(None),
        };

        let since = window_cutoff(self.window_days, now);
        let candidates = repo.items_created_since(since, FUZZY_CANDIDATES).await?;
        let found = candidates.into_iter().find(|c| {
            strsim::normalized_levenshtein(&title, &c.title.to_lowercase()) >= self.similarity
        });
        if let Some(item) = &found {
            debug!(item_id = item.id, "fuzzy title match");
        }
        Ok(found)
    }

    pub async fn is_duplicate_in_window(
        &self,
        repo: &Repository,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(repo
            .item_by_fingerprint(fingerprint)
            .await?
            .is_some_and(|item| created_at_in_window(item.created_at, self.window_days, now)))
    }

    pub async fn ingest(&self, repo: &Repository, raw: RawItem) -> Result<IngestOutcome> {
        self.ingest_at(repo, raw, Utc::now()).await
    }

    pub async fn ingest_at(
        &self,
        repo: &Repository,
        raw: RawItem,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome> {
        let title = normalize_title(&raw.title);
        let url = raw.url.as_deref().map(canonical_url).filter(|u| !u.is_empty());
        let source_type = raw.source_type.trim().to_lowercase();
        let fingerprint = build_fingerprint(&source_type, url.as_deref().unwrap_or(""), &title);

        let new_item = NewItem {
            fingerprint: fingerprint.clone(),
            title: title.clone(),
            url,
            summary: raw
                .summary
                .as_deref()
                .map(normalize_summary)
                .filter(|s| !s.is_empty()),
            source_name: raw
                .source_name
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            source_type,
            published_at: raw.published_at,
        };

        match self.find_duplicate(repo, &fingerprint, Some(&title), now).await? {
            None => {
                let id = repo.insert_item(new_item, now).await?;
                info!(item_id = id, "ingested new item");
                Ok(IngestOutcome::Inserted(id))
            }
            Some(existing) if created_at_in_window(existing.created_at, self.window_days, now) => {
                repo.touch_item(existing.id, now).await?;
                debug!(item_id = existing.id, "duplicate within window");
                Ok(IngestOutcome::Touched(existing.id))
            }
            Some(existing) => {
                repo.refresh_item(existing.id, new_item, now).await?;
                info!(item_id = existing.id, "known story outside window, refreshed");
                Ok(IngestOutcome::Refreshed(existing.id))
            }
        }
    }
}
