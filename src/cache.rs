use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::kv::{KvStore, MemoryKv};

const REMOTE_TIMEOUT: Duration = Duration::from_millis(500);

/// Best-effort cache for scores and LLM results. A miss or a store error only means the
/// caller recomputes. Falls back to an in-process map when the remote store is absent or
/// failing.
pub struct ResultCache {
    remote: Option<Arc<dyn KvStore>>,
    local: MemoryKv,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(remote: Option<Arc<dyn KvStore>>, ttl: Duration) -> Self {
        Self {
            remote,
            local: MemoryKv::new(),
            ttl: ttl.max(Duration::from_secs(1)),
        }
    }

    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(None, ttl)
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.remote_get(key).await {
            Some(hit) => hit,
            None => self.local.get(key).await.ok().flatten()?,
        };
        match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!(key, "cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(key, error = %e, "discarding undecodable cache entry");
                None
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "cache value not serializable");
                return;
            }
        };
        if let Some(remote) = &self.remote {
            match tokio::time::timeout(REMOTE_TIMEOUT, remote.set_ex(key, &raw, self.ttl)).await {
                Ok(Ok(())) => return,
                Ok(Err(e)) => warn!(key, error = %e, "remote cache set failed, using local"),
                Err(_) => warn!(key, "remote cache set timed out, using local"),
            }
        }
        let _ = self.local.set_ex(key, &raw, self.ttl).await;
    }

    /// Remote hit, or `None` on miss, error or when there is no remote store.
    async fn remote_get(&self, key: &str) -> Option<String> {
        let remote = self.remote.as_ref()?;
        match tokio::time::timeout(REMOTE_TIMEOUT, remote.get(key)).await {
            Ok(Ok(hit)) => hit,
            Ok(Err(e)) => {
                warn!(key, error = %e, "remote cache get failed, using local");
                None
            }
            Err(_) => {
                warn!(key, "remote cache get timed out, using local");
                None
            }
        }
    }
}

pub fn score_key(fingerprint: &str) -> String {
    format!("score:{fingerprint}")
}

pub fn classify_key(hash: &str) -> String {
    format!("llm:classify:{hash}")
}

pub fn generate_key(hash: &str) -> String {
    format!("llm:generate:{hash}")
}

/// Stable hash of an LLM request. Whitespace in the user prompt is normalized.
pub fn prompt_hash(model: &str, system: &str, user: &str) -> String {
    let user = user.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update(b"\n");
    hasher.update(system.as_bytes());
    hasher.update(b"\n");
    hasher.update(user.as_bytes());
    hex::encode(hasher.finalize())
}
