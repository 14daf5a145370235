use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{BoundedCounter, CounterOutcome, KvStore};
use crate::error::Result;

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process store with per-entry expiry.
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops every expired entry. Rate-limit windows and cache keys are never read again once
    /// they lapse, so writes clean up after them.
    fn sweep(entries: &mut HashMap<String, Entry>, now: Instant) {
        entries.retain(|_, e| e.expires_at > now);
    }

    fn live<'a>(entries: &'a HashMap<String, Entry>, key: &str, now: Instant) -> Option<&'a str> {
        entries
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.value.as_str())
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let mut entries = self.entries();
        let value = Self::live(&entries, key, now).map(str::to_string);
        if value.is_none() {
            entries.remove(key);
        }
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries();
        Self::sweep(&mut entries, now);
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }

    async fn incr_if_below(&self, counters: &[BoundedCounter]) -> Result<CounterOutcome> {
        let now = Instant::now();
        let mut entries = self.entries();
        Self::sweep(&mut entries, now);

        for (index, counter) in counters.iter().enumerate() {
            let current = Self::live(&entries, &counter.key, now)
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0);
            if current >= counter.limit {
                return Ok(CounterOutcome::Denied { index, current });
            }
        }

        for counter in counters {
            let current = Self::live(&entries, &counter.key, now)
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0);
            entries.insert(
                counter.key.clone(),
                Entry {
                    value: (current + 1).to_string(),
                    expires_at: now + counter.ttl,
                },
            );
        }
        Ok(CounterOutcome::Incremented)
    }
}
