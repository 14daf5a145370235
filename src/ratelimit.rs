use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::kv::{BoundedCounter, CounterOutcome, KvStore};

pub use crate::models::ChannelLimits;

const MINUTE_TTL: Duration = Duration::from_secs(120);
const HOUR_TTL: Duration = Duration::from_secs(7200);

/// Per-channel minute and hour buckets in the shared store.
///
/// Check and increment are one atomic store operation, and calls are additionally
/// serialized in-process so concurrent publish workers queue up behind each other.
pub struct RateLimiter {
    store: Arc<dyn KvStore>,
    lock: Mutex<()>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    pub async fn check_and_increment(&self, channel: &str, limits: ChannelLimits) -> Result<()> {
        self.check_and_increment_at(channel, limits, Utc::now()).await
    }

    pub async fn check_and_increment_at(
        &self,
        channel: &str,
        limits: ChannelLimits,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.reserve_all_at(&[(channel.to_string(), limits)], now)
            .await
    }

    /// Takes one unit of quota from every channel, or from none of them.
    pub async fn reserve_all(&self, channels: &[(String, ChannelLimits)]) -> Result<()> {
        self.reserve_all_at(channels, Utc::now()).await
    }

    pub async fn reserve_all_at(
        &self,
        channels: &[(String, ChannelLimits)],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let counters: Vec<BoundedCounter> = channels
            .iter()
            .flat_map(|(channel, limits)| {
                [
                    BoundedCounter {
                        key: minute_key(channel, now),
                        limit: limits.per_minute,
                        ttl: MINUTE_TTL,
                    },
                    BoundedCounter {
                        key: hour_key(channel, now),
                        limit: limits.per_hour,
                        ttl: HOUR_TTL,
                    },
                ]
            })
            .collect();

        let _guard = self.lock.lock().await;
        match self.store.incr_if_below(&counters).await? {
            CounterOutcome::Incremented => {
                debug!(channels = channels.len(), "rate limit quota reserved");
                Ok(())
            }
            CounterOutcome::Denied { index, current } => {
                let (channel, limits) = &channels[index / 2];
                let (limit_type, limit) = if index % 2 == 0 {
                    ("per_minute", limits.per_minute)
                } else {
                    ("per_hour", limits.per_hour)
                };
                Err(AppError::RateLimited {
                    channel: channel.clone(),
                    limit_type: limit_type.to_string(),
                    current,
                    limit,
                })
            }
        }
    }
}

fn minute_key(channel: &str, now: DateTime<Utc>) -> String {
    format!("rate:{channel}:min:{}", now.format("%Y-%m-%d-%H-%M"))
}

fn hour_key(channel: &str, now: DateTime<Utc>) -> String {
    format!("rate:{channel}:hr:{}", now.format("%Y-%m-%d-%H"))
}
