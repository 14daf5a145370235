//! Key/value store shared by the result cache, the rate limiter and the circuit breakers.
//!
//! `MemoryKv` keeps everything in-process. With the `redis-backend` feature, `RedisKv`
//! lets several workers or processes see the same counters and breaker state.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

mod memory;
#[cfg(feature = "redis-backend")]
mod remote;

pub use memory::MemoryKv;
#[cfg(feature = "redis-backend")]
pub use remote::RedisKv;

/// A counter that may only be incremented while it is below `limit`.
#[derive(Debug, Clone)]
pub struct BoundedCounter {
    pub key: String,
    pub limit: u64,
    pub ttl: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterOutcome {
    Incremented,
    /// Nothing was incremented; `index` points at the first counter at its limit.
    Denied { index: usize, current: u64 },
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Checks every counter and increments all of them (refreshing their TTL) only if each
    /// one is below its limit. Check and increment happen as a single atomic step.
    async fn incr_if_below(&self, counters: &[BoundedCounter]) -> Result<CounterOutcome>;
}
