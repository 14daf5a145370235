use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use super::{BoundedCounter, CounterOutcome, KvStore};
use crate::error::{AppError, Result};

// KEYS[i] paired with ARGV[2i-1] = limit, ARGV[2i] = ttl seconds.
const INCR_IF_BELOW: &str = r#"
for i = 1, #KEYS do
  local current = tonumber(redis.call('GET', KEYS[i]) or '0')
  if current >= tonumber(ARGV[2 * i - 1]) then
    return {i, current}
  end
end
for i = 1, #KEYS do
  redis.call('INCR', KEYS[i])
  redis.call('EXPIRE', KEYS[i], ARGV[2 * i])
end
return {0, 0}
"#;

pub struct RedisKv {
    conn: ConnectionManager,
    incr_script: Script,
}

impl RedisKv {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(kv_error)?;
        let conn = ConnectionManager::new(client).await.map_err(kv_error)?;
        Ok(Self {
            conn,
            incr_script: Script::new(INCR_IF_BELOW),
        })
    }
}

fn kv_error(e: redis::RedisError) -> AppError {
    AppError::Kv(e.to_string())
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(kv_error)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await
            .map_err(kv_error)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(kv_error)
    }

    async fn incr_if_below(&self, counters: &[BoundedCounter]) -> Result<CounterOutcome> {
        if counters.is_empty() {
            return Ok(CounterOutcome::Incremented);
        }
        let mut invocation = self.incr_script.prepare_invoke();
        for counter in counters {
            invocation.key(&counter.key);
        }
        for counter in counters {
            invocation.arg(counter.limit).arg(counter.ttl.as_secs().max(1));
        }

        let mut conn = self.conn.clone();
        let (index, current): (i64, i64) = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(kv_error)?;

        if index == 0 {
            Ok(CounterOutcome::Incremented)
        } else {
            Ok(CounterOutcome::Denied {
                index: (index - 1) as usize,
                current: current.max(0) as u64,
            })
        }
    }
}
