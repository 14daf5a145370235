use std::sync::Arc;

use tracing::{info, warn};

use crate::ai::{ChatBackend, HttpChatClient, LlmOrchestrator};
use crate::breaker::BreakerRegistry;
use crate::cache::ResultCache;
use crate::config::Config;
use crate::db::Repository;
use crate::dedup::Deduplicator;
use crate::error::Result;
use crate::kv::{KvStore, MemoryKv};
use crate::publish::{Channel, MakeChannel, TelegramChannel, WhatsAppChannel};
use crate::ratelimit::RateLimiter;
use crate::scoring::RuleSet;

/// Long-lived components, built once at startup and shared by every pipeline step.
pub struct AppContext {
    pub config: Config,
    pub repo: Repository,
    pub cache: Arc<ResultCache>,
    pub breakers: BreakerRegistry,
    pub rate_limiter: RateLimiter,
    pub rules: RuleSet,
    pub dedup: Deduplicator,
    pub llm: LlmOrchestrator,
    /// Publish order: telegram, whatsapp bridge, make.
    pub channels: Vec<Arc<dyn Channel>>,
}

impl AppContext {
    pub async fn from_config(config: Config) -> Result<Self> {
        let repo = Repository::new(&config.db_path).await?;
        let remote = connect_store(config.redis_url.as_deref()).await;
        let backend: Arc<dyn ChatBackend> = Arc::new(HttpChatClient::new(&config.llm)?);
        let channels: Vec<Arc<dyn Channel>> = vec![
            Arc::new(TelegramChannel::new(&config.telegram, &config.retry)?),
            Arc::new(WhatsAppChannel::new(&config.whatsapp, &config.retry)?),
            Arc::new(MakeChannel::new(&config.make)?),
        ];
        let rules = RuleSet::load(config.rules_path.as_deref())?;
        Ok(Self::with_parts(config, repo, remote, backend, channels, rules))
    }

    /// Assembles a context from already built parts. Without a remote store, cache, breakers
    /// and rate limits live in this process only.
    pub fn with_parts(
        config: Config,
        repo: Repository,
        remote: Option<Arc<dyn KvStore>>,
        backend: Arc<dyn ChatBackend>,
        channels: Vec<Arc<dyn Channel>>,
        rules: RuleSet,
    ) -> Self {
        let store: Arc<dyn KvStore> = match &remote {
            Some(remote) => remote.clone(),
            None => Arc::new(MemoryKv::new()),
        };
        let cache = Arc::new(ResultCache::new(remote, config.cache.ttl()));
        let llm = LlmOrchestrator::new(backend, cache.clone(), config.llm.max_json_retry);
        Self {
            breakers: BreakerRegistry::new(store.clone(), &config.breaker),
            rate_limiter: RateLimiter::new(store),
            dedup: Deduplicator::new(&config.dedup),
            cache,
            llm,
            rules,
            channels,
            repo,
            config,
        }
    }
}

#[cfg(feature = "redis-backend")]
async fn connect_store(url: Option<&str>) -> Option<Arc<dyn KvStore>> {
    let url = url.filter(|u| !u.trim().is_empty())?;
    match crate::kv::RedisKv::connect(url).await {
        Ok(kv) => {
            info!("connected to shared store");
            Some(Arc::new(kv))
        }
        Err(e) => {
            warn!(error = %e, "shared store unavailable, using in-process state");
            None
        }
    }
}

#[cfg(not(feature = "redis-backend"))]
async fn connect_store(url: Option<&str>) -> Option<Arc<dyn KvStore>> {
    if url.is_some_and(|u| !u.trim().is_empty()) {
        warn!("redis_url is set but the redis-backend feature is off, using in-process state");
    } else {
        info!("no shared store configured, using in-process state");
    }
    None
}
