use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Shared store for cache, rate limits and breaker state. Unset = in-process only.
    pub redis_url: Option<String>,

    /// Optional TOML file with scoring keywords and source tiers.
    pub rules_path: Option<String>,

    #[serde(default)]
    pub dry_run: bool,

    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub make: MakeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_attempts: u32,
    pub publish_max_workers: usize,
    pub run_every_minutes: u64,
    pub scoring_batch: usize,
    pub llm_batch: usize,
    pub publish_batch: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            publish_max_workers: 4,
            run_every_minutes: 15,
            scoring_batch: 100,
            llm_batch: 20,
            publish_batch: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DedupPolicy {
    #[default]
    Strict,
    Relaxed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub window_days: i64,
    pub policy: DedupPolicy,
    pub title_similarity: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_days: 7,
            policy: DedupPolicy::Strict,
            title_similarity: 0.85,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 86_400 }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 60.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LlmMode {
    /// `/api/chat`
    #[default]
    Native,
    /// `/v1/chat/completions`
    OpenaiCompat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub mode: LlmMode,
    pub timeout_secs: u64,
    pub max_json_retry: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://ollama:11434".to_string(),
            model: "qwen2.5:7b".to_string(),
            mode: LlmMode::Native,
            timeout_secs: 120,
            max_json_retry: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub max_chars: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self { max_chars: 3500 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
    pub api_base: String,
    pub timeout_secs: u64,
    pub max_message_chars: usize,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            api_base: "https://api.telegram.org".to_string(),
            timeout_secs: 30,
            max_message_chars: 4090,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MakeConfig {
    pub webhook_url: Option<String>,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for MakeConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: 15,
            max_attempts: 5,
            backoff_base_ms: 2000,
        }
    }
}

const MAX_WINDOW_DAYS: i64 = 3650;
const MAX_RECOVERY_TIMEOUT_SECS: f64 = 86_400.0;

fn default_db_path() -> String {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("newsrelay")
        .join("pipeline.db")
        .to_string_lossy()
        .to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            redis_url: None,
            rules_path: None,
            dry_run: false,
            pipeline: PipelineConfig::default(),
            dedup: DedupConfig::default(),
            cache: CacheConfig::default(),
            breaker: BreakerConfig::default(),
            retry: RetryConfig::default(),
            llm: LlmConfig::default(),
            render: RenderConfig::default(),
            telegram: TelegramConfig::default(),
            whatsapp: WhatsAppConfig::default(),
            make: MakeConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str::<Config>(&content)?
        } else {
            let config = Config::default();
            config.save()?;
            config
        };

        config.apply_env();
        config.validate()?;
        if let Some(dir) = Path::new(&config.db_path).parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        if let Some(path) = env_str("NEWSRELAY_CONFIG") {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("newsrelay")
            .join("config.toml")
    }

    /// Secrets and deployment endpoints come from the environment when set.
    pub fn apply_env(&mut self) {
        if let Some(v) = env_str("DATABASE_PATH") {
            self.db_path = v;
        }
        if let Some(v) = env_str("REDIS_URL") {
            self.redis_url = Some(v);
        }
        if let Some(v) = env_str("DATA_KEYWORDS_PATH") {
            self.rules_path = Some(v);
        }
        if let Some(v) = env_bool("DRY_RUN") {
            self.dry_run = v;
        }
        if let Some(v) = env_str("OLLAMA_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = env_str("OLLAMA_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = env_str("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = Some(v);
        }
        if let Some(v) = env_str("TELEGRAM_TARGET_CHAT_ID").or_else(|| env_str("TELEGRAM_CHAT_ID")) {
            self.telegram.chat_id = Some(v);
        }
        if let Some(v) = env_str("WHATSAPP_BOT_BASE_URL") {
            self.whatsapp.base_url = Some(v);
        }
        if let Some(v) = env_str("MAKE_WEBHOOK_URL") {
            self.make.webhook_url = Some(v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.max_attempts < 1 {
            return Err(AppError::Config("pipeline.max_attempts must be >= 1".into()));
        }
        if self.pipeline.publish_max_workers < 1 {
            return Err(AppError::Config(
                "pipeline.publish_max_workers must be >= 1".into(),
            ));
        }
        if self.pipeline.run_every_minutes < 1 {
            return Err(AppError::Config("pipeline.run_every_minutes must be >= 1".into()));
        }
        if self.cache.ttl_secs < 1 {
            return Err(AppError::Config("cache.ttl_secs must be >= 1".into()));
        }
        if self.retry.max_attempts < 1 || self.make.max_attempts < 1 {
            return Err(AppError::Config("retry attempts must be >= 1".into()));
        }
        if self.breaker.failure_threshold < 1 {
            return Err(AppError::Config("breaker.failure_threshold must be >= 1".into()));
        }
        if self.render.max_chars < 100 {
            return Err(AppError::Config("render.max_chars must be >= 100".into()));
        }
        if !(0..=MAX_WINDOW_DAYS).contains(&self.dedup.window_days) {
            return Err(AppError::Config(format!(
                "dedup.window_days must be within 0..={MAX_WINDOW_DAYS}"
            )));
        }
        if !(0.0..=MAX_RECOVERY_TIMEOUT_SECS).contains(&self.breaker.recovery_timeout_secs) {
            return Err(AppError::Config(format!(
                "breaker.recovery_timeout_secs must be within 0..={MAX_RECOVERY_TIMEOUT_SECS}"
            )));
        }
        if !(0.0..=1.0).contains(&self.dedup.title_similarity) {
            return Err(AppError::Config(
                "dedup.title_similarity must be within 0.0..=1.0".into(),
            ));
        }
        Ok(())
    }
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| matches!(s.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config: Config = toml::from_str(
            r#"
            db_path = "/tmp/x.db"

            [pipeline]
            publish_max_workers = 8

            [llm]
            mode = "openai_compat"
            "#,
        )
        .unwrap();

        assert_eq!(config.pipeline.publish_max_workers, 8);
        assert_eq!(config.pipeline.max_attempts, 3);
        assert_eq!(config.llm.mode, LlmMode::OpenaiCompat);
        assert_eq!(config.cache.ttl_secs, 86_400);
        assert_eq!(config.dedup.window_days, 7);
        assert_eq!(config.telegram.max_message_chars, 4090);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let mut config = Config::default();
        config.pipeline.publish_max_workers = 0;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn validate_rejects_unusable_recovery_timeout() {
        let config: Config = toml::from_str("[breaker]\nrecovery_timeout_secs = inf\n").unwrap();
        assert!(matches!(config.validate(), Err(AppError::Config(_))));

        for bad in [f64::NAN, -1.0, 1e20] {
            let mut config = Config::default();
            config.breaker.recovery_timeout_secs = bad;
            assert!(matches!(config.validate(), Err(AppError::Config(_))), "{bad}");
        }

        let mut config = Config::default();
        config.breaker.recovery_timeout_secs = 0.5;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_bounds_dedup_window() {
        let mut config = Config::default();
        config.dedup.window_days = -1;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
        config.dedup.window_days = i64::MAX;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
        config.dedup.window_days = 30;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_db_path_is_in_app_data_dir() {
        let config = Config::default();
        let path = Path::new(&config.db_path);
        assert!(path.ends_with("newsrelay/pipeline.db"));
    }
}
