use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Async database error: {0}")]
    AsyncDatabase(#[from] tokio_rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("KV store error: {0}")]
    Kv(String),

    #[error("Circuit open for {service}")]
    CircuitOpen { service: String },

    #[error("Rate limit exceeded for {channel}: {limit_type} {current}/{limit}")]
    RateLimited {
        channel: String,
        limit_type: String,
        current: u64,
        limit: u64,
    },

    #[error("publish blocked by pause (pause_all_publish=true)")]
    PublishPaused,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("LLM response error: {0}")]
    LlmResponse(String),

    #[error("{channel} send failed: {message}")]
    Channel { channel: String, message: String },

    #[error("Invalid status transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn channel(channel: &str, message: impl Into<String>) -> Self {
        AppError::Channel {
            channel: channel.to_string(),
            message: message.into(),
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, AppError::CircuitOpen { .. })
    }

    /// Open breakers, rate limits and operator pauses are never retried in the same cycle.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            AppError::CircuitOpen { .. } | AppError::RateLimited { .. } | AppError::PublishPaused
        )
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
