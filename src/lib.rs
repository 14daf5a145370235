pub mod ai;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod context;
pub mod db;
pub mod dedup;
pub mod error;
pub mod kv;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod publish;
pub mod ratelimit;
pub mod render;
pub mod retry;
pub mod scoring;

pub use config::Config;
pub use context::AppContext;
pub use error::{AppError, Result};
pub use pipeline::{Pipeline, PipelineRun};
