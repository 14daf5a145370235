use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::client::ChatBackend;
use super::extract::extract_json;
use super::prompts;
use super::schemas::{validate_generate_payload, ClassifyResult, GenerateResult};
use crate::cache::{classify_key, generate_key, prompt_hash, ResultCache};
use crate::error::{AppError, Result};
use crate::models::Template;

const RAW_EXCERPT_CHARS: usize = 500;

/// Classification plus the validated payload for the chosen template.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftOutcome {
    pub classification: ClassifyResult,
    pub template: Template,
    pub payload: Value,
}

/// Prompts the chat backend, extracts and validates JSON, and caches validated results.
pub struct LlmOrchestrator {
    backend: Arc<dyn ChatBackend>,
    cache: Arc<ResultCache>,
    max_json_retry: u32,
}

impl LlmOrchestrator {
    pub fn new(backend: Arc<dyn ChatBackend>, cache: Arc<ResultCache>, max_json_retry: u32) -> Self {
        Self {
            backend,
            cache,
            max_json_retry,
        }
    }

    pub async fn classify(
        &self,
        title: &str,
        summary: Option<&str>,
        source_name: Option<&str>,
    ) -> Result<ClassifyResult> {
        let user = prompts::classify_prompt(title, summary.unwrap_or(""), source_name.unwrap_or(""));
        self.complete(prompts::CLASSIFY_SYSTEM, &user, classify_key, |value| {
            serde_json::from_value::<ClassifyResult>(value)
                .map_err(|e| AppError::Validation(format!("classify result: {e}")))
        })
        .await
    }

    pub async fn generate(
        &self,
        title: &str,
        summary: Option<&str>,
        template: Template,
        risk: Option<&str>,
    ) -> Result<GenerateResult> {
        let system = prompts::generate_system(template);
        let user = prompts::generate_prompt(title, summary.unwrap_or(""), template, risk.unwrap_or(""));
        self.complete(system, &user, generate_key, |value| {
            let payload = unwrap_payload(value);
            Ok(GenerateResult {
                payload: validate_generate_payload(payload, template)?,
            })
        })
        .await
    }

    /// Classify, then generate for the classified template. `risk` is the scoring risk,
    /// used when the classifier does not name one.
    pub async fn draft(
        &self,
        title: &str,
        summary: Option<&str>,
        source_name: Option<&str>,
        risk: Option<&str>,
    ) -> Result<DraftOutcome> {
        let classification = self.classify(title, summary, source_name).await?;
        let template = classification.template();
        let risk = classification.risk.as_deref().or(risk);
        let generated = self.generate(title, summary, template, risk).await?;
        Ok(DraftOutcome {
            classification,
            template,
            payload: generated.payload,
        })
    }

    async fn complete<T, K, P>(&self, system: &str, user: &str, key: K, parse: P) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        K: Fn(&str) -> String,
        P: Fn(Value) -> Result<T>,
    {
        let cache_key = key(&prompt_hash(self.backend.model(), system, user));
        if let Some(hit) = self.cache.get::<T>(&cache_key).await {
            return Ok(hit);
        }

        let mut last_error = None;
        for attempt in 0..=self.max_json_retry {
            let prompt = if attempt == 0 {
                user.to_string()
            } else {
                info!(attempt, "retrying llm call with strict json correction");
                format!("{user}{}", prompts::STRICT_JSON_REPAIR)
            };
            // transport errors are not a formatting problem, so they end the loop
            let raw = self.backend.chat(system, &prompt).await?;

            match parse_reply(&raw).and_then(&parse) {
                Ok(result) => {
                    self.cache.set(&cache_key, &result).await;
                    debug!(attempt, "llm reply validated");
                    return Ok(result);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "llm reply rejected");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AppError::LlmResponse("no reply".into())))
    }
}

fn parse_reply(raw: &str) -> Result<Value> {
    let excerpt = || raw.chars().take(RAW_EXCERPT_CHARS).collect::<String>();
    let json = extract_json(raw)
        .ok_or_else(|| AppError::LlmResponse(format!("no JSON object in reply: {}", excerpt())))?;
    serde_json::from_str(json)
        .map_err(|e| AppError::LlmResponse(format!("invalid JSON ({e}): {}", excerpt())))
}

/// Models sometimes answer with the payload object itself instead of `{"payload": {...}}`.
fn unwrap_payload(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("payload") => {
            map.remove("payload").unwrap_or(Value::Null)
        }
        other => other,
    }
}
