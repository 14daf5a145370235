use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{LlmConfig, LlmMode};
use crate::error::{AppError, Result};

/// A chat-completion endpoint that answers one system + user prompt pair.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn model(&self) -> &str;

    async fn chat(&self, system: &str, user: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

/// Either `{message: {content}}` (native) or `{choices: [{message: {content}}]}`.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ResponseMessage>,
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatResponse {
    fn into_content(self, mode: LlmMode) -> String {
        let message = match mode {
            LlmMode::Native => self.message,
            LlmMode::OpenaiCompat => self.choices.into_iter().next().and_then(|c| c.message),
        };
        message
            .and_then(|m| m.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default()
    }
}

pub struct HttpChatClient {
    client: Client,
    endpoint: String,
    model: String,
    mode: LlmMode,
}

impl HttpChatClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: chat_endpoint(&config.base_url, config.mode),
            model: config.model.clone(),
            mode: config.mode,
        })
    }
}

/// A trailing `/v1` on the base URL is ignored; the path comes from the mode.
fn chat_endpoint(base_url: &str, mode: LlmMode) -> String {
    let mut base = base_url.trim_end_matches('/');
    if let Some(stripped) = base.strip_suffix("/v1") {
        base = stripped.trim_end_matches('/');
    }
    match mode {
        LlmMode::Native => format!("{base}/api/chat"),
        LlmMode::OpenaiCompat => format!("{base}/v1/chat/completions"),
    }
}

#[async_trait]
impl ChatBackend for HttpChatClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: user,
                },
            ],
            stream: false,
        };

        let response = self.client.post(&self.endpoint).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::LlmResponse(format!(
                "HTTP {status}: {}",
                error_text.chars().take(300).collect::<String>()
            )));
        }

        let body: ChatResponse = response.json().await?;
        let content = body.into_content(self.mode);
        debug!(chars = content.len(), "llm reply received");
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_per_mode() {
        assert_eq!(
            chat_endpoint("http://ollama:11434/", LlmMode::Native),
            "http://ollama:11434/api/chat"
        );
        assert_eq!(
            chat_endpoint("http://ollama:11434/v1", LlmMode::OpenaiCompat),
            "http://ollama:11434/v1/chat/completions"
        );
    }

    #[test]
    fn parses_both_response_shapes() {
        let native: ChatResponse =
            serde_json::from_str(r#"{"message": {"role": "assistant", "content": " {\"a\":1} "}}"#)
                .unwrap();
        assert_eq!(native.into_content(LlmMode::Native), r#"{"a":1}"#);

        let compat: ChatResponse = serde_json::from_str(
            r#"{"choices": [{"index": 0, "message": {"content": "hello"}}]}"#,
        )
        .unwrap();
        assert_eq!(compat.into_content(LlmMode::OpenaiCompat), "hello");

        let empty: ChatResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.into_content(LlmMode::OpenaiCompat), "");
    }
}
