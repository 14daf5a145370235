pub mod client;
pub mod extract;
pub mod llm;
pub mod prompts;
pub mod schemas;

pub use client::{ChatBackend, HttpChatClient};
pub use llm::{DraftOutcome, LlmOrchestrator};
pub use schemas::{ClassifyResult, GenerateResult};
