// src/llm/mod.rs
// LLM provider contract (§6): `call(messages, {model, max_tokens,
// temperature?, stream, json_mode?, timeout, retries}) -> either non-stream
// {content, usage} or async iterator of deltas`. Abstracted as an
// `LlmProvider` trait, grounded on the teacher's `llm/provider::LlmProvider`
// trait shape (`backend/src/llm/provider/openai/mod.rs`,
// `backend/src/llm/provider/gpt5.rs`).

pub mod mock;
pub mod openai;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::config::agents::AgentModelConfig;
use crate::error::MaiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub usage: TokenUsage,
}

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, MaiceError>> + Send>>;

/// One LLM call contract, configured per-agent (§6): classifier/clarifier/
/// observer call `call()` in JSON mode; the Answer agent calls `stream()`.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Non-streamed call, used for JSON-mode classification/clarification/
    /// observation. Bounded retries with exponential back-off are the
    /// caller's responsibility (agents retry, not the provider) so that
    /// retry policy can differ by agent per §5 timeouts.
    async fn call(&self, messages: Vec<Message>, cfg: &AgentModelConfig) -> Result<ChatResponse, MaiceError>;

    /// Streaming call, used by the Answer Agent. Returns an async stream of
    /// text deltas; an empty final delta marks natural termination.
    async fn stream(&self, messages: Vec<Message>, cfg: &AgentModelConfig) -> Result<TokenStream, MaiceError>;
}
