// src/llm/openai.rs
// Concrete streaming HTTP provider, generalized from the teacher's
// `llm/provider/openai/mod.rs` (non-stream call) and `llm/provider/gpt5.rs`
// (SSE byte-stream parsing). OpenAI-compatible Chat Completions endpoint;
// works against any provider (OpenAI, local vLLM, etc.) that speaks the same
// wire format, since §1 only asks for "one concrete HTTP-based streaming
// provider" behind the abstraction.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::StreamExt;
use serde_json::Value;
use tracing::debug;

use super::{ChatResponse, LlmProvider, Message, Role, TokenStream, TokenUsage};
use crate::config::agents::AgentModelConfig;
use crate::error::MaiceError;

pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiCompatProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn role_str(role: Role) -> &'static str {
        match role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    fn to_api_messages(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| serde_json::json!({"role": Self::role_str(m.role), "content": m.content}))
            .collect()
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn call(&self, messages: Vec<Message>, cfg: &AgentModelConfig) -> Result<ChatResponse, MaiceError> {
        let mut body = serde_json::json!({
            "model": cfg.model,
            "messages": Self::to_api_messages(&messages),
            "temperature": cfg.temperature,
            "max_tokens": cfg.max_tokens,
            "stream": false,
        });
        if cfg.json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .timeout(cfg.timeout())
            .json(&body)
            .send()
            .await
            .map_err(|e| MaiceError::LlmTransient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MaiceError::LlmTransient(format!("provider returned {status}: {text}")));
        }

        let json: Value = response.json().await.map_err(|e| MaiceError::LlmTransient(e.to_string()))?;
        let content = json["choices"][0]["message"]["content"].as_str().unwrap_or_default().to_string();
        debug!(model = %cfg.model, content_len = content.len(), "llm call complete");

        Ok(ChatResponse {
            content,
            usage: TokenUsage {
                prompt_tokens: json["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                completion_tokens: json["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
            },
        })
    }

    async fn stream(&self, messages: Vec<Message>, cfg: &AgentModelConfig) -> Result<TokenStream, MaiceError> {
        let body = serde_json::json!({
            "model": cfg.model,
            "messages": Self::to_api_messages(&messages),
            "temperature": cfg.temperature,
            "max_tokens": cfg.max_tokens,
            "stream": true,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .json(&body)
            .send()
            .await
            .map_err(|e| MaiceError::LlmTransient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MaiceError::LlmTransient(format!("provider returned {status}: {text}")));
        }

        // Parse the SSE byte stream into text deltas, following the
        // teacher's `gpt5.rs::stream` line-by-line `data: ` parsing, but
        // carrying a line buffer across chunk boundaries and yielding every
        // `data: ` event found in a chunk rather than just the first, since
        // a provider routinely packs several events into one TCP read.
        let mut byte_stream = response.bytes_stream();
        let text_stream = async_stream::stream! {
            let mut buf = String::new();
            loop {
                let chunk = match byte_stream.next().await {
                    Some(Ok(bytes)) => bytes,
                    Some(Err(e)) => {
                        yield Err(MaiceError::LlmStreamBroken(e.to_string()));
                        return;
                    }
                    None => return,
                };
                let Ok(text) = std::str::from_utf8(&chunk) else { continue };
                buf.push_str(text);

                // Only complete lines (newline-terminated) are parsed; any
                // trailing partial line stays in `buf` for the next chunk.
                while let Some(newline_at) = buf.find('\n') {
                    let line = buf[..newline_at].trim_end_matches('\r').trim().to_string();
                    buf.drain(..=newline_at);

                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }
                    let Some(data) = line.strip_prefix("data: ") else { continue };
                    if data == "[DONE]" {
                        return;
                    }
                    if let Ok(json) = serde_json::from_str::<Value>(data) {
                        let delta = json["choices"][0]["delta"]["content"].as_str().unwrap_or("");
                        if !delta.is_empty() {
                            yield Ok(delta.to_string());
                        }
                    }
                }
            }
        };

        Ok(Box::pin(text_stream))
    }
}
