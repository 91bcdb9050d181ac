// src/llm/mock.rs
// Deterministic scripted provider for tests (SPEC_FULL.md §10 "Test
// tooling"): each agent's unit/integration tests script exact JSON or token
// sequences instead of hitting a network provider.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ChatResponse, LlmProvider, Message, TokenStream, TokenUsage};
use crate::config::agents::AgentModelConfig;
use crate::error::MaiceError;

/// A single scripted response: either a batch JSON/text reply for `call()`,
/// or a sequence of streaming deltas for `stream()`.
pub enum Script {
    Call(String),
    Stream(Vec<String>),
    Error(String),
}

pub struct MockLlmProvider {
    scripts: Mutex<Vec<Script>>,
    cursor: AtomicUsize,
    pub calls: Mutex<Vec<Vec<Message>>>,
}

impl MockLlmProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self { scripts: Mutex::new(scripts), cursor: AtomicUsize::new(0), calls: Mutex::new(Vec::new()) }
    }

    pub fn single_call(response: impl Into<String>) -> Self {
        Self::new(vec![Script::Call(response.into())])
    }

    pub fn single_stream(deltas: Vec<&str>) -> Self {
        Self::new(vec![Script::Stream(deltas.into_iter().map(|s| s.to_string()).collect())])
    }

    fn next(&self) -> Option<Script> {
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.scripts.lock();
        if idx < guard.len() {
            Some(std::mem::replace(&mut guard[idx], Script::Call(String::new())))
        } else {
            None
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn call(&self, messages: Vec<Message>, _cfg: &AgentModelConfig) -> Result<ChatResponse, MaiceError> {
        self.calls.lock().push(messages);
        match self.next() {
            Some(Script::Call(text)) => Ok(ChatResponse { content: text, usage: TokenUsage::default() }),
            Some(Script::Error(e)) => Err(MaiceError::LlmTransient(e)),
            Some(Script::Stream(_)) | None => {
                Err(MaiceError::LlmTransient("mock provider exhausted or mis-scripted".into()))
            }
        }
    }

    async fn stream(&self, messages: Vec<Message>, _cfg: &AgentModelConfig) -> Result<TokenStream, MaiceError> {
        self.calls.lock().push(messages);
        match self.next() {
            Some(Script::Stream(deltas)) => {
                let stream = futures::stream::iter(deltas.into_iter().map(Ok));
                Ok(Box::pin(stream))
            }
            Some(Script::Error(e)) => Err(MaiceError::LlmStreamBroken(e)),
            Some(Script::Call(_)) | None => {
                Err(MaiceError::LlmTransient("mock provider exhausted or mis-scripted".into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn call_returns_scripted_text() {
        let provider = MockLlmProvider::single_call(r#"{"quality":"answerable"}"#);
        let cfg = AgentModelConfig {
            model: "mock".into(),
            max_tokens: 10,
            temperature: 0.0,
            timeout_secs: 5,
            max_retries: 0,
            json_mode: true,
            stream: false,
        };
        let resp = provider.call(vec![Message::user("q")], &cfg).await.unwrap();
        assert_eq!(resp.content, r#"{"quality":"answerable"}"#);
    }

    #[tokio::test]
    async fn stream_yields_scripted_deltas_in_order() {
        let provider = MockLlmProvider::single_stream(vec!["Hello", ", ", "world"]);
        let cfg = AgentModelConfig {
            model: "mock".into(),
            max_tokens: 10,
            temperature: 0.0,
            timeout_secs: 5,
            max_retries: 0,
            json_mode: false,
            stream: true,
        };
        let mut stream = provider.stream(vec![Message::user("q")], &cfg).await.unwrap();
        let mut out = String::new();
        while let Some(delta) = stream.next().await {
            out.push_str(&delta.unwrap());
        }
        assert_eq!(out, "Hello, world");
    }
}
