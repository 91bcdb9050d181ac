// src/agents/observer.rs
// Observer Agent (C7, §4.7): per-turn title/summary/key-concepts generation,
// plus a background incremental-summarization mode driven by the Context
// Assembler's `update_summary` advisory.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::call_with_retry;
use crate::bus::{Envelope, EnvelopeType, MessageBus};
use crate::config::agents::AgentModelConfig;
use crate::config::memory::MemoryConfig;
use crate::error::MaiceError;
use crate::llm::{LlmProvider, Message as LlmMessage};
use crate::prompt::PromptBuilder;
use crate::repository::SessionRepository;

pub struct SummaryInput {
    pub session_id: i64,
    pub request_id: String,
    pub original_question: String,
    pub full_answer: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryPayload {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_concepts: Vec<String>,
    #[serde(default)]
    pub student_progress: String,
}

pub struct ObserverAgent {
    bus: Arc<MessageBus>,
    repository: Arc<dyn SessionRepository>,
    llm: Arc<dyn LlmProvider>,
    prompts: Arc<dyn PromptBuilder>,
    cfg: AgentModelConfig,
    memory: MemoryConfig,
}

impl ObserverAgent {
    pub fn new(
        bus: Arc<MessageBus>,
        repository: Arc<dyn SessionRepository>,
        llm: Arc<dyn LlmProvider>,
        prompts: Arc<dyn PromptBuilder>,
        cfg: AgentModelConfig,
        memory: MemoryConfig,
    ) -> Self {
        Self { bus, repository, llm, prompts, cfg, memory }
    }

    /// §4.7 mode 1, "per-turn": fired by the Answer Agent after completion.
    /// The Router (not this agent) persists title/summary on receiving
    /// `summary_complete`, per the Relay Loop table in §4.2.
    pub async fn summarize(&self, input: SummaryInput) -> Result<(), MaiceError> {
        self.bus.send(
            input.session_id,
            Envelope::builder(EnvelopeType::SummaryStart, input.session_id, &input.request_id).build(),
        )?;

        let conversation_text = format!("Student: {}\nMAICE: {}", input.original_question, input.full_answer);
        let (system, user) = self.prompts.observer_summary_prompt(&conversation_text);

        let result = call_with_retry(self.llm.as_ref(), vec![LlmMessage::system(system), LlmMessage::user(user)], &self.cfg).await;

        let payload = match result {
            Ok(response) => self.parse_payload(&response.content),
            Err(err) => {
                warn!(session_id = input.session_id, "observer: summary llm call failed, using fallback: {err}");
                SummaryPayload {
                    title: truncate(&input.original_question, self.memory.title_max_chars),
                    summary: truncate(&input.full_answer, self.memory.summary_max_chars),
                    key_concepts: Vec::new(),
                    student_progress: String::new(),
                }
            }
        };

        self.bus.send(
            input.session_id,
            Envelope::builder(EnvelopeType::SummaryProgress, input.session_id, &input.request_id)
                .field("message", "summarizing conversation")
                .build(),
        )?;

        self.bus.send(
            input.session_id,
            Envelope::builder(EnvelopeType::SummaryComplete, input.session_id, &input.request_id)
                .field("status", "complete")
                .field_bool("ready_for_new_question", true)
                .field_json("summary", &payload)
                .build(),
        )?;

        info!(session_id = input.session_id, "observer: per-turn summary complete");
        Ok(())
    }

    fn parse_payload(&self, raw: &str) -> SummaryPayload {
        let parsed: Value = serde_json::from_str(raw).unwrap_or(Value::Null);
        let mut payload: SummaryPayload = serde_json::from_value(parsed).unwrap_or_default();
        payload.title = truncate(&payload.title, self.memory.title_max_chars);
        payload.summary = truncate(&payload.summary, self.memory.summary_max_chars);
        payload
    }

    /// §4.7 mode 2, "incremental": background re-summarization triggered by
    /// the Context Assembler's `update_summary` advisory. Never blocks
    /// user-facing paths; persists directly since there is no Router relay
    /// loop waiting on this path.
    pub async fn handle_update_summary(&self, session_id: i64, older_messages: &str) -> Result<(), MaiceError> {
        let session = self.repository.get_session(session_id).await.map_err(MaiceError::Repository)?;
        let (system, user) =
            self.prompts.observer_incremental_prompt(session.conversation_summary.as_deref(), older_messages);
        let response =
            call_with_retry(self.llm.as_ref(), vec![LlmMessage::system(system), LlmMessage::user(user)], &self.cfg)
                .await?;

        let parsed: Value = serde_json::from_str(&response.content).unwrap_or(Value::Null);
        let summary = parsed.get("summary").and_then(Value::as_str).unwrap_or(&response.content);
        let summary = truncate(summary, self.memory.summary_max_chars);

        self.repository.update_conversation_summary(session_id, &summary).await.map_err(MaiceError::Repository)?;
        info!(session_id, "observer: incremental summary updated");
        Ok(())
    }

    /// Long-lived background task (spawned once at startup) driving the
    /// incremental mode from `update_summary` broadcast advisories across all
    /// sessions.
    pub async fn run_incremental_listener(self: Arc<Self>) {
        let mut rx = self.bus.broadcast_subscribe();
        loop {
            match rx.recv().await {
                Ok(event) if event.event_type == EnvelopeType::UpdateSummary => {
                    let older_messages = event.payload.get("older_messages").and_then(Value::as_str).unwrap_or("").to_string();
                    let observer = self.clone();
                    tokio::spawn(async move {
                        if let Err(err) = observer.handle_update_summary(event.session_id, &older_messages).await {
                            warn!(session_id = event.session_id, "observer: incremental summarization failed: {err}");
                        }
                    });
                }
                Ok(_) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "observer: incremental listener lagged behind broadcast channel");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    truncated.push('\u{2026}');
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_adds_ellipsis_when_over_limit() {
        let long = "a".repeat(60);
        let truncated = truncate(&long, 50);
        assert_eq!(truncated.chars().count(), 50);
        assert!(truncated.ends_with('\u{2026}'));
    }

    #[test]
    fn truncate_leaves_short_text_untouched() {
        assert_eq!(truncate("short", 50), "short");
    }
}
