// src/agents/answer.rs
// Answer Agent (C6, §4.6): streams the final answer token-by-token, or
// returns the fixed rejection text for unanswerable requests without ever
// calling the LLM (testable property #10).

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tracing::{info, warn};

use super::classifier::Quality;
use super::observer::{ObserverAgent, SummaryInput};
use crate::bus::{BroadcastEvent, Envelope, EnvelopeType, MessageBus};
use crate::config::agents::AgentModelConfig;
use crate::config::server::TimeoutConfig;
use crate::error::MaiceError;
use crate::llm::{LlmProvider, Message as LlmMessage};
use crate::prompt::{KnowledgeCode, PromptBuilder};
use crate::repository::SessionRepository;
use crate::domain::MessageType;

pub struct AnswerInput {
    pub session_id: i64,
    pub request_id: String,
    pub question: String,
    pub context: String,
    pub knowledge_code: String,
    pub quality: Quality,
    pub unanswerable_reason: Option<String>,
    pub clarification_summary: Option<String>,
}

pub struct AnswerAgent {
    bus: Arc<MessageBus>,
    repository: Arc<dyn SessionRepository>,
    llm: Arc<dyn LlmProvider>,
    prompts: Arc<dyn PromptBuilder>,
    cfg: AgentModelConfig,
    timeouts: TimeoutConfig,
}

impl AnswerAgent {
    pub fn new(
        bus: Arc<MessageBus>,
        repository: Arc<dyn SessionRepository>,
        llm: Arc<dyn LlmProvider>,
        prompts: Arc<dyn PromptBuilder>,
        cfg: AgentModelConfig,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self { bus, repository, llm, prompts, cfg, timeouts }
    }

    pub async fn answer(&self, input: AnswerInput, observer: &Arc<ObserverAgent>) -> Result<(), MaiceError> {
        // §9 Open Question / Design Note: emit only one completion path per
        // request. Unanswerable replies are a degenerate one-chunk stream
        // (`answer_result`, batch); answerable replies stream via
        // `streaming_chunk`s and their own `streaming_complete` envelope,
        // which `stream_answer` already sends — emitting `answer_result` too
        // would make the Router run its terminal handling twice.
        let full_text = match input.quality {
            Quality::Unanswerable => {
                let text = self.rejection_text(input.unanswerable_reason.as_deref());
                self.bus.send(
                    input.session_id,
                    Envelope::builder(EnvelopeType::AnswerResult, input.session_id, &input.request_id)
                        .field("full_response", &text)
                        .build(),
                )?;
                text
            }
            _ => match self.stream_answer(&input).await {
                Ok(text) => text,
                Err(err) => {
                    // §4.6: errors before the first chunk are fatal here;
                    // surface as an `error` envelope rather than silently
                    // dropping the turn.
                    self.bus.send(
                        input.session_id,
                        Envelope::builder(EnvelopeType::Error, input.session_id, &input.request_id)
                            .field("message", err.to_string())
                            .build(),
                    )?;
                    return Err(err);
                }
            },
        };

        self.bus.broadcast_publish(BroadcastEvent {
            event_type: EnvelopeType::GenerateSummary,
            session_id: input.session_id,
            request_id: input.request_id.clone(),
            payload: serde_json::json!({"question": input.question, "answer": full_text}),
        });

        self.repository
            .save_maice_message(input.session_id, &full_text, MessageType::MaiceAnswer, None, Some(&input.request_id))
            .await
            .map_err(MaiceError::Repository)?;

        observer
            .summarize(
                SummaryInput {
                    session_id: input.session_id,
                    request_id: input.request_id,
                    original_question: input.question,
                    full_answer: full_text,
                },
            )
            .await
    }

    fn rejection_text(&self, reason: Option<&str>) -> String {
        match reason {
            Some("clarification_failed") => {
                "I tried asking a few clarifying questions but still couldn't pin down exactly what you're \
                 asking. Could you rephrase your question with more detail — for example, the specific topic, \
                 grade level, or what you've already tried?"
                    .to_string()
            }
            _ => "MAICE only answers math questions. Please ask something about mathematics.".to_string(),
        }
    }

    /// §4.6 streaming protocol: emit one `streaming_chunk` per provider
    /// delta with a strictly increasing `chunk_index`, then a
    /// `streaming_complete` safety-net envelope with the full text.
    async fn stream_answer(&self, input: &AnswerInput) -> Result<String, MaiceError> {
        let knowledge_code = KnowledgeCode::from_str(&input.knowledge_code).unwrap_or(KnowledgeCode::K3);
        let (system, user) = self.prompts.answer_prompt(
            knowledge_code,
            &input.question,
            &input.context,
            input.clarification_summary.as_deref(),
        );
        let messages = vec![LlmMessage::system(system), LlmMessage::user(user)];

        let mut stream = self.llm.stream(messages, &self.cfg).await?;

        let mut full_text = String::new();
        let mut chunk_index: u64 = 0;
        let mut first_chunk_seen = false;

        while let Some(delta) = stream.next().await {
            let delta = match delta {
                Ok(delta) => delta,
                Err(err) => {
                    if first_chunk_seen {
                        warn!(session_id = input.session_id, "answer: stream broke mid-answer: {err}");
                        return Err(MaiceError::LlmStreamBroken(err.to_string()));
                    }
                    return Err(err);
                }
            };
            first_chunk_seen = true;
            full_text.push_str(&delta);

            self.send_chunk(input.session_id, &input.request_id, chunk_index, &delta, false).await?;
            chunk_index += 1;
        }

        self.send_chunk(input.session_id, &input.request_id, chunk_index, "", true).await?;

        self.bus.send(
            input.session_id,
            Envelope::builder(EnvelopeType::StreamingComplete, input.session_id, &input.request_id)
                .field("full_response", &full_text)
                .field("total_chunks", chunk_index.to_string())
                .build(),
        )?;

        info!(session_id = input.session_id, chunks = chunk_index, "answer: stream complete");
        Ok(full_text)
    }

    /// §5 "chunk send retry 3 with exponential back-off 100-400ms".
    async fn send_chunk(
        &self,
        session_id: i64,
        request_id: &str,
        chunk_index: u64,
        content: &str,
        is_final: bool,
    ) -> Result<(), MaiceError> {
        let mut attempt = 0u32;
        loop {
            let result = self.bus.send(
                session_id,
                Envelope::builder(EnvelopeType::StreamingChunk, session_id, request_id)
                    .field("content", content)
                    .field("chunk_index", chunk_index.to_string())
                    .field_bool("is_final", is_final)
                    .build(),
            );
            match result {
                Ok(_) => return Ok(()),
                Err(err) if attempt >= self.timeouts.chunk_send_retries => return Err(err),
                Err(_) => {
                    let backoff =
                        self.timeouts.chunk_retry_base_ms.saturating_mul(1 << attempt).min(self.timeouts.chunk_retry_max_ms);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
            }
        }
    }
}
