// src/router/mod.rs
// Session Router (C8, §4.2): the single entry point. Infers role from
// session state, persists the incoming utterance, dispatches to the right
// agent pipeline, then relays bus traffic for this request back to the
// client as shaped SSE events until a terminal event is reached.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agents::classifier::ClassifyInput;
use crate::agents::clarifier::ProcessClarificationInput;
use crate::agents::{AnswerAgent, ClarifierAgent, ClassifierAgent, ObserverAgent};
use crate::bus::{EnvelopeType, MessageBus};
use crate::config::server::TimeoutConfig;
use crate::context::ContextAssembler;
use crate::domain::clarification::ClarificationExchange;
use crate::domain::{InferredRole, MessageType};
use crate::error::MaiceError;
use crate::repository::SessionRepository;

pub struct IncomingUtterance {
    pub session_id: Option<i64>,
    pub user_id: String,
    pub text: String,
}

pub struct SessionRouter {
    bus: Arc<MessageBus>,
    repository: Arc<dyn SessionRepository>,
    context: Arc<ContextAssembler>,
    classifier: Arc<ClassifierAgent>,
    clarifier: Arc<ClarifierAgent>,
    answer: Arc<AnswerAgent>,
    observer: Arc<ObserverAgent>,
    timeouts: TimeoutConfig,
}

impl SessionRouter {
    pub fn new(
        bus: Arc<MessageBus>,
        repository: Arc<dyn SessionRepository>,
        context: Arc<ContextAssembler>,
        classifier: Arc<ClassifierAgent>,
        clarifier: Arc<ClarifierAgent>,
        answer: Arc<AnswerAgent>,
        observer: Arc<ObserverAgent>,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self { bus, repository, context, classifier, clarifier, answer, observer, timeouts }
    }

    /// Entry point (§4.2): one SSE stream per accepted utterance. Spawns a
    /// per-utterance worker task; independent utterances never share mutable
    /// state (§4.2 "Concurrency").
    pub fn handle(self: Arc<Self>, incoming: IncomingUtterance) -> ReceiverStream<Value> {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            if let Err(err) = self.run(incoming, tx.clone()).await {
                warn!("router: utterance handling ended with error: {err}");
                let _ = tx.send(json!({"type": "error", "message": err.to_string()})).await;
            }
        });
        ReceiverStream::new(rx)
    }

    async fn run(&self, incoming: IncomingUtterance, tx: mpsc::Sender<Value>) -> Result<(), MaiceError> {
        // Step 1: session lifecycle.
        let session_id = match incoming.session_id {
            Some(id) => id,
            None => {
                let id = self
                    .repository
                    .create_session(&incoming.user_id, &incoming.text)
                    .await
                    .map_err(MaiceError::Repository)?;
                tx.send(json!({"type": "session_info", "session_id": id, "message": "session created"}))
                    .await
                    .ok();
                id
            }
        };

        let session = self.repository.get_session(session_id).await.map_err(MaiceError::Repository)?;
        let request_id = Uuid::new_v4().to_string();

        // Step 2: role inference.
        let role = session.infer_role();

        // Step 3 & 4: persist + dispatch.
        match role {
            InferredRole::ClarificationResponse => {
                self.repository
                    .save_user_message(
                        session_id,
                        &incoming.user_id,
                        &incoming.text,
                        MessageType::UserClarificationResponse,
                        None,
                        Some(&request_id),
                    )
                    .await
                    .map_err(MaiceError::Repository)?;

                let history = self.reconstruct_clarification_history(session_id, &incoming.text).await?;

                let clarifier = self.clarifier.clone();
                let answer = self.answer.clone();
                let observer = self.observer.clone();
                let input = ProcessClarificationInput {
                    session_id,
                    request_id: request_id.clone(),
                    answer: incoming.text.clone(),
                    authoritative_history: history,
                };
                tokio::spawn(async move {
                    if let Err(err) = clarifier.process_clarification(input, &answer, &observer).await {
                        warn!(session_id, "router: clarification processing failed: {err}");
                    }
                });
            }
            InferredRole::NewQuestion | InferredRole::FollowUpQuestion => {
                let is_follow_up = matches!(role, InferredRole::FollowUpQuestion);
                let message_type = if is_follow_up { MessageType::UserFollowUp } else { MessageType::UserQuestion };
                self.repository
                    .save_user_message(session_id, &incoming.user_id, &incoming.text, message_type, None, Some(&request_id))
                    .await
                    .map_err(MaiceError::Repository)?;

                let context = self.context.assemble(&session, is_follow_up, &request_id).await?;

                let classifier = self.classifier.clone();
                let clarifier = self.clarifier.clone();
                let answer = self.answer.clone();
                let observer = self.observer.clone();
                let input = ClassifyInput {
                    session_id,
                    request_id: request_id.clone(),
                    question: incoming.text.clone(),
                    context,
                    is_new_question: !is_follow_up,
                };
                tokio::spawn(async move {
                    if let Err(err) = classifier.classify(input, &clarifier, &answer, &observer).await {
                        warn!(session_id, "router: classification pipeline failed: {err}");
                    }
                });
            }
        }

        // Step 5: Relay Loop.
        self.relay_loop(session_id, &request_id, tx).await
    }

    /// Reassembles clarification history from persisted visible messages,
    /// since the repository contract (§6) has no dedicated clarification-
    /// exchange table; `maice_clarification_question` /
    /// `user_clarification_response` pairs are both visible types, so this
    /// is reconstructible from conversation history alone.
    async fn reconstruct_clarification_history(
        &self,
        session_id: i64,
        latest_answer: &str,
    ) -> Result<Vec<ClarificationExchange>, MaiceError> {
        let history = self
            .repository
            .get_conversation_history(session_id, None)
            .await
            .map_err(MaiceError::Repository)?;

        let mut exchanges = Vec::new();
        let mut pending_question: Option<String> = None;
        for message in history {
            match message.message_type {
                MessageType::MaiceClarificationQuestion => pending_question = Some(message.content),
                MessageType::UserClarificationResponse => {
                    if let Some(question) = pending_question.take() {
                        exchanges.push(ClarificationExchange { question, answer: message.content });
                    }
                }
                _ => {}
            }
        }
        if let Some(question) = pending_question {
            exchanges.push(ClarificationExchange { question, answer: latest_answer.to_string() });
        }
        Ok(exchanges)
    }

    /// §4.2 Relay Loop: read the session stream with short blocking reads;
    /// apply the action for each envelope matching this `request_id`.
    async fn relay_loop(&self, session_id: i64, request_id: &str, tx: mpsc::Sender<Value>) -> Result<(), MaiceError> {
        const CONSUMER: &str = "router";
        let deadline = Instant::now() + Duration::from_secs(self.timeouts.relay_phase_secs);
        let mut first_chunk_seen = false;

        loop {
            if Instant::now() >= deadline {
                tx.send(json!({"type": "error", "session_id": session_id, "message": "phase timed out"}))
                    .await
                    .ok();
                return Err(MaiceError::Timeout(Duration::from_secs(self.timeouts.relay_phase_secs)));
            }

            let envelopes = self.bus.read(session_id, CONSUMER, None, self.bus.default_block_ms()).await;
            for envelope in envelopes {
                if envelope.request_id() != Some(request_id) {
                    // Stale/foreign-request envelope on this session's
                    // stream (redelivery or a superseded request); ack and
                    // skip so it never blocks this relay loop (§4.1
                    // at-least-once, §7 idempotency).
                    self.bus.ack(session_id, CONSUMER, envelope.id);
                    continue;
                }

                let envelope_type = envelope.envelope_type();
                match envelope_type {
                    Some(EnvelopeType::ClassificationComplete) => {
                        let result: Value = envelope.field_json("result").unwrap_or(Value::Null);
                        if result.get("quality").and_then(Value::as_str) == Some("needs_clarify") {
                            self.repository
                                .update_session_stage(session_id, crate::domain::SessionStage::Clarification)
                                .await
                                .map_err(MaiceError::Repository)?;
                        }
                        tx.send(json!({
                            "type": "classification_complete",
                            "session_id": session_id,
                            "result": result,
                            "question": envelope.field("question"),
                            "is_new_question": envelope.field_bool("is_new_question"),
                        }))
                        .await
                        .ok();
                    }
                    Some(EnvelopeType::ClarificationQuestion) => {
                        let message = envelope.field("message").unwrap_or_default().to_string();
                        self.repository
                            .update_session_stage(session_id, crate::domain::SessionStage::Clarification)
                            .await
                            .map_err(MaiceError::Repository)?;
                        self.repository
                            .update_last_message_type(session_id, MessageType::MaiceClarificationQuestion)
                            .await
                            .map_err(MaiceError::Repository)?;
                        self.repository
                            .save_maice_message(
                                session_id,
                                &message,
                                MessageType::MaiceClarificationQuestion,
                                None,
                                Some(request_id),
                            )
                            .await
                            .map_err(MaiceError::Repository)?;
                        tx.send(json!({
                            "type": "clarification_question",
                            "session_id": session_id,
                            "message": message,
                            "question_index": envelope.field("question_index"),
                            "total_questions": envelope.field("total_questions"),
                        }))
                        .await
                        .ok();
                        self.bus.ack(session_id, CONSUMER, envelope.id);
                        return Ok(());
                    }
                    Some(EnvelopeType::ClarificationStatus) => {
                        tx.send(json!({
                            "type": "clarification_status",
                            "session_id": session_id,
                            "status": envelope.field("status"),
                            "message": envelope.field("message"),
                        }))
                        .await
                        .ok();
                    }
                    Some(EnvelopeType::StreamingChunk) => {
                        let is_final = envelope.field_bool("is_final");
                        if !first_chunk_seen {
                            first_chunk_seen = true;
                            self.repository
                                .update_session_stage(session_id, crate::domain::SessionStage::GeneratingAnswer)
                                .await
                                .map_err(MaiceError::Repository)?;
                            self.repository
                                .update_last_message_type(session_id, MessageType::MaiceAnswer)
                                .await
                                .map_err(MaiceError::Repository)?;
                        }
                        if is_final {
                            self.repository
                                .update_session_stage(session_id, crate::domain::SessionStage::ReadyForNewQuestion)
                                .await
                                .map_err(MaiceError::Repository)?;
                        }
                        tx.send(json!({
                            "type": "streaming_chunk",
                            "session_id": session_id,
                            "request_id": request_id,
                            "content": envelope.field("content"),
                            "chunk_index": envelope.field_u64("chunk_index"),
                            "is_final": is_final,
                        }))
                        .await
                        .ok();
                    }
                    Some(EnvelopeType::AnswerResult) => {
                        // Degenerate one-chunk stream (§9 design note):
                        // synthesize a single terminal chunk, then fall
                        // through to the same `answer_complete` shaping as
                        // `streaming_complete`.
                        let full_response = envelope.field("full_response").unwrap_or_default().to_string();
                        self.repository
                            .update_last_message_type(session_id, MessageType::MaiceAnswer)
                            .await
                            .map_err(MaiceError::Repository)?;
                        tx.send(json!({
                            "type": "streaming_chunk",
                            "session_id": session_id,
                            "request_id": request_id,
                            "content": full_response,
                            "chunk_index": 0,
                            "is_final": true,
                        }))
                        .await
                        .ok();
                        self.finish_answer(session_id, request_id, &full_response, &tx).await?;
                    }
                    Some(EnvelopeType::StreamingComplete) => {
                        let full_response = envelope.field("full_response").unwrap_or_default().to_string();
                        self.finish_answer(session_id, request_id, &full_response, &tx).await?;
                    }
                    Some(EnvelopeType::SummaryComplete) => {
                        let summary: Value = envelope.field_json("summary").unwrap_or(Value::Null);
                        let title = summary.get("title").and_then(Value::as_str).unwrap_or_default();
                        let summary_text = summary.get("summary").and_then(Value::as_str).unwrap_or_default();
                        if !summary_text.is_empty() {
                            // System-authored path, no caller user_id to check against;
                            // update the summary column directly rather than going
                            // through save_summary's ownership check.
                            self.repository.update_conversation_summary(session_id, summary_text).await.ok();
                        }
                        if !title.is_empty() {
                            self.repository.update_session_title(session_id, title).await.ok();
                        }
                        tx.send(json!({
                            "type": "summary_complete",
                            "session_id": session_id,
                            "summary": summary,
                            "status": "complete",
                            "ready_for_new_question": true,
                        }))
                        .await
                        .ok();
                        self.bus.ack(session_id, CONSUMER, envelope.id);
                        info!(session_id, %request_id, "router: relay loop terminal (summary_complete)");
                        return Ok(());
                    }
                    Some(EnvelopeType::Error) => {
                        let message = envelope.field("message").unwrap_or_default().to_string();
                        self.repository
                            .save_maice_message(session_id, &message, MessageType::Error, None, Some(request_id))
                            .await
                            .ok();
                        tx.send(json!({"type": "error", "session_id": session_id, "message": message})).await.ok();
                        self.bus.ack(session_id, CONSUMER, envelope.id);
                        info!(session_id, %request_id, "router: relay loop terminal (error)");
                        return Ok(());
                    }
                    _ => {}
                }

                self.bus.ack(session_id, CONSUMER, envelope.id);
            }
        }
    }

    async fn finish_answer(
        &self,
        session_id: i64,
        request_id: &str,
        full_response: &str,
        tx: &mpsc::Sender<Value>,
    ) -> Result<(), MaiceError> {
        self.repository
            .save_maice_message(session_id, full_response, MessageType::MaiceAnswer, None, Some(request_id))
            .await
            .map_err(MaiceError::Repository)?;
        // Both completion paths (batch AnswerResult and streaming
        // StreamingComplete) converge here, so this is the one place that
        // needs to guarantee current_stage reaches ready_for_new_question;
        // idempotent for the streaming path, which already set it on the
        // is_final chunk.
        self.repository
            .update_session_stage(session_id, crate::domain::SessionStage::ReadyForNewQuestion)
            .await
            .map_err(MaiceError::Repository)?;
        tx.send(json!({
            "type": "answer_complete",
            "session_id": session_id,
            "request_id": request_id,
            "full_response": full_response,
            "status": "complete",
        }))
        .await
        .ok();
        Ok(())
    }
}

