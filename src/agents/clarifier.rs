// src/agents/clarifier.rs
// Clarifier Agent (C5, §4.5): owns the clarification state machine, keyed by
// session_id in an in-memory table guarded by a table-level lock only for
// insert/delete (§5 "Shared resources"), matching the teacher's
// `parking_lot::RwLock<HashMap<...>>` registry idiom.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use super::answer::{AnswerAgent, AnswerInput};
use super::classifier::Quality;
use super::observer::ObserverAgent;
use super::call_with_retry;
use crate::bus::{BroadcastEvent, Envelope, EnvelopeType, MessageBus};
use crate::config::agents::AgentModelConfig;
use crate::config::security::SecurityConfig;
use crate::config::server::ClarificationConfig;
use crate::domain::clarification::{ClarificationExchange, ClarificationSession, ClarificationState};
use crate::error::MaiceError;
use crate::llm::{LlmProvider, Message as LlmMessage};
use crate::prompt::{PromptBuilder, echoes_separator, generate_separator};
use crate::repository::SessionRepository;

pub struct NeedClarificationInput {
    pub session_id: i64,
    pub request_id: String,
    pub original_question: String,
    pub context: String,
    pub missing_fields: Vec<String>,
    pub knowledge_code: String,
    pub seed_question: Option<String>,
}

pub struct ProcessClarificationInput {
    pub session_id: i64,
    pub request_id: String,
    pub answer: String,
    pub authoritative_history: Vec<ClarificationExchange>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EvaluationResult {
    evaluation: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    missing_field_coverage: Vec<String>,
    #[serde(default)]
    next_clarification: Option<String>,
    #[serde(default)]
    reclassified_knowledge_code: Option<String>,
    #[serde(default)]
    final_question: Option<String>,
}

pub struct ClarifierAgent {
    bus: Arc<MessageBus>,
    repository: Arc<dyn SessionRepository>,
    llm: Arc<dyn LlmProvider>,
    prompts: Arc<dyn PromptBuilder>,
    cfg: AgentModelConfig,
    security: SecurityConfig,
    clarification_cfg: ClarificationConfig,
    sessions: RwLock<HashMap<i64, ClarificationSession>>,
}

impl ClarifierAgent {
    pub fn new(
        bus: Arc<MessageBus>,
        repository: Arc<dyn SessionRepository>,
        llm: Arc<dyn LlmProvider>,
        prompts: Arc<dyn PromptBuilder>,
        cfg: AgentModelConfig,
        security: SecurityConfig,
        clarification_cfg: ClarificationConfig,
    ) -> Self {
        Self {
            bus,
            repository,
            llm,
            prompts,
            cfg,
            security,
            clarification_cfg,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// §4.5 "On need_clarification": create the Clarification Session, pick
    /// the seed question, emit it, and await the next user reply.
    pub async fn start_clarification(
        &self,
        input: NeedClarificationInput,
        answer: &Arc<AnswerAgent>,
        observer: &Arc<ObserverAgent>,
    ) -> Result<(), MaiceError> {
        let mut session = ClarificationSession::new(
            input.session_id,
            input.original_question.clone(),
            input.context.clone(),
            input.missing_fields.clone(),
            input.knowledge_code.clone(),
            self.clarification_cfg.max_clarifications,
        );

        let question = match input.seed_question {
            Some(q) if !q.trim().is_empty() => q,
            _ => self.synthesize_seed_question(&input).await?,
        };

        session.record_question(&question);
        let question_index = session.clarification_count;
        self.sessions.write().insert(input.session_id, session);

        self.bus.send(
            input.session_id,
            Envelope::builder(EnvelopeType::ClarificationQuestion, input.session_id, &input.request_id)
                .field("message", &question)
                .field("question_index", question_index.to_string())
                .field("total_questions", self.clarification_cfg.max_clarifications.to_string())
                .build(),
        )?;

        // Unused until the Router's next dispatch routes a clarification_response
        // here; keep the references alive for the compiler (the real chain
        // continues in `process_clarification`).
        let _ = (answer, observer);
        Ok(())
    }

    async fn synthesize_seed_question(&self, input: &NeedClarificationInput) -> Result<String, MaiceError> {
        let (system, user) =
            self.prompts.clarification_seed_prompt(&input.knowledge_code, &input.missing_fields, &input.context);
        let response =
            call_with_retry(self.llm.as_ref(), vec![LlmMessage::system(system), LlmMessage::user(user)], &self.cfg)
                .await?;
        Ok(response.content)
    }

    /// §4.5 "On process_clarification": replace history with the Router's
    /// authoritative copy, evaluate, and apply the PASS / NEED_MORE outcome.
    pub async fn process_clarification(
        &self,
        input: ProcessClarificationInput,
        answer: &Arc<AnswerAgent>,
        observer: &Arc<ObserverAgent>,
    ) -> Result<(), MaiceError> {
        let mut session = match self.sessions.write().remove(&input.session_id) {
            Some(session) => session,
            None => {
                // Defensive: a redelivered/duplicate envelope with no live
                // clarification session. Nothing to evaluate.
                info!(session_id = input.session_id, "clarifier: process_clarification with no live session");
                return Ok(());
            }
        };
        session.replace_history(input.authoritative_history);
        session.state = ClarificationState::Evaluating;

        let separator = generate_separator(&self.security);
        let (system, user) = self.prompts.clarification_evaluation_prompt(
            &session.original_question,
            &session.missing_fields,
            &session.history,
            session.clarification_count,
            &separator,
        );
        let response =
            call_with_retry(self.llm.as_ref(), vec![LlmMessage::system(system), LlmMessage::user(user)], &self.cfg)
                .await?;

        if echoes_separator(&response.content, &separator) {
            info!(session_id = input.session_id, "clarifier: evaluation output echoed separator, giving up");
            return self.give_up(input.session_id, input.request_id, session, answer, observer).await;
        }

        let parsed: Value = serde_json::from_str(&response.content).unwrap_or_else(|_| json!({}));
        let result: EvaluationResult = serde_json::from_value(parsed).unwrap_or(EvaluationResult {
            evaluation: "NEED_MORE".to_string(),
            confidence: 0.0,
            reasoning: String::new(),
            missing_field_coverage: Vec::new(),
            next_clarification: None,
            reclassified_knowledge_code: None,
            final_question: None,
        });

        match result.evaluation.as_str() {
            "PASS" => self.pass(input.session_id, input.request_id, session, result, answer, observer).await,
            _ if session.can_ask_again() => {
                self.ask_again(input.session_id, input.request_id, session, result).await
            }
            _ => self.give_up(input.session_id, input.request_id, session, answer, observer).await,
        }
    }

    async fn pass(
        &self,
        session_id: i64,
        request_id: String,
        mut session: ClarificationSession,
        result: EvaluationResult,
        answer: &Arc<AnswerAgent>,
        observer: &Arc<ObserverAgent>,
    ) -> Result<(), MaiceError> {
        let final_question = result.final_question.unwrap_or_else(|| session.original_question.clone());
        let knowledge_code = result.reclassified_knowledge_code.unwrap_or_else(|| session.knowledge_code.clone());
        session.finalize_answerable(final_question.clone(), Some(knowledge_code.clone()));

        self.bus.send(
            session_id,
            Envelope::builder(EnvelopeType::ClarificationStatus, session_id, &request_id)
                .field("status", "sufficient")
                .field("message", "Clarification complete, generating answer.")
                .build(),
        )?;
        self.bus.broadcast_publish(BroadcastEvent {
            event_type: EnvelopeType::ClarificationSufficient,
            session_id,
            request_id: request_id.clone(),
            payload: json!({"final_question": final_question}),
        });

        let clarification_summary = summarize_history(&session.history);

        answer
            .answer(
                AnswerInput {
                    session_id,
                    request_id,
                    question: final_question,
                    context: session.context.clone(),
                    knowledge_code,
                    quality: Quality::Answerable,
                    unanswerable_reason: None,
                    clarification_summary: Some(clarification_summary),
                },
                observer,
            )
            .await
    }

    async fn ask_again(
        &self,
        session_id: i64,
        request_id: String,
        mut session: ClarificationSession,
        result: EvaluationResult,
    ) -> Result<(), MaiceError> {
        let question = result
            .next_clarification
            .filter(|q| !q.trim().is_empty())
            .unwrap_or_else(|| "Could you be more specific about what you're asking?".to_string());
        session.record_question(&question);
        let question_index = session.clarification_count;
        self.sessions.write().insert(session_id, session);

        self.bus.send(
            session_id,
            Envelope::builder(EnvelopeType::ClarificationQuestion, session_id, &request_id)
                .field("message", &question)
                .field("question_index", question_index.to_string())
                .field("total_questions", self.clarification_cfg.max_clarifications.to_string())
                .build(),
        )?;
        Ok(())
    }

    /// §4.5 "NEED_MORE with clarification_count >= max_clarifications": give
    /// up and hand off to the Answer Agent with the deterministic rejection.
    async fn give_up(
        &self,
        session_id: i64,
        request_id: String,
        session: ClarificationSession,
        answer: &Arc<AnswerAgent>,
        observer: &Arc<ObserverAgent>,
    ) -> Result<(), MaiceError> {
        let attempts = session.clarification_count;
        info!(session_id, attempts, "clarifier: exhausted, handing off unanswerable");

        answer
            .answer(
                AnswerInput {
                    session_id,
                    request_id,
                    question: session.original_question.clone(),
                    context: session.context.clone(),
                    knowledge_code: session.knowledge_code.clone(),
                    quality: Quality::Unanswerable,
                    unanswerable_reason: Some("clarification_failed".to_string()),
                    clarification_summary: Some(summarize_history(&session.history)),
                },
                observer,
            )
            .await
    }
}

fn summarize_history(history: &[ClarificationExchange]) -> String {
    history.iter().map(|e| format!("Q: {}\nA: {}", e.question, e.answer)).collect::<Vec<_>>().join("\n")
}
