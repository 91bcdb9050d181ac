// src/domain/clarification.rs
// Clarification Session (§3): ephemeral, held in the Clarifier's in-memory
// table keyed by session_id. The Router never touches this directly (§3
// Ownership) — only the Clarifier reads/writes it.

use serde::{Deserialize, Serialize};

/// One (question, answer) exchange in a clarification dialogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClarificationExchange {
    pub question: String,
    pub answer: String,
}

/// States of the Clarifier's per-session state machine (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClarificationState {
    Idle,
    Asking,
    AwaitingResponse,
    Evaluating,
    FinalizingAnswerable,
    FinalizingUnanswerable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClarificationSession {
    pub session_id: i64,
    pub original_question: String,
    pub context: String,
    pub missing_fields: Vec<String>,
    pub knowledge_code: String,
    pub clarification_count: u32,
    pub max_clarifications: u32,
    pub history: Vec<ClarificationExchange>,
    pub final_question: Option<String>,
    pub reclassified_knowledge_code: Option<String>,
    pub state: ClarificationState,
}

impl ClarificationSession {
    pub fn new(
        session_id: i64,
        original_question: impl Into<String>,
        context: impl Into<String>,
        missing_fields: Vec<String>,
        knowledge_code: impl Into<String>,
        max_clarifications: u32,
    ) -> Self {
        Self {
            session_id,
            original_question: original_question.into(),
            context: context.into(),
            missing_fields,
            knowledge_code: knowledge_code.into(),
            clarification_count: 0,
            max_clarifications,
            history: Vec::new(),
            final_question: None,
            reclassified_knowledge_code: None,
            state: ClarificationState::Idle,
        }
    }

    /// §3 invariant: `clarification_count <= max_clarifications`. Each count
    /// increment corresponds to one emitted clarification question.
    pub fn can_ask_again(&self) -> bool {
        self.clarification_count < self.max_clarifications
    }

    pub fn record_question(&mut self, question: &str) {
        self.clarification_count += 1;
        self.history.push(ClarificationExchange {
            question: question.to_string(),
            answer: String::new(),
        });
        self.state = ClarificationState::AwaitingResponse;
    }

    /// Fills in the answer for the most recent outstanding question. Per
    /// §4.5 step 1, the Router's authoritative history replaces this one on
    /// `process_clarification`, so this is only used when synthesizing a
    /// fresh exchange before that replacement lands.
    pub fn record_answer(&mut self, answer: &str) {
        if let Some(last) = self.history.last_mut() {
            if last.answer.is_empty() {
                last.answer = answer.to_string();
                return;
            }
        }
        self.history.push(ClarificationExchange {
            question: String::new(),
            answer: answer.to_string(),
        });
    }

    pub fn replace_history(&mut self, history: Vec<ClarificationExchange>) {
        self.history = history;
    }

    pub fn finalize_answerable(&mut self, final_question: String, knowledge_code: Option<String>) {
        self.final_question = Some(final_question);
        self.reclassified_knowledge_code = knowledge_code;
        self.state = ClarificationState::FinalizingAnswerable;
    }

    pub fn finalize_unanswerable(&mut self) {
        self.state = ClarificationState::FinalizingUnanswerable;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_session() -> ClarificationSession {
        ClarificationSession::new(1, "q", "ctx", vec!["unit".into()], "K3", 3)
    }

    #[test]
    fn can_ask_again_respects_max() {
        let mut s = new_session();
        assert!(s.can_ask_again());
        s.clarification_count = 3;
        assert!(!s.can_ask_again());
    }

    #[test]
    fn record_question_then_answer_pairs_up() {
        let mut s = new_session();
        s.record_question("which grade level?");
        assert_eq!(s.clarification_count, 1);
        s.record_answer("9th grade");
        assert_eq!(s.history.len(), 1);
        assert_eq!(s.history[0].answer, "9th grade");
    }
}
