// src/domain/session.rs
// Session: ordered conversation unit (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::MessageType;

/// `current_stage`. Invariant (§3): `current_stage = Clarification` iff the
/// last MAICE message was a clarification question and no answer has since
/// been produced. The Router is the sole writer of this field (§3
/// "Ownership").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStage {
    #[default]
    Initial,
    Clarification,
    GeneratingAnswer,
    ReadyForNewQuestion,
}

impl SessionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStage::Initial => "initial",
            SessionStage::Clarification => "clarification",
            SessionStage::GeneratingAnswer => "generating_answer",
            SessionStage::ReadyForNewQuestion => "ready_for_new_question",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "initial" => Some(SessionStage::Initial),
            "clarification" => Some(SessionStage::Clarification),
            "generating_answer" => Some(SessionStage::GeneratingAnswer),
            "ready_for_new_question" => Some(SessionStage::ReadyForNewQuestion),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub user_id: String,
    pub title: String,
    pub current_stage: SessionStage,
    pub last_message_type: Option<MessageType>,
    pub conversation_summary: Option<String>,
    pub last_summary_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: i64, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id: user_id.into(),
            title: String::new(),
            current_stage: SessionStage::Initial,
            last_message_type: None,
            conversation_summary: None,
            last_summary_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Role-inference table from §4.2, a pure function of session state.
    pub fn infer_role(&self) -> InferredRole {
        match (self.current_stage, self.last_message_type) {
            (SessionStage::Clarification, Some(MessageType::MaiceClarificationQuestion)) => {
                InferredRole::ClarificationResponse
            }
            (_, Some(MessageType::MaiceAnswer)) => InferredRole::FollowUpQuestion,
            _ => InferredRole::NewQuestion,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferredRole {
    NewQuestion,
    FollowUpQuestion,
    ClarificationResponse,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_round_trips() {
        for stage in [
            SessionStage::Initial,
            SessionStage::Clarification,
            SessionStage::GeneratingAnswer,
            SessionStage::ReadyForNewQuestion,
        ] {
            assert_eq!(SessionStage::from_str(stage.as_str()), Some(stage));
        }
    }

    #[test]
    fn role_inference_clarification_response() {
        let mut session = Session::new(1, "u1");
        session.current_stage = SessionStage::Clarification;
        session.last_message_type = Some(MessageType::MaiceClarificationQuestion);
        assert_eq!(session.infer_role(), InferredRole::ClarificationResponse);
    }

    #[test]
    fn role_inference_follow_up() {
        let mut session = Session::new(1, "u1");
        session.current_stage = SessionStage::ReadyForNewQuestion;
        session.last_message_type = Some(MessageType::MaiceAnswer);
        assert_eq!(session.infer_role(), InferredRole::FollowUpQuestion);
    }

    #[test]
    fn role_inference_defaults_to_new_question() {
        let session = Session::new(1, "u1");
        assert_eq!(session.infer_role(), InferredRole::NewQuestion);
    }
}
