// src/domain/message.rs
// Message: a single turn (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Maice,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Maice => "maice",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Sender::User),
            "maice" => Some(Sender::Maice),
            _ => None,
        }
    }
}

/// Message-type taxonomy (§3). Visible types are shown in client-facing
/// history; internal/operational types are stored but filtered out by
/// `MessageType::is_visible`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    UserQuestion,
    UserClarificationResponse,
    UserFollowUp,
    MaiceClarificationQuestion,
    MaiceAnswer,
    MaiceFollowUp,
    // Internal/operational — never shown to the user.
    MaiceProcessing,
    Error,
    SummaryComplete,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::UserQuestion => "user_question",
            MessageType::UserClarificationResponse => "user_clarification_response",
            MessageType::UserFollowUp => "user_follow_up",
            MessageType::MaiceClarificationQuestion => "maice_clarification_question",
            MessageType::MaiceAnswer => "maice_answer",
            MessageType::MaiceFollowUp => "maice_follow_up",
            MessageType::MaiceProcessing => "maice_processing",
            MessageType::Error => "error",
            MessageType::SummaryComplete => "summary_complete",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user_question" => Some(MessageType::UserQuestion),
            "user_clarification_response" => Some(MessageType::UserClarificationResponse),
            "user_follow_up" => Some(MessageType::UserFollowUp),
            "maice_clarification_question" => Some(MessageType::MaiceClarificationQuestion),
            "maice_answer" => Some(MessageType::MaiceAnswer),
            "maice_follow_up" => Some(MessageType::MaiceFollowUp),
            "maice_processing" => Some(MessageType::MaiceProcessing),
            "error" => Some(MessageType::Error),
            "summary_complete" => Some(MessageType::SummaryComplete),
            _ => None,
        }
    }

    /// Types included in conversation history (§9 invariant: the assembled
    /// context "contains no messages of internal/operational types").
    pub fn is_visible(&self) -> bool {
        !matches!(
            self,
            MessageType::MaiceProcessing | MessageType::Error | MessageType::SummaryComplete
        )
    }

    /// §3 invariant: `user_*` types require `sender = user`, `maice_*` (and
    /// internal) types require `sender = maice`.
    pub fn expected_sender(&self) -> Sender {
        match self {
            MessageType::UserQuestion
            | MessageType::UserClarificationResponse
            | MessageType::UserFollowUp => Sender::User,
            _ => Sender::Maice,
        }
    }

    /// §3: clarification questions are never coalesced by the 30-second
    /// duplicate-suppression rule, since adjacent clarifications may share
    /// wording.
    pub fn exempt_from_dedup(&self) -> bool {
        matches!(self, MessageType::MaiceClarificationQuestion)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub session_id: i64,
    pub sender: Sender,
    pub content: String,
    pub message_type: MessageType,
    pub parent_id: Option<i64>,
    pub request_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_round_trips() {
        assert_eq!(Sender::from_str(Sender::User.as_str()), Some(Sender::User));
        assert_eq!(Sender::from_str(Sender::Maice.as_str()), Some(Sender::Maice));
    }

    #[test]
    fn internal_types_are_not_visible() {
        assert!(!MessageType::MaiceProcessing.is_visible());
        assert!(!MessageType::Error.is_visible());
        assert!(!MessageType::SummaryComplete.is_visible());
        assert!(MessageType::UserQuestion.is_visible());
        assert!(MessageType::MaiceAnswer.is_visible());
    }

    #[test]
    fn expected_sender_matches_prefix() {
        assert_eq!(MessageType::UserQuestion.expected_sender(), Sender::User);
        assert_eq!(MessageType::MaiceAnswer.expected_sender(), Sender::Maice);
    }

    #[test]
    fn only_clarification_question_exempt_from_dedup() {
        assert!(MessageType::MaiceClarificationQuestion.exempt_from_dedup());
        assert!(!MessageType::MaiceAnswer.exempt_from_dedup());
    }
}
