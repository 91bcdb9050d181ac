// src/repository/mod.rs
// Session Repository (C2, §6): durable session state, message history, and
// summaries. External collaborator per §1, but SPEC_FULL.md §1/§10 commits
// to shipping a concrete SQLite implementation so the contract is exercised
// end-to-end, matching the teacher's habit of shipping sqlx-backed services
// rather than leaving traits unimplemented.

pub mod sqlite;

use async_trait::async_trait;

use crate::domain::{Message, MessageType, Session};
use crate::error::RepositoryError;

pub use sqlite::SqliteSessionRepository;

/// §6 Repository contract, realized as an async trait.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create_session(&self, user_id: &str, initial_question: &str) -> Result<i64, RepositoryError>;

    async fn save_user_message(
        &self,
        session_id: i64,
        user_id: &str,
        content: &str,
        message_type: MessageType,
        parent_id: Option<i64>,
        request_id: Option<&str>,
    ) -> Result<i64, RepositoryError>;

    /// Built-in 30-second duplicate suppression (§3), except for
    /// `maice_clarification_question`, which is never coalesced.
    async fn save_maice_message(
        &self,
        session_id: i64,
        content: &str,
        message_type: MessageType,
        parent_id: Option<i64>,
        request_id: Option<&str>,
    ) -> Result<i64, RepositoryError>;

    /// Filtered to visible types (§3, §6).
    async fn get_conversation_history(&self, session_id: i64, user_id: Option<&str>) -> Result<Vec<Message>, RepositoryError>;

    async fn get_recent_messages(&self, session_id: i64, limit: usize) -> Result<Vec<Message>, RepositoryError>;

    async fn get_session(&self, session_id: i64) -> Result<Session, RepositoryError>;

    async fn update_session_stage(&self, session_id: i64, stage: crate::domain::SessionStage) -> Result<(), RepositoryError>;

    async fn update_last_message_type(&self, session_id: i64, message_type: MessageType) -> Result<(), RepositoryError>;

    async fn save_summary(
        &self,
        session_id: i64,
        user_id: &str,
        original_question: &str,
        summary: &str,
        request_id: Option<&str>,
    ) -> Result<(), RepositoryError>;

    async fn update_conversation_summary(&self, session_id: i64, summary: &str) -> Result<(), RepositoryError>;

    async fn update_session_title(&self, session_id: i64, title: &str) -> Result<(), RepositoryError>;
}
