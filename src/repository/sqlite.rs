// src/repository/sqlite.rs
// SQLite-backed SessionRepository. Follows the teacher's convention of
// plain `query_as`/`query` calls against inline SQL rather than
// compile-time-checked `sqlx::query!` macros (which require a live DB at
// build time) — this crate creates its schema inline on startup instead of
// shipping a migrations directory, matching that same habit.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use super::SessionRepository;
use crate::domain::{Message, MessageType, Sender, Session, SessionStage};
use crate::error::RepositoryError;

pub struct SqliteSessionRepository {
    pool: SqlitePool,
}

impl SqliteSessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates the schema if it does not exist. Called once at startup.
    pub async fn ensure_schema(&self) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                current_stage TEXT NOT NULL DEFAULT 'initial',
                last_message_type TEXT,
                conversation_summary TEXT,
                last_summary_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL,
                sender TEXT NOT NULL,
                content TEXT NOT NULL,
                message_type TEXT NOT NULL,
                parent_id INTEGER,
                request_id TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, created_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn session_owner(&self, session_id: i64) -> Result<String, RepositoryError> {
        let row = sqlx::query("SELECT user_id FROM sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepositoryError::SessionNotFound(session_id))?;
        Ok(row.try_get::<String, _>("user_id")?)
    }

    async fn assert_owner(&self, session_id: i64, user_id: &str) -> Result<(), RepositoryError> {
        let owner = self.session_owner(session_id).await?;
        if owner != user_id {
            return Err(RepositoryError::PermissionDenied { session_id, user_id: user_id.to_string() });
        }
        Ok(())
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, RepositoryError> {
        let sender_str: String = row.try_get("sender")?;
        let type_str: String = row.try_get("message_type")?;
        let created_at_str: String = row.try_get("created_at")?;
        Ok(Message {
            id: row.try_get("id")?,
            session_id: row.try_get("session_id")?,
            sender: Sender::from_str(&sender_str).unwrap_or(Sender::Maice),
            content: row.try_get("content")?,
            message_type: MessageType::from_str(&type_str).unwrap_or(MessageType::MaiceProcessing),
            parent_id: row.try_get("parent_id")?,
            request_id: row.try_get("request_id")?,
            created_at: parse_timestamp(&created_at_str),
        })
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl SessionRepository for SqliteSessionRepository {
    async fn create_session(&self, user_id: &str, initial_question: &str) -> Result<i64, RepositoryError> {
        let now = Utc::now().to_rfc3339();
        let title: String = initial_question.chars().take(50).collect();
        let result = sqlx::query(
            "INSERT INTO sessions (user_id, title, current_stage, created_at, updated_at) VALUES (?, ?, 'initial', ?, ?)",
        )
        .bind(user_id)
        .bind(title)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn save_user_message(
        &self,
        session_id: i64,
        user_id: &str,
        content: &str,
        message_type: MessageType,
        parent_id: Option<i64>,
        request_id: Option<&str>,
    ) -> Result<i64, RepositoryError> {
        self.assert_owner(session_id, user_id).await?;
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO messages (session_id, sender, content, message_type, parent_id, request_id, created_at) \
             VALUES (?, 'user', ?, ?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(content)
        .bind(message_type.as_str())
        .bind(parent_id)
        .bind(request_id)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    async fn save_maice_message(
        &self,
        session_id: i64,
        content: &str,
        message_type: MessageType,
        parent_id: Option<i64>,
        request_id: Option<&str>,
    ) -> Result<i64, RepositoryError> {
        if !message_type.exempt_from_dedup() {
            let cutoff = (Utc::now() - ChronoDuration::seconds(30)).to_rfc3339();
            let existing = sqlx::query(
                "SELECT id FROM messages WHERE session_id = ? AND content = ? AND message_type = ? \
                 AND created_at >= ? ORDER BY created_at DESC LIMIT 1",
            )
            .bind(session_id)
            .bind(content)
            .bind(message_type.as_str())
            .bind(&cutoff)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(row) = existing {
                let id: i64 = row.try_get("id")?;
                debug!(session_id, message_type = message_type.as_str(), "coalesced duplicate maice message");
                return Ok(id);
            }
        }

        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO messages (session_id, sender, content, message_type, parent_id, request_id, created_at) \
             VALUES (?, 'maice', ?, ?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(content)
        .bind(message_type.as_str())
        .bind(parent_id)
        .bind(request_id)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    async fn get_conversation_history(&self, session_id: i64, user_id: Option<&str>) -> Result<Vec<Message>, RepositoryError> {
        if let Some(uid) = user_id {
            self.assert_owner(session_id, uid).await?;
        }
        let rows = sqlx::query("SELECT * FROM messages WHERE session_id = ? ORDER BY created_at ASC, id ASC")
            .bind(session_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(Self::row_to_message)
            .collect::<Result<Vec<_>, _>>()
            .map(|msgs| msgs.into_iter().filter(|m| m.message_type.is_visible()).collect())
    }

    async fn get_recent_messages(&self, session_id: i64, limit: usize) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM messages WHERE session_id = ? ORDER BY created_at DESC, id DESC LIMIT ?")
            .bind(session_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        let mut messages = rows.iter().map(Self::row_to_message).collect::<Result<Vec<_>, _>>()?;
        messages.reverse(); // oldest-first (§4.3 step 2: "restored before emission")
        Ok(messages)
    }

    async fn get_session(&self, session_id: i64) -> Result<Session, RepositoryError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepositoryError::SessionNotFound(session_id))?;

        let stage_str: String = row.try_get("current_stage")?;
        let last_type_str: Option<String> = row.try_get("last_message_type")?;
        let created_at_str: String = row.try_get("created_at")?;
        let updated_at_str: String = row.try_get("updated_at")?;
        let last_summary_str: Option<String> = row.try_get("last_summary_at")?;

        Ok(Session {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            title: row.try_get("title")?,
            current_stage: SessionStage::from_str(&stage_str).unwrap_or_default(),
            last_message_type: last_type_str.and_then(|s| MessageType::from_str(&s)),
            conversation_summary: row.try_get("conversation_summary")?,
            last_summary_at: last_summary_str.map(|s| parse_timestamp(&s)),
            created_at: parse_timestamp(&created_at_str),
            updated_at: parse_timestamp(&updated_at_str),
        })
    }

    async fn update_session_stage(&self, session_id: i64, stage: SessionStage) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE sessions SET current_stage = ?, updated_at = ? WHERE id = ?")
            .bind(stage.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_last_message_type(&self, session_id: i64, message_type: MessageType) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE sessions SET last_message_type = ?, updated_at = ? WHERE id = ?")
            .bind(message_type.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_summary(
        &self,
        session_id: i64,
        user_id: &str,
        _original_question: &str,
        summary: &str,
        request_id: Option<&str>,
    ) -> Result<(), RepositoryError> {
        self.assert_owner(session_id, user_id).await?;
        self.update_conversation_summary(session_id, summary).await?;
        self.save_maice_message(session_id, summary, MessageType::SummaryComplete, None, request_id)
            .await?;
        Ok(())
    }

    async fn update_conversation_summary(&self, session_id: i64, summary: &str) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE sessions SET conversation_summary = ?, last_summary_at = ?, updated_at = ? WHERE id = ?")
            .bind(summary)
            .bind(Utc::now().to_rfc3339())
            .bind(Utc::now().to_rfc3339())
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_session_title(&self, session_id: i64, title: &str) -> Result<(), RepositoryError> {
        if title.is_empty() {
            warn!(session_id, "refusing to set empty session title");
            return Ok(());
        }
        sqlx::query("UPDATE sessions SET title = ?, updated_at = ? WHERE id = ?")
            .bind(title)
            .bind(Utc::now().to_rfc3339())
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_repo() -> SqliteSessionRepository {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        let repo = SqliteSessionRepository::new(pool);
        repo.ensure_schema().await.unwrap();
        repo
    }

    #[tokio::test]
    async fn create_and_fetch_session() {
        let repo = test_repo().await;
        let id = repo.create_session("alice", "how do I factor quadratics?").await.unwrap();
        let session = repo.get_session(id).await.unwrap();
        assert_eq!(session.user_id, "alice");
        assert_eq!(session.current_stage, SessionStage::Initial);
    }

    #[tokio::test]
    async fn foreign_user_is_denied_history_access() {
        let repo = test_repo().await;
        let id = repo.create_session("alice", "q").await.unwrap();
        let err = repo.get_conversation_history(id, Some("bob")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn maice_duplicate_within_30s_is_coalesced() {
        let repo = test_repo().await;
        let id = repo.create_session("alice", "q").await.unwrap();
        let first = repo
            .save_maice_message(id, "the answer is 4", MessageType::MaiceAnswer, None, Some("r1"))
            .await
            .unwrap();
        let second = repo
            .save_maice_message(id, "the answer is 4", MessageType::MaiceAnswer, None, Some("r2"))
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn clarification_questions_are_never_coalesced() {
        let repo = test_repo().await;
        let id = repo.create_session("alice", "q").await.unwrap();
        let first = repo
            .save_maice_message(id, "which grade?", MessageType::MaiceClarificationQuestion, None, None)
            .await
            .unwrap();
        let second = repo
            .save_maice_message(id, "which grade?", MessageType::MaiceClarificationQuestion, None, None)
            .await
            .unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn internal_types_are_filtered_from_history() {
        let repo = test_repo().await;
        let id = repo.create_session("alice", "q").await.unwrap();
        repo.save_maice_message(id, "processing...", MessageType::MaiceProcessing, None, None)
            .await
            .unwrap();
        repo.save_user_message(id, "alice", "q", MessageType::UserQuestion, None, None)
            .await
            .unwrap();
        let history = repo.get_conversation_history(id, None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message_type, MessageType::UserQuestion);
    }

    #[tokio::test]
    async fn recent_messages_are_oldest_first() {
        let repo = test_repo().await;
        let id = repo.create_session("alice", "q1").await.unwrap();
        repo.save_user_message(id, "alice", "q1", MessageType::UserQuestion, None, None).await.unwrap();
        repo.save_maice_message(id, "a1", MessageType::MaiceAnswer, None, None).await.unwrap();
        let recent = repo.get_recent_messages(id, 10).await.unwrap();
        assert_eq!(recent.first().unwrap().content, "q1");
        assert_eq!(recent.last().unwrap().content, "a1");
    }
}
