// src/context/mod.rs
// Context Assembler (C3, §4.3): builds prompt context from the rolling
// summary plus a sliding window of recent turns, and schedules background
// re-summarization when history outgrows the window. Never blocks
// classification on that background work (§4.3 step 4).

use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use crate::bus::{BroadcastEvent, EnvelopeType, MessageBus};
use crate::config::memory::MemoryConfig;
use crate::domain::{Message, Sender, Session};
use crate::error::MaiceError;
use crate::repository::SessionRepository;

const FOLLOW_UP_MARKER: &str = "=== follow-up ===\nThis is a continuation of the prior conversation.\n";
const PRIOR_SUMMARY_MARKER: &str = "=== prior summary ===\n";

pub struct ContextAssembler {
    repository: Arc<dyn SessionRepository>,
    bus: Arc<MessageBus>,
    memory: MemoryConfig,
}

impl ContextAssembler {
    pub fn new(repository: Arc<dyn SessionRepository>, bus: Arc<MessageBus>, memory: MemoryConfig) -> Self {
        Self { repository, bus, memory }
    }

    /// §4.3 steps 1-5. `is_follow_up` selects the window size (N=20 vs N=30)
    /// and whether the continuation marker is prefixed.
    pub async fn assemble(&self, session: &Session, is_follow_up: bool, request_id: &str) -> Result<String, MaiceError> {
        let window = self.memory.window_for(is_follow_up);
        let history = self
            .repository
            .get_conversation_history(session.id, None)
            .await
            .map_err(MaiceError::Repository)?;

        let total = history.len();
        let (older, recent) = if total > window {
            let split = total - window;
            (history[..split].to_vec(), history[split..].to_vec())
        } else {
            (Vec::new(), history)
        };

        let mut text = String::new();
        if let Some(summary) = session.conversation_summary.as_deref().filter(|s| !s.is_empty()) {
            text.push_str(PRIOR_SUMMARY_MARKER);
            text.push_str(summary);
            text.push('\n');
        }

        for message in &recent {
            text.push_str(&format!("{}: {}\n", sender_tag(message.sender), message.content));
        }

        if !older.is_empty() {
            self.schedule_resummarization(session.id, request_id, &older);
        }

        if is_follow_up {
            text = format!("{FOLLOW_UP_MARKER}{text}");
        }

        Ok(text)
    }

    /// §4.3 step 4: publish an advisory `update_summary` event with the
    /// older-than-window messages. The Observer picks this up and updates
    /// `conversation_summary`/`last_summary_at` out of band; this call itself
    /// never awaits that work.
    fn schedule_resummarization(&self, session_id: i64, request_id: &str, older: &[Message]) {
        let older_text: Vec<String> =
            older.iter().map(|m| format!("{}: {}", sender_tag(m.sender), m.content)).collect();
        debug!(session_id, count = older.len(), "scheduling incremental re-summarization");
        self.bus.broadcast_publish(BroadcastEvent {
            event_type: EnvelopeType::UpdateSummary,
            session_id,
            request_id: request_id.to_string(),
            payload: json!({ "older_messages": older_text.join("\n") }),
        });
    }
}

fn sender_tag(sender: Sender) -> &'static str {
    match sender {
        Sender::User => "Student",
        Sender::Maice => "MAICE",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::bus::BusConfig;
    use crate::domain::{MessageType, SessionStage};
    use sqlx::sqlite::SqlitePoolOptions;

    use crate::repository::sqlite::SqliteSessionRepository;

    async fn repo_with_messages(count: usize) -> (Arc<SqliteSessionRepository>, i64) {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        let repo = SqliteSessionRepository::new(pool);
        repo.ensure_schema().await.unwrap();
        let session_id = repo.create_session("alice", "q0").await.unwrap();
        for i in 0..count {
            repo.save_user_message(session_id, "alice", &format!("q{i}"), MessageType::UserQuestion, None, None)
                .await
                .unwrap();
            repo.save_maice_message(session_id, &format!("a{i}"), MessageType::MaiceAnswer, None, None)
                .await
                .unwrap();
        }
        (Arc::new(repo), session_id)
    }

    fn bus() -> Arc<MessageBus> {
        Arc::new(MessageBus::new(BusConfig {
            stream_capacity: 256,
            broadcast_capacity: 64,
            default_block_ms: 5,
            drain_batch_size: 50,
            max_envelope_bytes: 1_000_000,
        }))
    }

    #[tokio::test]
    async fn window_contains_only_recent_messages_when_history_is_short() {
        let (repo, session_id) = repo_with_messages(2).await;
        let assembler = ContextAssembler::new(repo.clone(), bus(), MemoryConfig {
            window_new_question: 20,
            window_follow_up: 30,
            title_max_chars: 50,
            summary_max_chars: 500,
        });
        let mut session = Session::new(session_id, "alice");
        session.current_stage = SessionStage::Initial;
        let text = assembler.assemble(&session, false, "r1").await.unwrap();
        assert!(text.contains("q0"));
        assert!(text.contains("a1"));
    }

    #[tokio::test]
    async fn follow_up_gets_marker_and_wider_window() {
        let (repo, session_id) = repo_with_messages(1).await;
        let assembler = ContextAssembler::new(repo, bus(), MemoryConfig {
            window_new_question: 20,
            window_follow_up: 30,
            title_max_chars: 50,
            summary_max_chars: 500,
        });
        let session = Session::new(session_id, "alice");
        let text = assembler.assemble(&session, true, "r1").await.unwrap();
        assert!(text.starts_with(FOLLOW_UP_MARKER));
    }

    #[tokio::test]
    async fn overflow_triggers_background_resummarization_event() {
        let (repo, session_id) = repo_with_messages(15).await; // 30 messages > window (20)
        let bus = bus();
        let mut rx = bus.broadcast_subscribe();
        let assembler = ContextAssembler::new(repo, bus, MemoryConfig {
            window_new_question: 20,
            window_follow_up: 30,
            title_max_chars: 50,
            summary_max_chars: 500,
        });
        let session = Session::new(session_id, "alice");
        assembler.assemble(&session, false, "r1").await.unwrap();
        let event = rx.try_recv().expect("expected an update_summary broadcast");
        assert!(matches!(event.event_type, EnvelopeType::UpdateSummary));
    }

    #[tokio::test]
    async fn short_history_schedules_no_resummarization() {
        let (repo, session_id) = repo_with_messages(2).await;
        let bus = bus();
        let mut rx = bus.broadcast_subscribe();
        let assembler = ContextAssembler::new(repo, bus, MemoryConfig {
            window_new_question: 20,
            window_follow_up: 30,
            title_max_chars: 50,
            summary_max_chars: 500,
        });
        let session = Session::new(session_id, "alice");
        assembler.assemble(&session, false, "r1").await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
