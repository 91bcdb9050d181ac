// src/api/http/messages.rs
// The SSE front door (§6): "one stream per accepted utterance", shaped
// exactly as spec.md §6's event table. Grounded on the teacher's
// `sessions_stream`/`chat_stream_handler` SSE handlers
// (`other_examples/.../sessions_stream.rs.rs`, `mira-chat/src/server.rs`).

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::Stream;
use serde::Deserialize;
use tokio_stream::StreamExt;

use crate::router::IncomingUtterance;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub session_id: Option<i64>,
    pub user_id: String,
    pub text: String,
}

/// POST /messages — session-less entry point; a fresh session is created if
/// `session_id` is absent from the body (§4.2 step 1).
pub async fn post_message(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MessageRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    stream_response(state, req.session_id, req.user_id, req.text)
}

/// POST /sessions/:id/messages — continuation of an existing session; the
/// path segment is authoritative over any `session_id` in the body.
pub async fn post_session_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<MessageRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    stream_response(state, Some(id), req.user_id, req.text)
}

fn stream_response(
    state: Arc<AppState>,
    session_id: Option<i64>,
    user_id: String,
    text: String,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let incoming = IncomingUtterance { session_id, user_id, text };
    let values = state.router.clone().handle(incoming);
    let events = values.map(|value| {
        let data = serde_json::to_string(&value).unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default().data(data))
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}
