// src/state.rs
// Application state shared across HTTP handlers, following the teacher's
// `AppState` composition pattern (`backend/src/state.rs`,
// `mira-chat/src/server.rs::AppState`).

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::router::SessionRouter;

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<SessionRouter>,
    pub db: SqlitePool,
}
