// src/error.rs
// Error taxonomy for the orchestration core.
//
// Mirrors the ERROR HANDLING DESIGN table: each variant is one row. The core
// is resilient to everything except a client disconnect (handled by the
// caller cancelling locally) and a total bus outage (MaiceError::Bus halts
// the worker; recovery is by restart).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MaiceError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("llm call failed transiently: {0}")]
    LlmTransient(String),

    #[error("llm stream broke mid-answer: {0}")]
    LlmStreamBroken(String),

    #[error("bus operation failed: {0}")]
    BusTransient(String),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("phase timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("security check failed: {0}")]
    Security(String),

    #[error("clarification exhausted after {attempts} attempts")]
    ClarificationExhausted { attempts: u32 },
}

impl MaiceError {
    /// Whether this error must surface to the client as an SSE `error` event,
    /// per the taxonomy's "Surface" column.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            MaiceError::LlmStreamBroken(_) | MaiceError::Timeout(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("permission denied: session {session_id} does not belong to user {user_id}")]
    PermissionDenied { session_id: i64, user_id: String },

    #[error("session {0} not found")]
    SessionNotFound(i64),
}

/// Extension trait for adapting library errors at module boundaries,
/// following the same pattern as an `IntoGitError`-style conversion: callers
/// attach a short operation label rather than letting the raw error type leak
/// past the module that owns it.
pub trait IntoMaiceError<T> {
    fn bus_err(self, context: &str) -> Result<T, MaiceError>;
    fn llm_err(self, context: &str) -> Result<T, MaiceError>;
}

impl<T, E: std::fmt::Display> IntoMaiceError<T> for Result<T, E> {
    fn bus_err(self, context: &str) -> Result<T, MaiceError> {
        self.map_err(|e| MaiceError::BusTransient(format!("{context}: {e}")))
    }

    fn llm_err(self, context: &str) -> Result<T, MaiceError> {
        self.map_err(|e| MaiceError::LlmTransient(format!("{context}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_facing_classification() {
        assert!(MaiceError::LlmStreamBroken("cut".into()).is_user_facing());
        assert!(MaiceError::Timeout(std::time::Duration::from_secs(1)).is_user_facing());
        assert!(!MaiceError::Validation("bad".into()).is_user_facing());
        assert!(!MaiceError::ClarificationExhausted { attempts: 3 }.is_user_facing());
    }

    #[test]
    fn bus_err_wraps_context() {
        let res: Result<(), &str> = Err("connection reset");
        let wrapped = res.bus_err("session_stream.read");
        assert!(matches!(wrapped, Err(MaiceError::BusTransient(_))));
    }
}
