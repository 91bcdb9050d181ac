// src/config/memory.rs
// Context-window / sliding-window configuration for the Context Assembler (C3).

use serde::{Deserialize, Serialize};

use super::helpers::env_parsed_or;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Sliding window size for normal questions (§4.3: N = 20).
    pub window_new_question: usize,
    /// Sliding window size for follow-ups (§4.3: N = 30).
    pub window_follow_up: usize,
    /// Title hard cap (§4.7: title ≤ 50 chars).
    pub title_max_chars: usize,
    /// Summary hard cap (§4.7: summary ≤ 500 chars).
    pub summary_max_chars: usize,
}

impl MemoryConfig {
    pub fn from_env() -> Self {
        Self {
            window_new_question: env_parsed_or("MAICE_WINDOW_NEW_QUESTION", 20),
            window_follow_up: env_parsed_or("MAICE_WINDOW_FOLLOW_UP", 30),
            title_max_chars: env_parsed_or("MAICE_TITLE_MAX_CHARS", 50),
            summary_max_chars: env_parsed_or("MAICE_SUMMARY_MAX_CHARS", 500),
        }
    }

    pub fn window_for(&self, is_follow_up: bool) -> usize {
        if is_follow_up {
            self.window_follow_up
        } else {
            self.window_new_question
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follow_up_window_wider_than_default() {
        let cfg = MemoryConfig::from_env();
        assert!(cfg.window_for(true) >= cfg.window_for(false));
    }
}
