// src/config/security.rs
// Classifier/Clarifier safety-filter and separator-hash defense configuration.

use serde::{Deserialize, Serialize};

use super::helpers::env_list_or;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Regex-free substring patterns that mark a question as unanswerable on
    /// safety grounds (§4.4 step 1). Kept as plain substrings, not a regex
    /// crate dependency, since the teacher's own danger-pattern lists
    /// (e.g. sudo permission checks) are plain string matches.
    pub danger_patterns: Vec<String>,
    /// Alphabet used to generate randomized separator tokens embedded in
    /// prompts to detect echoed injection (§4.4 step 2, §4.5 "Security").
    pub safe_separators: Vec<String>,
    /// Length of each generated separator token.
    pub separator_len: usize,
}

impl SecurityConfig {
    pub fn from_env() -> Self {
        Self {
            danger_patterns: env_list_or(
                "MAICE_DANGER_PATTERNS",
                &["ignore previous instructions", "system prompt", "jailbreak"],
            ),
            safe_separators: env_list_or(
                "MAICE_SAFE_SEPARATORS",
                &["###", "~~~", "%%%", "^^^"],
            ),
            separator_len: 12,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_danger_patterns_nonempty() {
        let cfg = SecurityConfig::from_env();
        assert!(!cfg.danger_patterns.is_empty());
    }
}
