// src/config/agents.rs
// Per-agent LLM call settings: model, token budget, temperature, timeout,
// retries. One struct per agent because §6 requires the LLM provider contract
// to be "configured per-agent" (classifier non-stream JSON, answer streaming
// text, observer non-stream JSON, clarifier non-stream JSON).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::helpers::{env_or, env_parsed_or};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentModelConfig {
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub json_mode: bool,
    pub stream: bool,
}

impl AgentModelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn from_env_prefixed(
        prefix: &str,
        default_model: &str,
        default_timeout_secs: u64,
        json_mode: bool,
        stream: bool,
    ) -> Self {
        Self {
            model: env_or(&format!("MAICE_{prefix}_MODEL"), default_model),
            max_tokens: env_parsed_or(&format!("MAICE_{prefix}_MAX_TOKENS"), 2048),
            temperature: env_parsed_or(&format!("MAICE_{prefix}_TEMPERATURE"), 0.0),
            timeout_secs: env_parsed_or(&format!("MAICE_{prefix}_TIMEOUT_SECS"), default_timeout_secs),
            max_retries: env_parsed_or(&format!("MAICE_{prefix}_MAX_RETRIES"), 2),
            json_mode,
            stream,
        }
    }
}

/// Composed per-agent model configuration, mirroring the teacher's practice
/// of one domain struct per concern, aggregated by `MaiceConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    pub classifier: AgentModelConfig,
    pub clarifier: AgentModelConfig,
    pub answer: AgentModelConfig,
    pub observer: AgentModelConfig,
}

impl AgentsConfig {
    pub fn from_env() -> Self {
        Self {
            // classifier: non-stream JSON, generous timeout (§5: 300s)
            classifier: AgentModelConfig::from_env_prefixed("CLASSIFIER", "gpt-4o-mini", 300, true, false),
            clarifier: AgentModelConfig::from_env_prefixed("CLARIFIER", "gpt-4o-mini", 120, true, false),
            // answer: streaming text, tighter timeout (§5: 60s)
            answer: AgentModelConfig::from_env_prefixed("ANSWER", "gpt-4o", 60, false, true),
            observer: AgentModelConfig::from_env_prefixed("OBSERVER", "gpt-4o-mini", 60, true, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_config_streams_text_not_json() {
        let cfg = AgentsConfig::from_env();
        assert!(cfg.answer.stream);
        assert!(!cfg.answer.json_mode);
    }

    #[test]
    fn classifier_config_is_json_non_stream() {
        let cfg = AgentsConfig::from_env();
        assert!(!cfg.classifier.stream);
        assert!(cfg.classifier.json_mode);
    }
}
