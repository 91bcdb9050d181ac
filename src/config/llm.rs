// src/config/llm.rs
// LLM provider connection configuration (§6 "Environment": "LLM provider
// credentials and model selectors"). Per-agent model/timeout/retry settings
// live in `config::agents::AgentModelConfig` instead — this struct is only
// the transport (base URL, API key) shared by every agent's provider call.

use serde::{Deserialize, Serialize};

use super::helpers::env_or;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL for an OpenAI-compatible Chat Completions endpoint. Works
    /// against OpenAI itself, a local vLLM server, or any compatible proxy.
    pub base_url: String,
    pub api_key: String,
}

impl ProviderConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: env_or("MAICE_LLM_BASE_URL", "https://api.openai.com/v1"),
            api_key: env_or("MAICE_LLM_API_KEY", ""),
        }
    }

    /// No credentials configured: callers fall back to the deterministic
    /// mock provider rather than failing every LLM call at startup.
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}
