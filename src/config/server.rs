// src/config/server.rs
// Server, database, logging, and timeout configuration.

use serde::{Deserialize, Serialize};

use super::helpers::{env_or, env_parsed_or};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            host: env_or("MAICE_HOST", "0.0.0.0"),
            port: env_parsed_or("MAICE_PORT", 8080),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        Self {
            url: env_or("DATABASE_URL", "sqlite://maice.db"),
            max_connections: env_parsed_or("MAICE_SQLITE_MAX_CONNECTIONS", 10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self {
            level: env_or("MAICE_LOG_LEVEL", "info"),
        }
    }
}

/// Timeout defaults from §5: per-phase relay 120s; chunk send retry 3 with
/// 100-400ms exponential back-off. Per-agent LLM timeouts live in
/// `config::agents::AgentModelConfig` instead, since §6 says those are
/// "configured per-agent".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub relay_phase_secs: u64,
    pub chunk_send_retries: u32,
    pub chunk_retry_base_ms: u64,
    pub chunk_retry_max_ms: u64,
}

impl TimeoutConfig {
    pub fn from_env() -> Self {
        Self {
            relay_phase_secs: env_parsed_or("MAICE_RELAY_PHASE_SECS", 120),
            chunk_send_retries: env_parsed_or("MAICE_CHUNK_SEND_RETRIES", 3),
            chunk_retry_base_ms: env_parsed_or("MAICE_CHUNK_RETRY_BASE_MS", 100),
            chunk_retry_max_ms: env_parsed_or("MAICE_CHUNK_RETRY_MAX_MS", 400),
        }
    }
}

/// Clarifier configuration (§3: `max_clarifications` default 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClarificationConfig {
    pub max_clarifications: u32,
}

impl ClarificationConfig {
    pub fn from_env() -> Self {
        Self {
            max_clarifications: env_parsed_or("MAICE_MAX_CLARIFICATIONS", 3),
        }
    }
}
