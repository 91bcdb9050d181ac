// src/config/mod.rs
// Central configuration for the MAICE orchestrator, composed from domain
// configs following the teacher's `MiraConfig` pattern.

pub mod agents;
pub mod bus;
pub mod helpers;
pub mod llm;
pub mod memory;
pub mod security;
pub mod server;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

lazy_static! {
    pub static ref CONFIG: MaiceConfig = MaiceConfig::from_env();
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaiceConfig {
    pub agents: agents::AgentsConfig,
    pub memory: memory::MemoryConfig,
    pub security: security::SecurityConfig,
    pub bus: bus::BusConfig,
    pub server: server::ServerConfig,
    pub database: server::DatabaseConfig,
    pub logging: server::LoggingConfig,
    pub timeouts: server::TimeoutConfig,
    pub clarification: server::ClarificationConfig,
    pub provider: llm::ProviderConfig,
}

impl MaiceConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            agents: agents::AgentsConfig::from_env(),
            memory: memory::MemoryConfig::from_env(),
            security: security::SecurityConfig::from_env(),
            bus: bus::BusConfig::from_env(),
            server: server::ServerConfig::from_env(),
            database: server::DatabaseConfig::from_env(),
            logging: server::LoggingConfig::from_env(),
            timeouts: server::TimeoutConfig::from_env(),
            clarification: server::ClarificationConfig::from_env(),
            provider: llm::ProviderConfig::from_env(),
        }
    }

    pub fn bind_address(&self) -> String {
        self.server.bind_address()
    }
}

impl Default for MaiceConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
