// src/config/bus.rs
// Message bus (C1) sizing and timing configuration.

use serde::{Deserialize, Serialize};

use super::helpers::env_parsed_or;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Per-session stream ring capacity before the oldest un-ACKed envelope
    /// is dropped (the bus is at-least-once, not infinite memory).
    pub stream_capacity: usize,
    /// Broadcast channel capacity (lagging receivers miss advisory events;
    /// acceptable per §4.1 since broadcast is advisory-only).
    pub broadcast_capacity: usize,
    /// Default blocking read duration in milliseconds (§4.1 `block_ms`).
    pub default_block_ms: u64,
    /// Max envelopes drained per read call (§5 backpressure: N = 50).
    pub drain_batch_size: usize,
    /// Payloads larger than this are rejected by the sender (§4.1: "core
    /// never relies on jumbo envelopes").
    pub max_envelope_bytes: usize,
}

impl BusConfig {
    pub fn from_env() -> Self {
        Self {
            stream_capacity: env_parsed_or("MAICE_BUS_STREAM_CAPACITY", 1024),
            broadcast_capacity: env_parsed_or("MAICE_BUS_BROADCAST_CAPACITY", 256),
            default_block_ms: env_parsed_or("MAICE_BUS_BLOCK_MS", 50),
            drain_batch_size: env_parsed_or("MAICE_BUS_DRAIN_BATCH", 50),
            max_envelope_bytes: env_parsed_or("MAICE_BUS_MAX_ENVELOPE_BYTES", 262_144),
        }
    }
}
