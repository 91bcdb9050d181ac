// src/bus/mod.rs
// Message Bus (C1, §4.1): session streams + broadcast channel, composed into
// one `MessageBus` handle that is injected wherever a component needs it —
// no module-level state, per SPEC_FULL.md §10 / spec.md §9's first design
// note (reimplement the source's global publish helpers as an injected,
// pooled bus client).

pub mod broadcast;
pub mod envelope;
pub mod stream;

use std::time::Duration;

use tracing::debug;

use crate::config::bus::BusConfig;
use crate::error::MaiceError;

pub use broadcast::{BroadcastChannel, BroadcastEvent};
pub use envelope::{Envelope, EnvelopeBuilder, EnvelopeType};
pub use stream::SessionStreamTable;

pub struct MessageBus {
    streams: SessionStreamTable,
    broadcast: BroadcastChannel,
    cfg: BusConfig,
}

impl MessageBus {
    pub fn new(cfg: BusConfig) -> Self {
        let broadcast = BroadcastChannel::new(cfg.broadcast_capacity);
        let streams = SessionStreamTable::new(cfg.clone());
        Self { streams, broadcast, cfg }
    }

    pub fn send(&self, session_id: i64, envelope: Envelope) -> Result<u64, MaiceError> {
        debug!(session_id, envelope_type = ?envelope.envelope_type(), "bus: send");
        self.streams.send(session_id, envelope)
    }

    pub async fn read(
        &self,
        session_id: i64,
        consumer: &str,
        target_filter: Option<&str>,
        block_ms: u64,
    ) -> Vec<Envelope> {
        self.streams
            .read(session_id, consumer, target_filter, self.cfg.drain_batch_size, block_ms)
            .await
    }

    pub fn ack(&self, session_id: i64, consumer: &str, envelope_id: u64) {
        self.streams.ack(session_id, consumer, envelope_id);
    }

    pub fn close_session(&self, session_id: i64) {
        self.streams.close(session_id);
    }

    pub fn broadcast_publish(&self, event: BroadcastEvent) {
        self.broadcast.publish(event);
    }

    pub fn broadcast_subscribe(&self) -> tokio::sync::broadcast::Receiver<BroadcastEvent> {
        self.broadcast.subscribe()
    }

    pub fn default_block(&self) -> Duration {
        Duration::from_millis(self.cfg.default_block_ms)
    }

    pub fn default_block_ms(&self) -> u64 {
        self.cfg.default_block_ms
    }
}
