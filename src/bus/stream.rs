// src/bus/stream.rs
// Session stream (§4.1 item 1): a durable, ordered, per-session append log
// with consumer ACK. Independent streams per session guarantee no
// cross-session head-of-line blocking (testable property #8).
//
// Modeled after a Redis Streams consumer group: each named consumer (the
// Router, or an agent) tracks its own cursor into the log and explicitly
// ACKs; un-ACKed entries are redelivered on the next read, matching the
// bus's at-least-once failure model (§4.1, §7 `bus_transient`).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock as SyncRwLock;
use tokio::sync::Notify;
use tokio::time::timeout;

use super::envelope::Envelope;
use crate::config::bus::BusConfig;
use crate::error::MaiceError;

struct StreamInner {
    entries: VecDeque<Envelope>,
    next_id: u64,
    /// consumer name -> last-acked entry id (entries with id > cursor are
    /// still undelivered-to-that-consumer).
    cursors: HashMap<String, u64>,
    notify: Arc<Notify>,
}

impl StreamInner {
    fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            next_id: 1,
            cursors: HashMap::new(),
            notify: Arc::new(Notify::new()),
        }
    }
}

/// One per-session append log, behind its own lock so that one session's
/// readers/writers never contend with another's (§5 "sessions never share
/// mutable state").
pub struct SessionStream {
    inner: parking_lot::Mutex<StreamInner>,
    capacity: usize,
}

impl SessionStream {
    fn new(capacity: usize) -> Self {
        Self { inner: parking_lot::Mutex::new(StreamInner::new()), capacity }
    }

    fn append(&self, mut envelope: Envelope) -> u64 {
        let (notify, id) = {
            let mut guard = self.inner.lock();
            let id = guard.next_id;
            guard.next_id += 1;
            envelope.id = id;
            guard.entries.push_back(envelope);
            while guard.entries.len() > self.capacity {
                guard.entries.pop_front();
            }
            (guard.notify.clone(), id)
        };
        notify.notify_waiters();
        notify.notify_one();
        id
    }

    fn pending_for(&self, consumer: &str, target_filter: Option<&str>, max_count: usize) -> Vec<Envelope> {
        let guard = self.inner.lock();
        let cursor = *guard.cursors.get(consumer).unwrap_or(&0);
        guard
            .entries
            .iter()
            .filter(|e| e.id > cursor)
            .filter(|e| match target_filter {
                Some(agent) => e.target_agent() == agent,
                None => e.target_agent().is_empty(),
            })
            .take(max_count)
            .cloned()
            .collect()
    }

    fn ack(&self, consumer: &str, envelope_id: u64) {
        let mut guard = self.inner.lock();
        let cursor = guard.cursors.entry(consumer.to_string()).or_insert(0);
        if envelope_id > *cursor {
            *cursor = envelope_id;
        }
    }

    fn notify_handle(&self) -> Arc<Notify> {
        self.inner.lock().notify.clone()
    }
}

/// The message bus's session-stream half: a table of per-session streams,
/// guarded by a table-level lock only for insert/delete (§5 "Shared
/// resources"); per-entry mutation is single-writer by construction via the
/// stream's own internal mutex.
pub struct SessionStreamTable {
    streams: SyncRwLock<HashMap<i64, Arc<SessionStream>>>,
    cfg: BusConfig,
}

impl SessionStreamTable {
    pub fn new(cfg: BusConfig) -> Self {
        Self { streams: SyncRwLock::new(HashMap::new()), cfg }
    }

    fn get_or_create(&self, session_id: i64) -> Arc<SessionStream> {
        if let Some(s) = self.streams.read().get(&session_id) {
            return s.clone();
        }
        let mut guard = self.streams.write();
        guard
            .entry(session_id)
            .or_insert_with(|| Arc::new(SessionStream::new(self.cfg.stream_capacity)))
            .clone()
    }

    /// §4.1 `send`: appends to the session stream. Rejects oversized
    /// payloads rather than relying on jumbo envelopes (§4.1).
    pub fn send(&self, session_id: i64, envelope: Envelope) -> Result<u64, MaiceError> {
        let size: usize = envelope.fields.values().map(|v| v.len()).sum();
        if size > self.cfg.max_envelope_bytes {
            return Err(MaiceError::BusTransient(format!(
                "envelope for session {session_id} exceeds cap ({size} > {})",
                self.cfg.max_envelope_bytes
            )));
        }
        let stream = self.get_or_create(session_id);
        Ok(stream.append(envelope))
    }

    /// §4.1 `read`: returns up to `max_count` un-ACKed envelopes for this
    /// consumer, blocking up to `block_ms` if none are available yet.
    /// `target_filter`: `None` reads router-bound envelopes (empty
    /// `target_agent`); `Some(agent)` reads envelopes addressed to `agent`.
    pub async fn read(
        &self,
        session_id: i64,
        consumer: &str,
        target_filter: Option<&str>,
        max_count: usize,
        block_ms: u64,
    ) -> Vec<Envelope> {
        let stream = self.get_or_create(session_id);
        let pending = stream.pending_for(consumer, target_filter, max_count);
        if !pending.is_empty() || block_ms == 0 {
            return pending;
        }
        let notify = stream.notify_handle();
        let _ = timeout(Duration::from_millis(block_ms), notify.notified()).await;
        stream.pending_for(consumer, target_filter, max_count)
    }

    /// §4.1 `ack`: marks delivered; re-reads skip ACKed items.
    pub fn ack(&self, session_id: i64, consumer: &str, envelope_id: u64) {
        if let Some(stream) = self.streams.read().get(&session_id) {
            stream.ack(consumer, envelope_id);
        }
    }

    /// Administrative "cancel session" signal (§5 Cancellation): ACKs
    /// everything pending and drops the stream, destroying any state tied to
    /// it.
    pub fn close(&self, session_id: i64) {
        self.streams.write().remove(&session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::envelope::{Envelope as Env, EnvelopeType};

    fn table() -> SessionStreamTable {
        SessionStreamTable::new(BusConfig {
            stream_capacity: 1024,
            broadcast_capacity: 64,
            default_block_ms: 10,
            drain_batch_size: 50,
            max_envelope_bytes: 1_000_000,
        })
    }

    #[tokio::test]
    async fn read_returns_router_bound_envelopes_only() {
        let t = table();
        t.send(1, Env::builder(EnvelopeType::ClassificationComplete, 1, "r1").build())
            .unwrap();
        t.send(
            1,
            Env::builder(EnvelopeType::ClassifyQuestion, 1, "r1")
                .target("classifier")
                .build(),
        )
        .unwrap();

        let router_view = t.read(1, "router", None, 10, 0).await;
        assert_eq!(router_view.len(), 1);
        assert_eq!(router_view[0].envelope_type(), Some(EnvelopeType::ClassificationComplete));

        let classifier_view = t.read(1, "classifier", Some("classifier"), 10, 0).await;
        assert_eq!(classifier_view.len(), 1);
    }

    #[tokio::test]
    async fn ack_prevents_redelivery() {
        let t = table();
        let id = t
            .send(2, Env::builder(EnvelopeType::Error, 2, "r1").build())
            .unwrap();
        let first = t.read(2, "router", None, 10, 0).await;
        assert_eq!(first.len(), 1);
        t.ack(2, "router", id);
        let second = t.read(2, "router", None, 10, 0).await;
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let t = table();
        t.send(10, Env::builder(EnvelopeType::Error, 10, "r").build()).unwrap();
        let for_other_session = t.read(11, "router", None, 10, 0).await;
        assert!(for_other_session.is_empty());
    }

    #[tokio::test]
    async fn oversized_envelope_is_rejected() {
        let t = SessionStreamTable::new(BusConfig {
            stream_capacity: 1024,
            broadcast_capacity: 64,
            default_block_ms: 10,
            drain_batch_size: 50,
            max_envelope_bytes: 8,
        });
        let env = Env::builder(EnvelopeType::Error, 1, "r").field("message", "way too long").build();
        assert!(t.send(1, env).is_err());
    }
}
