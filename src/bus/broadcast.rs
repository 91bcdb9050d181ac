// src/bus/broadcast.rs
// Broadcast channel (§4.1 item 2): fan-out pub/sub, no persistence, no ACK.
// Used for agent-to-agent handoffs where the state is already durable (in
// the session stream / repository) and the notification is advisory.

use serde_json::Value;
use tokio::sync::broadcast;

use super::envelope::EnvelopeType;

#[derive(Debug, Clone)]
pub struct BroadcastEvent {
    pub event_type: EnvelopeType,
    pub session_id: i64,
    pub request_id: String,
    pub payload: Value,
}

pub struct BroadcastChannel {
    tx: broadcast::Sender<BroadcastEvent>,
}

impl BroadcastChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: BroadcastEvent) {
        // Lagging/absent receivers are fine: this channel is advisory-only
        // (§4.1), so a publish with no subscribers is not an error.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let chan = BroadcastChannel::new(16);
        let mut rx = chan.subscribe();
        chan.publish(BroadcastEvent {
            event_type: EnvelopeType::UpdateSummary,
            session_id: 1,
            request_id: "r1".into(),
            payload: json!({"older_than_window": []}),
        });
        let received = rx.recv().await.unwrap();
        assert_eq!(received.session_id, 1);
        assert!(matches!(received.event_type, EnvelopeType::UpdateSummary));
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_error() {
        let chan = BroadcastChannel::new(4);
        chan.publish(BroadcastEvent {
            event_type: EnvelopeType::NeedClarification,
            session_id: 2,
            request_id: "r2".into(),
            payload: json!(null),
        });
    }
}
