use async_trait::async_trait;
use beacon_consumers::Consumer;
use beacon_core::HandlerError;
use beacon_events::types::{Envelope, EventBody};
use tracing::debug;

use crate::protocol::ServerFrame;
use crate::registry::ConnectionRegistry;

/// Pushes `sync.delta` events to the owning user's live connections.
/// Delivery is best-effort within a session: this handler never fails, so
/// nothing here is retried or dead-lettered. A connection that missed a
/// delta catches up through its next handshake's backfill.
pub struct SyncFanoutConsumer {
    registry: ConnectionRegistry,
}

impl SyncFanoutConsumer {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Consumer for SyncFanoutConsumer {
    fn name(&self) -> &'static str {
        "sync_fanout"
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        let EventBody::SyncDelta { .. } = &envelope.body else {
            return Ok(());
        };
        let frame = ServerFrame::delta(envelope).encode();
        let report = self.registry.push_to_user(&envelope.user_id, &frame).await;
        debug!(
            user_id = %envelope.user_id,
            seq = envelope.seq,
            delivered = report.delivered,
            torn_down = report.torn_down,
            "delta fanned out"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::Message;
    use beacon_core::publisher::mint_event_id;
    use beacon_events::ids::{NotificationId, TaskId, UserId};
    use beacon_events::types::{SCHEMA_VERSION, SyncDelta};
    use chrono::Utc;
    use serde_json::Value;
    use tokio::sync::mpsc;

    fn delta_envelope(user_id: &UserId, seq: i64) -> Envelope {
        let body = EventBody::SyncDelta {
            delta: SyncDelta::Notification {
                notification_id: NotificationId::generate(),
                task_id: TaskId::generate(),
                title: "Task reminder".to_string(),
                body: None,
                created_at: Utc::now(),
            },
        };
        Envelope {
            event_id: mint_event_id(),
            seq,
            subject_id: body.subject_id(),
            body,
            user_id: user_id.clone(),
            occurred_at: Utc::now(),
            schema_version: SCHEMA_VERSION,
        }
    }

    fn sequence_of(message: Message) -> i64 {
        let Message::Text(text) = message else {
            panic!("expected text frame");
        };
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "delta");
        value["sequence"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn deltas_reach_the_users_connections_in_order() {
        let registry = ConnectionRegistry::new();
        let user = UserId::generate();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(&user, tx, 0).await;
        let consumer = SyncFanoutConsumer::new(registry);

        for seq in 1..=3 {
            consumer.handle(&delta_envelope(&user, seq)).await.unwrap();
        }

        for expected in 1..=3 {
            assert_eq!(sequence_of(rx.recv().await.unwrap()), expected);
        }
    }

    #[tokio::test]
    async fn non_delta_events_are_not_pushed() {
        let registry = ConnectionRegistry::new();
        let user = UserId::generate();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(&user, tx, 0).await;
        let consumer = SyncFanoutConsumer::new(registry);

        let body = EventBody::TaskDeleted {
            task_id: TaskId::generate(),
        };
        let envelope = Envelope {
            event_id: mint_event_id(),
            seq: 1,
            subject_id: body.subject_id(),
            body,
            user_id: user.clone(),
            occurred_at: Utc::now(),
            schema_version: SCHEMA_VERSION,
        };

        consumer.handle(&envelope).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn a_closed_connection_does_not_stop_delivery_to_the_other() {
        let registry = ConnectionRegistry::new();
        let user = UserId::generate();
        let (tx_dead, rx_dead) = mpsc::unbounded_channel();
        let (tx_live, mut rx_live) = mpsc::unbounded_channel();
        registry.register(&user, tx_dead, 0).await;
        registry.register(&user, tx_live, 0).await;
        drop(rx_dead);
        let consumer = SyncFanoutConsumer::new(registry.clone());

        consumer.handle(&delta_envelope(&user, 4)).await.unwrap();

        assert_eq!(sequence_of(rx_live.recv().await.unwrap()), 4);
        assert_eq!(registry.connection_count(&user).await, 1);
    }

    #[tokio::test]
    async fn deltas_for_one_user_never_reach_another() {
        let registry = ConnectionRegistry::new();
        let alice = UserId::generate();
        let bob = UserId::generate();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(&bob, tx, 0).await;
        let consumer = SyncFanoutConsumer::new(registry);

        consumer.handle(&delta_envelope(&alice, 1)).await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
