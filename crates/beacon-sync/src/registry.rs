use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, Utf8Bytes};
use beacon_events::ids::{ConnectionId, UserId};
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

/// Live connections keyed by user. One owned map behind a lock; the socket
/// tasks and the fan-out consumer all go through it, nothing else holds
/// connection state. A user may hold any number of concurrent connections.
#[derive(Clone)]
pub struct ConnectionRegistry {
    connections: Arc<Mutex<HashMap<UserId, Vec<Registration>>>>,
}

struct Registration {
    connection_id: ConnectionId,
    sender: mpsc::UnboundedSender<Message>,
    session_start: DateTime<Utc>,
    last_ack_sequence: i64,
}

/// What one fan-out push did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PushReport {
    pub delivered: usize,
    /// Registrations whose socket was already gone and got removed.
    pub torn_down: usize,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Adds a connection for `user_id` and returns its id. `last_sequence` is
    /// the client's resume point from the handshake.
    pub async fn register(
        &self,
        user_id: &UserId,
        sender: mpsc::UnboundedSender<Message>,
        last_sequence: i64,
    ) -> ConnectionId {
        let connection_id = ConnectionId::generate();
        let registration = Registration {
            connection_id: connection_id.clone(),
            sender,
            session_start: Utc::now(),
            last_ack_sequence: last_sequence,
        };
        self.connections
            .lock()
            .await
            .entry(user_id.clone())
            .or_default()
            .push(registration);
        debug!(%user_id, %connection_id, "connection registered");
        connection_id
    }

    pub async fn unregister(&self, user_id: &UserId, connection_id: &ConnectionId) {
        let mut connections = self.connections.lock().await;
        if let Some(registrations) = connections.get_mut(user_id) {
            registrations.retain(|r| r.connection_id != *connection_id);
            if registrations.is_empty() {
                connections.remove(user_id);
            }
        }
        debug!(%user_id, %connection_id, "connection unregistered");
    }

    /// Client acknowledgment of a delivered delta. Stale acks are ignored.
    pub async fn record_ack(
        &self,
        user_id: &UserId,
        connection_id: &ConnectionId,
        sequence: i64,
    ) {
        let mut connections = self.connections.lock().await;
        let registration = connections
            .get_mut(user_id)
            .and_then(|rs| rs.iter_mut().find(|r| r.connection_id == *connection_id));
        if let Some(registration) = registration {
            if sequence > registration.last_ack_sequence {
                registration.last_ack_sequence = sequence;
            }
        }
    }

    /// Sends `frame` to every live connection of `user_id`. Each connection
    /// has its own queue, so a slow socket never delays its siblings; a dead
    /// one is torn down on the spot and the next reconnect backfills the gap.
    pub async fn push_to_user(&self, user_id: &UserId, frame: &str) -> PushReport {
        let mut report = PushReport::default();
        let mut connections = self.connections.lock().await;
        let Some(registrations) = connections.get_mut(user_id) else {
            return report;
        };
        registrations.retain(|registration| {
            let message = Message::Text(Utf8Bytes::from(frame.to_string()));
            if registration.sender.send(message).is_ok() {
                report.delivered += 1;
                true
            } else {
                report.torn_down += 1;
                false
            }
        });
        if registrations.is_empty() {
            connections.remove(user_id);
        }
        report
    }

    pub async fn connection_count(&self, user_id: &UserId) -> usize {
        self.connections
            .lock()
            .await
            .get(user_id)
            .map_or(0, Vec::len)
    }

    /// Snapshot of one registration, for operator introspection.
    pub async fn describe(
        &self,
        user_id: &UserId,
        connection_id: &ConnectionId,
    ) -> Option<(DateTime<Utc>, i64)> {
        self.connections
            .lock()
            .await
            .get(user_id)?
            .iter()
            .find(|r| r.connection_id == *connection_id)
            .map(|r| (r.session_start, r.last_ack_sequence))
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
