use crate::error::PublishError;
use crate::events::EventLogRepository;
use crate::store::Store;
use beacon_events::EventBus;
use beacon_events::ids::UserId;
use beacon_events::types::{EventBody, EventKind, Envelope, SCHEMA_VERSION};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use ulid::Ulid;

/// Returned once the log has durably accepted the event. Acceptance is not
/// delivery; consumers catch up on their own clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub event_id: String,
    pub seq: i64,
}

/// Envelope minus the fields the publisher assigns.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub user_id: UserId,
    pub body: EventBody,
}

impl EventDraft {
    pub fn new(user_id: UserId, body: EventBody) -> Self {
        Self { user_id, body }
    }
}

/// Stateless front door to the bus: validates, assigns `event_id` and
/// `occurred_at`, appends to the durable log, then wakes live subscribers.
/// Broadcast failure is invisible to callers; the log already has the event.
pub struct Publisher<S> {
    store: S,
    bus: EventBus,
}

impl<S: Store> Publisher<S> {
    pub fn new(store: S, bus: EventBus) -> Self {
        Self { store, bus }
    }

    /// The log the publisher appends to. Components that own a publisher read
    /// their own state through the same connection.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn publish(&self, draft: EventDraft) -> Result<Ack, PublishError> {
        let envelope = assemble(draft, Utc::now());
        self.publish_prepared(envelope)
    }

    /// Publishes an envelope whose `event_id` the caller minted and persisted
    /// beforehand. Re-publishing after a crash returns the original ack.
    pub fn publish_prepared(&self, envelope: Envelope) -> Result<Ack, PublishError> {
        validate(&envelope)?;
        let accepted = self
            .store
            .with_tx(|store| store.events().append(envelope.clone()))
            .map_err(|err| PublishError::Unavailable {
                message: err.to_string(),
            })?;
        let ack = Ack {
            event_id: accepted.event_id.clone(),
            seq: accepted.seq,
        };
        let _ = self.bus.publish(accepted);
        Ok(ack)
    }

    /// The task-mutation boundary's library contract. The caller's change is
    /// already committed; only task lifecycle kinds may enter through here.
    pub fn emit_task_event(&self, user_id: UserId, body: EventBody) -> Result<Ack, PublishError> {
        match body.kind() {
            EventKind::TaskCreated
            | EventKind::TaskUpdated
            | EventKind::TaskCompleted
            | EventKind::TaskDeleted => self.publish(EventDraft::new(user_id, body)),
            other => Err(PublishError::Rejected {
                message: format!("{} is not a task lifecycle event", other.as_str()),
            }),
        }
    }
}

pub fn mint_event_id() -> String {
    format!("evt_{}", Ulid::new())
}

/// Stable id for an event derived from another one. A consumer that turns
/// event X into event Y uses this so a redelivery of X re-publishes Y under
/// the same id, and the log's insert-if-absent append swallows the duplicate.
pub fn derive_event_id(source_event_id: &str, purpose: &str) -> String {
    let digest = Sha256::digest(format!("{source_event_id}:{purpose}").as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    format!("evt_{}", Ulid::from(u128::from_be_bytes(bytes)))
}

fn assemble(draft: EventDraft, occurred_at: DateTime<Utc>) -> Envelope {
    Envelope {
        event_id: mint_event_id(),
        seq: 0,
        subject_id: draft.body.subject_id(),
        body: draft.body,
        user_id: draft.user_id,
        occurred_at,
        schema_version: SCHEMA_VERSION,
    }
}

fn validate(envelope: &Envelope) -> Result<(), PublishError> {
    if !envelope.event_id.starts_with("evt_") || envelope.event_id.len() != 30 {
        return Err(PublishError::Rejected {
            message: format!("malformed event_id: {}", envelope.event_id),
        });
    }
    if envelope.subject_id != envelope.body.subject_id() {
        return Err(PublishError::Rejected {
            message: "subject_id does not match payload".to_string(),
        });
    }
    let empty_title = match &envelope.body {
        EventBody::TaskCreated { title, .. }
        | EventBody::TaskUpdated { title, .. }
        | EventBody::TaskCompleted { title, .. } => title.trim().is_empty(),
        _ => false,
    };
    if empty_title {
        return Err(PublishError::Rejected {
            message: "task title must not be empty".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_events::ids::TaskId;

    #[test]
    fn minted_ids_pass_validation() {
        let id = mint_event_id();
        assert!(id.starts_with("evt_"));
        assert_eq!(id.len(), 30);
        assert_ne!(mint_event_id(), id);
    }

    #[test]
    fn derived_ids_are_stable_per_source_and_purpose() {
        let source = mint_event_id();
        let a = derive_event_id(&source, "sync.notification");
        assert_eq!(a, derive_event_id(&source, "sync.notification"));
        assert_ne!(a, derive_event_id(&source, "sync.task"));
        assert_ne!(a, derive_event_id(&mint_event_id(), "sync.notification"));
        assert!(a.starts_with("evt_"));
        assert_eq!(a.len(), 30);
    }

    #[test]
    fn validate_rejects_subject_mismatch() {
        let body = EventBody::TaskDeleted {
            task_id: TaskId::generate(),
        };
        let envelope = Envelope {
            event_id: mint_event_id(),
            seq: 0,
            subject_id: "task_somethingelse".to_string(),
            body,
            user_id: UserId::generate(),
            occurred_at: Utc::now(),
            schema_version: SCHEMA_VERSION,
        };
        assert!(matches!(
            validate(&envelope),
            Err(PublishError::Rejected { .. })
        ));
    }
}
