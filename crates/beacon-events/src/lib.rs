//! Shared event contracts: typed identifiers, the event envelope with its
//! topic payloads, and the in-process broadcast bus.

pub mod bus;
pub mod ids;
pub mod types;

pub use bus::EventBus;
pub use ids::{ConnectionId, DeadLetterId, IdError, JobId, NotificationId, TaskId, UserId};
pub use types::{Envelope, EventBody, EventKind, RecurrenceRule, SCHEMA_VERSION, SyncDelta};
