pub mod audit;
pub mod cursors;
pub mod dead_letters;
pub mod error;
pub mod events;
pub mod idempotency;
pub mod jobs;
pub mod notifications;
pub mod publisher;
pub mod recurrence;
pub mod store;
pub mod task_store;

pub mod types;

pub use crate::error::{BeaconError, HandlerError, PublishError, ScheduleError, TaskStoreError};
pub use crate::publisher::{Ack, EventDraft, Publisher};
pub use crate::store::Store;
pub use crate::task_store::{NewTaskCommand, TaskStore};
