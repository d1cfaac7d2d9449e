//! Event consumers and the delivery runtime that drives them.
//!
//! Each consumer runs inside its own [`ConsumerRuntime`]: an independent
//! cursor over the event log, per-user ordered delivery, idempotency checks,
//! retry with backoff, and dead-lettering when the attempt budget runs out.
//! Handlers implement [`Consumer`] and stay oblivious to all of that.

pub mod audit;
pub mod handler;
pub mod notification;
pub mod policy;
pub mod recurring;
pub mod runtime;
pub mod task_api;

#[cfg(test)]
pub(crate) mod support;

pub use audit::AuditConsumer;
pub use handler::Consumer;
pub use notification::NotificationConsumer;
pub use policy::{JitterMode, RetryPolicy};
pub use recurring::RecurringTaskConsumer;
pub use runtime::{
    ConsumerRuntime, DrainPass, ReplayOutcome, RuntimeConfig, RuntimeHandle, replay_dead_letter,
};
pub use task_api::HttpTaskStore;
