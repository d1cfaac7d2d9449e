//! Durable reminder timers: schedule/reschedule/cancel plus the poll loop
//! that turns expired jobs into `reminder.due` events. Timer state lives in
//! the job table, never in process memory, so restarts pick up where the
//! previous process stopped.

pub mod scheduler;
pub mod worker;

pub use scheduler::Scheduler;
pub use worker::{FirePass, FiringConfig, FiringWorker, WorkerHandle};
