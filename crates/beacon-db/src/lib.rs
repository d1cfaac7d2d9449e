//! SQLite persistence for the beacon workspace: the append-only event log,
//! reminder jobs, idempotency records, consumer cursors, dead letters,
//! notifications, and the audit trail.

pub mod audit_repo;
pub mod cursor_repo;
pub mod dead_letter_repo;
pub mod event_repo;
pub mod idempotency_repo;
pub mod job_repo;
pub mod notification_repo;
pub mod schema;
pub mod store;
pub mod util;

pub use schema::{open_and_migrate, with_test_db};
pub use store::DbStore;
