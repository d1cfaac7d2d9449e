pub mod audit;
pub mod dead_letter;
pub mod job;
pub mod notification;

pub use audit::AuditEntry;
pub use dead_letter::DeadLetter;
pub use job::{JobStatus, ReminderJob};
pub use notification::Notification;
