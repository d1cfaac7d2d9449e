use crate::types::JobStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublishError {
    /// Bus unreachable or write not durably accepted. Retryable; the
    /// originating task mutation stays committed either way.
    #[error("bus unavailable: {message}")]
    Unavailable { message: String },
    /// Malformed envelope. Fatal for this event, never retried.
    #[error("envelope rejected: {message}")]
    Rejected { message: String },
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("reminder job not found")]
    JobNotFound,
    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
}

/// What a consumer handler reports back to the runtime. `Transient` buys a
/// retry with backoff; `Permanent` dead-letters immediately.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("transient: {message}")]
    Transient { message: String },
    #[error("permanent: {message}")]
    Permanent { message: String },
}

impl HandlerError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum TaskStoreError {
    #[error("task store unavailable: {message}")]
    Unavailable { message: String },
    #[error("task store rejected request: {message}")]
    Rejected { message: String },
}

#[derive(Debug, Error)]
pub enum BeaconError {
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    TaskStore(#[from] TaskStoreError),
    #[error(transparent)]
    Id(#[from] beacon_events::IdError),
    #[error("storage error: {message}")]
    Storage { message: String },
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl BeaconError {
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage {
            message: err.to_string(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
