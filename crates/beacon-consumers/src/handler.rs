use async_trait::async_trait;
use beacon_core::{BeaconError, HandlerError, PublishError};
use beacon_events::types::Envelope;

/// One independent subscriber. The runtime owns dedup, retry, and dead
/// lettering; a handler only applies the event's effect and classifies its
/// failures.
///
/// Handlers must tolerate redelivery: the runtime records an event as
/// processed only after `handle` returns Ok, so a crash in between replays
/// the event.
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Stable name keying this consumer's cursor, idempotency records, and
    /// dead letters. Renaming it makes the consumer reprocess the log.
    fn name(&self) -> &'static str;

    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError>;
}

/// Storage trouble is always worth a retry.
pub(crate) fn storage_failure(err: BeaconError) -> HandlerError {
    HandlerError::transient(err.to_string())
}

/// A bus that will not take the event now may take it later; an envelope it
/// rejects outright never will.
pub(crate) fn publish_failure(err: PublishError) -> HandlerError {
    match err {
        PublishError::Unavailable { message } => HandlerError::transient(message),
        PublishError::Rejected { message } => HandlerError::permanent(message),
    }
}
