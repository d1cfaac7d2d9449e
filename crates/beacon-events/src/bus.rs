use crate::types::Envelope;
use tokio::sync::broadcast;

/// In-process fan-out of accepted envelopes. Durability lives in the event
/// log; the bus only wakes live subscribers, so a lagged receiver that drops
/// messages loses nothing it cannot re-read from the log.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Envelope>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: Envelope) -> Result<(), broadcast::error::SendError<Envelope>> {
        self.sender.send(event).map(|_| ())
    }
}
