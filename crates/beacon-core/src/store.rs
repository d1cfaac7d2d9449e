use crate::BeaconError;
use crate::audit::AuditRepository;
use crate::cursors::CursorRepository;
use crate::dead_letters::DeadLetterRepository;
use crate::events::EventLogRepository;
use crate::idempotency::IdempotencyRepository;
use crate::jobs::ReminderJobRepository;
use crate::notifications::NotificationRepository;

pub trait Store {
    type Events<'a>: EventLogRepository
    where
        Self: 'a;
    type Jobs<'a>: ReminderJobRepository
    where
        Self: 'a;
    type Idempotency<'a>: IdempotencyRepository
    where
        Self: 'a;
    type DeadLetters<'a>: DeadLetterRepository
    where
        Self: 'a;
    type Notifications<'a>: NotificationRepository
    where
        Self: 'a;
    type Audit<'a>: AuditRepository
    where
        Self: 'a;
    type Cursors<'a>: CursorRepository
    where
        Self: 'a;

    fn events(&self) -> Self::Events<'_>;
    fn jobs(&self) -> Self::Jobs<'_>;
    fn idempotency(&self) -> Self::Idempotency<'_>;
    fn dead_letters(&self) -> Self::DeadLetters<'_>;
    fn notifications(&self) -> Self::Notifications<'_>;
    fn audit(&self) -> Self::Audit<'_>;
    fn cursors(&self) -> Self::Cursors<'_>;

    fn with_tx<F, T>(&self, f: F) -> Result<T, BeaconError>
    where
        F: FnOnce(&Self) -> Result<T, BeaconError>;
}
