use crate::util::{storage, to_rfc3339};
use beacon_core::BeaconError;
use beacon_core::idempotency::IdempotencyRepository;
use chrono::{DateTime, Utc};
use rusqlite::Connection;

pub struct IdempotencyRepo<'a> {
    pub conn: &'a Connection,
}

impl<'a> IdempotencyRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl IdempotencyRepository for IdempotencyRepo<'_> {
    fn seen(&self, consumer_name: &str, event_id: &str) -> Result<bool, BeaconError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT 1 FROM idempotency_records \
                 WHERE consumer_name = ?1 AND event_id = ?2",
            )
            .map_err(storage)?;
        stmt.exists([consumer_name, event_id]).map_err(storage)
    }

    fn record(
        &self,
        consumer_name: &str,
        event_id: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<(), BeaconError> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO idempotency_records \
                 (consumer_name, event_id, processed_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![consumer_name, event_id, to_rfc3339(&processed_at)],
            )
            .map_err(storage)?;
        Ok(())
    }

    fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, BeaconError> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM idempotency_records WHERE processed_at < ?1",
                [to_rfc3339(&cutoff)],
            )
            .map_err(storage)?;
        Ok(affected as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::with_test_db;
    use chrono::Duration;

    #[test]
    fn record_then_seen() {
        let conn = with_test_db().unwrap();
        let repo = IdempotencyRepo::new(&conn);

        assert!(!repo.seen("audit", "evt_a").unwrap());
        repo.record("audit", "evt_a", Utc::now()).unwrap();
        assert!(repo.seen("audit", "evt_a").unwrap());
        // Same event under a different consumer is unseen.
        assert!(!repo.seen("notifications", "evt_a").unwrap());
    }

    #[test]
    fn record_twice_is_a_no_op() {
        let conn = with_test_db().unwrap();
        let repo = IdempotencyRepo::new(&conn);
        repo.record("audit", "evt_a", Utc::now()).unwrap();
        repo.record("audit", "evt_a", Utc::now()).unwrap();
        assert!(repo.seen("audit", "evt_a").unwrap());
    }

    #[test]
    fn prune_removes_only_old_records() {
        let conn = with_test_db().unwrap();
        let repo = IdempotencyRepo::new(&conn);
        let now = Utc::now();
        repo.record("audit", "evt_old", now - Duration::hours(200))
            .unwrap();
        repo.record("audit", "evt_new", now).unwrap();

        let pruned = repo.prune_older_than(now - Duration::hours(144)).unwrap();
        assert_eq!(pruned, 1);
        assert!(!repo.seen("audit", "evt_old").unwrap());
        assert!(repo.seen("audit", "evt_new").unwrap());
    }
}
