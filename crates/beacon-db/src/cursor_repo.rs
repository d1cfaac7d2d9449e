use crate::util::{storage, to_rfc3339};
use beacon_core::BeaconError;
use beacon_core::cursors::CursorRepository;
use chrono::{DateTime, Utc};
use rusqlite::Connection;

pub struct CursorRepo<'a> {
    pub conn: &'a Connection,
}

impl<'a> CursorRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl CursorRepository for CursorRepo<'_> {
    fn get(&self, consumer_name: &str) -> Result<i64, BeaconError> {
        self.conn
            .query_row(
                "SELECT COALESCE((SELECT acked_seq FROM consumer_cursors \
                 WHERE consumer_name = ?1), 0)",
                [consumer_name],
                |row| row.get(0),
            )
            .map_err(storage)
    }

    fn advance(
        &self,
        consumer_name: &str,
        seq: i64,
        now: DateTime<Utc>,
    ) -> Result<(), BeaconError> {
        self.conn
            .execute(
                "INSERT INTO consumer_cursors (consumer_name, acked_seq, updated_at) \
                 VALUES (?1, ?2, ?3) ON CONFLICT (consumer_name) DO UPDATE SET \
                 acked_seq = max(acked_seq, excluded.acked_seq), \
                 updated_at = excluded.updated_at",
                rusqlite::params![consumer_name, seq, to_rfc3339(&now)],
            )
            .map_err(storage)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::with_test_db;

    #[test]
    fn cursor_starts_at_zero_and_never_moves_backwards() {
        let conn = with_test_db().unwrap();
        let repo = CursorRepo::new(&conn);

        assert_eq!(repo.get("audit").unwrap(), 0);
        repo.advance("audit", 12, Utc::now()).unwrap();
        assert_eq!(repo.get("audit").unwrap(), 12);
        repo.advance("audit", 7, Utc::now()).unwrap();
        assert_eq!(repo.get("audit").unwrap(), 12);
        // Independent per consumer.
        assert_eq!(repo.get("notifications").unwrap(), 0);
    }
}
