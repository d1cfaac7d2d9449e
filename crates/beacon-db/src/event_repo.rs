use crate::util::{decode_json, encode_enum, encode_json, from_rfc3339, storage, to_rfc3339};
use beacon_core::BeaconError;
use beacon_core::events::EventLogRepository;
use beacon_events::ids::UserId;
use beacon_events::types::{Envelope, EventBody, EventKind};
use chrono::{DateTime, Utc};
use rusqlite::Connection;

pub struct EventRepo<'a> {
    pub conn: &'a Connection,
}

impl<'a> EventRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn by_event_id(&self, event_id: &str) -> Result<Option<Envelope>, BeaconError> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_COLUMNS} WHERE event_id = ?1"))
            .map_err(storage)?;
        let mut rows = stmt.query([event_id]).map_err(storage)?;
        let Some(row) = rows.next().map_err(storage)? else {
            return Ok(None);
        };
        Ok(Some(map_event_row(row)?))
    }
}

const SELECT_COLUMNS: &str = "SELECT event_id, seq, subject_id, user_id, body_json, occurred_at, \
     schema_version FROM events";

impl EventLogRepository for EventRepo<'_> {
    fn append(&self, mut envelope: Envelope) -> Result<Envelope, BeaconError> {
        // Callers run this inside the write transaction, so the existence
        // check and the seq assignment cannot interleave with another writer.
        if let Some(existing) = self.by_event_id(&envelope.event_id)? {
            return Ok(existing);
        }
        envelope.seq = next_seq(self.conn)?;
        let sql = "INSERT INTO events (event_id, seq, kind, subject_id, user_id, body_json, \
             occurred_at, schema_version) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";
        let params = (
            envelope.event_id.clone(),
            envelope.seq,
            encode_enum(&envelope.body.kind())?,
            envelope.subject_id.clone(),
            envelope.user_id.to_string(),
            encode_json(&envelope.body)?,
            to_rfc3339(&envelope.occurred_at),
            envelope.schema_version,
        );
        self.conn.execute(sql, params).map_err(storage)?;
        Ok(envelope)
    }

    fn list_after(&self, after: i64, limit: u32) -> Result<Vec<Envelope>, BeaconError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{SELECT_COLUMNS} WHERE seq > ?1 ORDER BY seq ASC LIMIT ?2"
            ))
            .map_err(storage)?;
        let mut rows = stmt.query(rusqlite::params![after, limit]).map_err(storage)?;
        let mut events = Vec::new();
        while let Some(row) = rows.next().map_err(storage)? {
            events.push(map_event_row(row)?);
        }
        Ok(events)
    }

    fn deltas_for_user_after(
        &self,
        user_id: &UserId,
        after: i64,
        limit: u32,
    ) -> Result<Vec<Envelope>, BeaconError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{SELECT_COLUMNS} WHERE user_id = ?1 AND kind = ?2 AND seq > ?3 \
                 ORDER BY seq ASC LIMIT ?4"
            ))
            .map_err(storage)?;
        let kind = encode_enum(&EventKind::SyncDelta)?;
        let mut rows = stmt
            .query(rusqlite::params![user_id.to_string(), kind, after, limit])
            .map_err(storage)?;
        let mut events = Vec::new();
        while let Some(row) = rows.next().map_err(storage)? {
            events.push(map_event_row(row)?);
        }
        Ok(events)
    }

    fn head_seq(&self) -> Result<i64, BeaconError> {
        self.conn
            .query_row("SELECT COALESCE(MAX(seq), 0) FROM events", [], |row| {
                row.get(0)
            })
            .map_err(storage)
    }

    fn pruned_through(&self) -> Result<i64, BeaconError> {
        self.conn
            .query_row(
                "SELECT COALESCE((SELECT value FROM log_meta WHERE key = 'pruned_through'), 0)",
                [],
                |row| row.get(0),
            )
            .map_err(storage)
    }

    fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, BeaconError> {
        let horizon: Option<i64> = self
            .conn
            .query_row(
                "SELECT MAX(seq) FROM events WHERE occurred_at < ?1",
                [to_rfc3339(&cutoff)],
                |row| row.get(0),
            )
            .map_err(storage)?;
        let Some(horizon) = horizon else {
            return Ok(0);
        };
        // Prune by seq, not timestamp, so the surviving log stays contiguous
        // above the recorded horizon.
        let deleted = self
            .conn
            .execute("DELETE FROM events WHERE seq <= ?1", [horizon])
            .map_err(storage)?;
        self.conn
            .execute(
                "INSERT INTO log_meta (key, value) VALUES ('pruned_through', ?1) \
                 ON CONFLICT (key) DO UPDATE SET value = max(value, excluded.value)",
                [horizon],
            )
            .map_err(storage)?;
        Ok(deleted as u64)
    }
}

fn map_event_row(row: &rusqlite::Row<'_>) -> Result<Envelope, BeaconError> {
    let event_id: String = row.get(0).map_err(storage)?;
    let seq: i64 = row.get(1).map_err(storage)?;
    let subject_id: String = row.get(2).map_err(storage)?;
    let user_id: String = row.get(3).map_err(storage)?;
    let body_json: String = row.get(4).map_err(storage)?;
    let occurred_at: String = row.get(5).map_err(storage)?;
    let schema_version: u16 = row.get(6).map_err(storage)?;

    let body: EventBody = decode_json(&body_json)?;
    Ok(Envelope {
        event_id,
        seq,
        body,
        subject_id,
        user_id: UserId::new(user_id)?,
        occurred_at: from_rfc3339(&occurred_at)?,
        schema_version,
    })
}

fn next_seq(conn: &Connection) -> Result<i64, BeaconError> {
    conn.query_row("SELECT COALESCE(MAX(seq), 0) + 1 FROM events", [], |row| {
        row.get(0)
    })
    .map_err(storage)
}
