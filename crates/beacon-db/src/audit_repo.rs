use crate::util::{
    decode_enum, decode_json, encode_enum, encode_json, from_rfc3339, storage, to_rfc3339,
};
use beacon_core::BeaconError;
use beacon_core::audit::AuditRepository;
use beacon_core::types::AuditEntry;
use beacon_events::ids::UserId;
use rusqlite::Connection;

pub struct AuditRepo<'a> {
    pub conn: &'a Connection,
}

impl<'a> AuditRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl AuditRepository for AuditRepo<'_> {
    fn record(&self, entry: &AuditEntry) -> Result<bool, BeaconError> {
        let sql = "INSERT OR IGNORE INTO audit_log (event_id, kind, subject_id, user_id, \
             payload_json, occurred_at, recorded_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";
        let params = (
            entry.event_id.clone(),
            encode_enum(&entry.kind)?,
            entry.subject_id.clone(),
            entry.user_id.to_string(),
            encode_json(&entry.payload)?,
            to_rfc3339(&entry.occurred_at),
            to_rfc3339(&entry.recorded_at),
        );
        let affected = self.conn.execute(sql, params).map_err(storage)?;
        Ok(affected > 0)
    }

    fn get(&self, event_id: &str) -> Result<Option<AuditEntry>, BeaconError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT event_id, kind, subject_id, user_id, payload_json, occurred_at, \
                 recorded_at FROM audit_log WHERE event_id = ?1",
            )
            .map_err(storage)?;
        let mut rows = stmt.query([event_id]).map_err(storage)?;
        let Some(row) = rows.next().map_err(storage)? else {
            return Ok(None);
        };

        let event_id: String = row.get(0).map_err(storage)?;
        let kind: String = row.get(1).map_err(storage)?;
        let subject_id: String = row.get(2).map_err(storage)?;
        let user_id: String = row.get(3).map_err(storage)?;
        let payload_json: String = row.get(4).map_err(storage)?;
        let occurred_at: String = row.get(5).map_err(storage)?;
        let recorded_at: String = row.get(6).map_err(storage)?;

        Ok(Some(AuditEntry {
            event_id,
            kind: decode_enum(&kind)?,
            subject_id,
            user_id: UserId::new(user_id)?,
            payload: decode_json(&payload_json)?,
            occurred_at: from_rfc3339(&occurred_at)?,
            recorded_at: from_rfc3339(&recorded_at)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::with_test_db;
    use beacon_core::publisher::mint_event_id;
    use beacon_events::ids::TaskId;
    use beacon_events::types::{Envelope, EventBody, SCHEMA_VERSION};
    use chrono::Utc;

    fn entry() -> AuditEntry {
        let body = EventBody::TaskCreated {
            task_id: TaskId::generate(),
            title: "file taxes".to_string(),
            due_at: None,
            recurrence: None,
        };
        let envelope = Envelope {
            event_id: mint_event_id(),
            seq: 9,
            subject_id: body.subject_id(),
            body,
            user_id: UserId::generate(),
            occurred_at: Utc::now(),
            schema_version: SCHEMA_VERSION,
        };
        AuditEntry::from_envelope(&envelope, Utc::now())
    }

    #[test]
    fn duplicate_record_is_treated_as_success() {
        let conn = with_test_db().unwrap();
        let repo = AuditRepo::new(&conn);
        let e = entry();

        assert!(repo.record(&e).unwrap());
        assert!(!repo.record(&e).unwrap());

        let got = repo.get(&e.event_id).unwrap().unwrap();
        assert_eq!(got.kind, e.kind);
        assert_eq!(got.payload["title"], "file taxes");
    }
}
