use crate::util::{decode_json, encode_json, from_rfc3339, storage, to_rfc3339};
use beacon_core::BeaconError;
use beacon_core::dead_letters::DeadLetterRepository;
use beacon_core::types::DeadLetter;
use beacon_events::ids::DeadLetterId;
use rusqlite::Connection;

pub struct DeadLetterRepo<'a> {
    pub conn: &'a Connection,
}

impl<'a> DeadLetterRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

const SELECT_COLUMNS: &str = "SELECT id, consumer_name, event_id, envelope_json, attempts, \
     last_error, failed_at FROM dead_letters";

impl DeadLetterRepository for DeadLetterRepo<'_> {
    fn insert(&self, letter: &DeadLetter) -> Result<(), BeaconError> {
        let sql = "INSERT INTO dead_letters (id, consumer_name, event_id, envelope_json, \
             attempts, last_error, failed_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";
        let params = (
            letter.id.to_string(),
            letter.consumer_name.clone(),
            letter.event_id.clone(),
            encode_json(&letter.envelope)?,
            letter.attempts,
            letter.last_error.clone(),
            to_rfc3339(&letter.failed_at),
        );
        self.conn.execute(sql, params).map_err(storage)?;
        Ok(())
    }

    fn list(&self, limit: u32) -> Result<Vec<DeadLetter>, BeaconError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{SELECT_COLUMNS} ORDER BY failed_at DESC LIMIT ?1"
            ))
            .map_err(storage)?;
        let mut rows = stmt.query([limit]).map_err(storage)?;
        let mut letters = Vec::new();
        while let Some(row) = rows.next().map_err(storage)? {
            letters.push(map_letter_row(row)?);
        }
        Ok(letters)
    }

    fn get(&self, id: &DeadLetterId) -> Result<Option<DeadLetter>, BeaconError> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
            .map_err(storage)?;
        let mut rows = stmt.query([id.to_string()]).map_err(storage)?;
        let Some(row) = rows.next().map_err(storage)? else {
            return Ok(None);
        };
        Ok(Some(map_letter_row(row)?))
    }

    fn remove(&self, id: &DeadLetterId) -> Result<bool, BeaconError> {
        let affected = self
            .conn
            .execute("DELETE FROM dead_letters WHERE id = ?1", [id.to_string()])
            .map_err(storage)?;
        Ok(affected > 0)
    }
}

fn map_letter_row(row: &rusqlite::Row<'_>) -> Result<DeadLetter, BeaconError> {
    let id: String = row.get(0).map_err(storage)?;
    let consumer_name: String = row.get(1).map_err(storage)?;
    let event_id: String = row.get(2).map_err(storage)?;
    let envelope_json: String = row.get(3).map_err(storage)?;
    let attempts: u32 = row.get(4).map_err(storage)?;
    let last_error: String = row.get(5).map_err(storage)?;
    let failed_at: String = row.get(6).map_err(storage)?;

    Ok(DeadLetter {
        id: DeadLetterId::new(id)?,
        consumer_name,
        event_id,
        envelope: decode_json(&envelope_json)?,
        attempts,
        last_error,
        failed_at: from_rfc3339(&failed_at)?,
    })
}
