use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite, SqliteConnection};
use types::{AccountId, MatchId};

use crate::models::{EventRecord, InsertOutcome};
use crate::participants::ensure_rows_belong;
use crate::{DatabaseError, MatchRegistry};

/// Ordered per-match event timeline.
pub struct EventLog;

impl EventLog {
    pub async fn bulk_insert(
        conn: &mut SqliteConnection,
        match_id: &MatchId,
        rows: &[EventRecord],
    ) -> Result<InsertOutcome, DatabaseError> {
        ensure_rows_belong(match_id, rows.iter().map(|r| &r.match_id))?;
        if !MatchRegistry::exists(&mut *conn, match_id).await? {
            return Err(DatabaseError::Integrity(format!(
                "events written for unknown match {match_id}"
            )));
        }

        let mut outcome = InsertOutcome::default();
        for row in rows {
            let result = sqlx::query(
                "INSERT INTO match_events (match_id, seq, event_type, time_offset_ms, actor_id, target_id)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(match_id, seq) DO NOTHING",
            )
            .bind(row.match_id.as_str())
            .bind(row.seq)
            .bind(&row.event_type)
            .bind(row.time_offset_ms)
            .bind(row.actor_id.as_ref().map(AccountId::as_str))
            .bind(row.target_id.as_ref().map(AccountId::as_str))
            .execute(&mut *conn)
            .await?;

            if result.rows_affected() == 1 {
                outcome.inserted += 1;
                continue;
            }

            let existing = sqlx::query("SELECT * FROM match_events WHERE match_id = ? AND seq = ?")
                .bind(match_id.as_str())
                .bind(row.seq)
                .fetch_one(&mut *conn)
                .await?;
            if event_from_row(&existing)? != *row {
                return Err(DatabaseError::Conflict {
                    table: "match_events",
                    key: format!("{match_id}#{}", row.seq),
                    detail: "stored event differs from incoming timeline".to_string(),
                });
            }
            outcome.unchanged += 1;
        }

        Ok(outcome)
    }

    pub async fn load_for_match<'e, E>(
        executor: E,
        match_id: &MatchId,
    ) -> Result<Vec<EventRecord>, DatabaseError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let rows = sqlx::query(
            "SELECT * FROM match_events WHERE match_id = ? ORDER BY time_offset_ms, seq",
        )
        .bind(match_id.as_str())
        .fetch_all(executor)
        .await?;

        rows.iter().map(event_from_row).collect()
    }
}

fn event_from_row(row: &SqliteRow) -> Result<EventRecord, DatabaseError> {
    Ok(EventRecord {
        match_id: MatchId::new(row.try_get::<String, _>("match_id")?),
        seq: row.try_get("seq")?,
        event_type: row.try_get("event_type")?,
        time_offset_ms: row.try_get("time_offset_ms")?,
        actor_id: row
            .try_get::<Option<String>, _>("actor_id")?
            .map(AccountId::new),
        target_id: row
            .try_get::<Option<String>, _>("target_id")?
            .map(AccountId::new),
    })
}
