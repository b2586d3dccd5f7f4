use sqlx::{Executor, Row, Sqlite, SqliteConnection};
use types::{AccountId, MatchId};

use crate::models::{InsertOutcome, MedalRecord};
use crate::participants::ensure_rows_belong;
use crate::{DatabaseError, MatchRegistry};

/// Per-match, per-player medal counts.
pub struct MedalLedger;

impl MedalLedger {
    pub async fn bulk_insert(
        conn: &mut SqliteConnection,
        match_id: &MatchId,
        rows: &[MedalRecord],
    ) -> Result<InsertOutcome, DatabaseError> {
        ensure_rows_belong(match_id, rows.iter().map(|r| &r.match_id))?;
        if !MatchRegistry::exists(&mut *conn, match_id).await? {
            return Err(DatabaseError::Integrity(format!(
                "medals written for unknown match {match_id}"
            )));
        }

        let mut outcome = InsertOutcome::default();
        for row in rows {
            let result = sqlx::query(
                "INSERT INTO medals (match_id, account_id, medal_id, count) VALUES (?, ?, ?, ?)
                 ON CONFLICT(match_id, account_id, medal_id) DO NOTHING",
            )
            .bind(row.match_id.as_str())
            .bind(row.account_id.as_str())
            .bind(row.medal_id)
            .bind(row.count)
            .execute(&mut *conn)
            .await?;

            if result.rows_affected() == 1 {
                outcome.inserted += 1;
                continue;
            }

            let (count,): (i64,) = sqlx::query_as(
                "SELECT count FROM medals WHERE match_id = ? AND account_id = ? AND medal_id = ?",
            )
            .bind(match_id.as_str())
            .bind(row.account_id.as_str())
            .bind(row.medal_id)
            .fetch_one(&mut *conn)
            .await?;
            if count != row.count {
                return Err(DatabaseError::Conflict {
                    table: "medals",
                    key: format!("{match_id}/{}/{}", row.account_id, row.medal_id),
                    detail: format!("stored count {count}, incoming {}", row.count),
                });
            }
            outcome.unchanged += 1;
        }

        Ok(outcome)
    }

    pub async fn load_for_match<'e, E>(
        executor: E,
        match_id: &MatchId,
    ) -> Result<Vec<MedalRecord>, DatabaseError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let rows = sqlx::query(
            "SELECT match_id, account_id, medal_id, count FROM medals
             WHERE match_id = ? ORDER BY account_id, medal_id",
        )
        .bind(match_id.as_str())
        .fetch_all(executor)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(MedalRecord {
                    match_id: MatchId::new(row.try_get::<String, _>("match_id")?),
                    account_id: AccountId::new(row.try_get::<String, _>("account_id")?),
                    medal_id: row.try_get("medal_id")?,
                    count: row.try_get("count")?,
                })
            })
            .collect()
    }
}
