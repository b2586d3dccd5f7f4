use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite, SqliteConnection};
use types::{AccountId, MatchId, SkillData};

use crate::models::{InsertOutcome, ParticipantRecord};
use crate::{DatabaseError, MatchRegistry};

/// Per-match roster: one row for every player in the match document.
pub struct ParticipantStore;

impl ParticipantStore {
    /// Inserts roster rows. Rows already present with the same stats are
    /// skipped; rows present with different stats are a conflict.
    pub async fn bulk_insert(
        conn: &mut SqliteConnection,
        match_id: &MatchId,
        rows: &[ParticipantRecord],
    ) -> Result<InsertOutcome, DatabaseError> {
        ensure_rows_belong(match_id, rows.iter().map(|r| &r.match_id))?;
        if !MatchRegistry::exists(&mut *conn, match_id).await? {
            return Err(DatabaseError::Integrity(format!(
                "participants written for unknown match {match_id}"
            )));
        }

        let mut outcome = InsertOutcome::default();
        for row in rows {
            let result = sqlx::query(
                "INSERT INTO participants (match_id, account_id, team_id, outcome, rank, score,
                                           kills, deaths, assists, shots_fired, shots_hit,
                                           damage_dealt, damage_taken, csr_before, csr_after,
                                           expected_kills, expected_deaths)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(match_id, account_id) DO NOTHING",
            )
            .bind(row.match_id.as_str())
            .bind(row.account_id.as_str())
            .bind(row.team_id)
            .bind(&row.outcome)
            .bind(row.rank)
            .bind(row.score)
            .bind(row.kills)
            .bind(row.deaths)
            .bind(row.assists)
            .bind(row.shots_fired)
            .bind(row.shots_hit)
            .bind(row.damage_dealt)
            .bind(row.damage_taken)
            .bind(row.csr_before)
            .bind(row.csr_after)
            .bind(row.expected_kills)
            .bind(row.expected_deaths)
            .execute(&mut *conn)
            .await?;

            if result.rows_affected() == 1 {
                outcome.inserted += 1;
                continue;
            }

            let existing = Self::load_one(&mut *conn, match_id, &row.account_id)
                .await?
                .ok_or_else(|| {
                    DatabaseError::Query(format!(
                        "participant {} vanished from match {match_id}",
                        row.account_id
                    ))
                })?;
            if !existing.same_stats(row) {
                return Err(DatabaseError::Conflict {
                    table: "participants",
                    key: format!("{match_id}/{}", row.account_id),
                    detail: "stored stats differ from incoming document".to_string(),
                });
            }
            outcome.unchanged += 1;
        }

        Ok(outcome)
    }

    /// Fills skill columns that are still empty. Returns the number of rows touched.
    pub async fn apply_skill(
        conn: &mut SqliteConnection,
        match_id: &MatchId,
        skill: &SkillData,
    ) -> Result<u64, DatabaseError> {
        let mut touched = 0;
        for entry in &skill.entries {
            let result = sqlx::query(
                "UPDATE participants SET
                    csr_before = COALESCE(csr_before, ?),
                    csr_after = COALESCE(csr_after, ?),
                    expected_kills = COALESCE(expected_kills, ?),
                    expected_deaths = COALESCE(expected_deaths, ?)
                 WHERE match_id = ? AND account_id = ?",
            )
            .bind(entry.csr_before)
            .bind(entry.csr_after)
            .bind(entry.expected_kills)
            .bind(entry.expected_deaths)
            .bind(match_id.as_str())
            .bind(entry.account_id.as_str())
            .execute(&mut *conn)
            .await?;
            touched += result.rows_affected();
        }
        Ok(touched)
    }

    pub async fn load_for_match<'e, E>(
        executor: E,
        match_id: &MatchId,
    ) -> Result<Vec<ParticipantRecord>, DatabaseError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let rows = sqlx::query("SELECT * FROM participants WHERE match_id = ? ORDER BY account_id")
            .bind(match_id.as_str())
            .fetch_all(executor)
            .await?;

        rows.iter().map(participant_from_row).collect()
    }

    pub async fn load_one<'e, E>(
        executor: E,
        match_id: &MatchId,
        account_id: &AccountId,
    ) -> Result<Option<ParticipantRecord>, DatabaseError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let row = sqlx::query("SELECT * FROM participants WHERE match_id = ? AND account_id = ?")
            .bind(match_id.as_str())
            .bind(account_id.as_str())
            .fetch_optional(executor)
            .await?;

        row.as_ref().map(participant_from_row).transpose()
    }

    pub async fn count_for_match<'e, E>(executor: E, match_id: &MatchId) -> Result<i64, DatabaseError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM participants WHERE match_id = ?")
                .bind(match_id.as_str())
                .fetch_one(executor)
                .await?;
        Ok(count)
    }
}

pub(crate) fn ensure_rows_belong<'a>(
    match_id: &MatchId,
    mut ids: impl Iterator<Item = &'a MatchId>,
) -> Result<(), DatabaseError> {
    match ids.find(|id| *id != match_id) {
        Some(other) => Err(DatabaseError::Integrity(format!(
            "row for match {other} passed in a batch for {match_id}"
        ))),
        None => Ok(()),
    }
}

fn participant_from_row(row: &SqliteRow) -> Result<ParticipantRecord, DatabaseError> {
    Ok(ParticipantRecord {
        match_id: MatchId::new(row.try_get::<String, _>("match_id")?),
        account_id: AccountId::new(row.try_get::<String, _>("account_id")?),
        team_id: row.try_get("team_id")?,
        outcome: row.try_get("outcome")?,
        rank: row.try_get("rank")?,
        score: row.try_get("score")?,
        kills: row.try_get("kills")?,
        deaths: row.try_get("deaths")?,
        assists: row.try_get("assists")?,
        shots_fired: row.try_get("shots_fired")?,
        shots_hit: row.try_get("shots_hit")?,
        damage_dealt: row.try_get("damage_dealt")?,
        damage_taken: row.try_get("damage_taken")?,
        csr_before: row.try_get("csr_before")?,
        csr_after: row.try_get("csr_after")?,
        expected_kills: row.try_get("expected_kills")?,
        expected_deaths: row.try_get("expected_deaths")?,
    })
}
