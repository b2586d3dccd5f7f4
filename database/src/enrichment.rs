//! Per-account derived data.
//!
//! Unlike the shared stores, enrichment rows are relative to one tracked
//! account. [`EnrichmentStore`] is bound to an account when it is created and
//! every query it issues is filtered on that account, so one account's engine
//! cannot read or write another account's rows.
//!
//! The presence of a row also records that the account has been counted in the
//! match's `tracked_player_count`.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};
use types::{AccountId, MatchId};

use crate::models::{EnrichmentRecord, EnrichmentValues};
use crate::DatabaseError;

#[derive(Debug, Clone)]
pub struct EnrichmentStore {
    account: AccountId,
}

impl EnrichmentStore {
    pub fn for_account(account: AccountId) -> Self {
        Self { account }
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    /// Creates an empty row for the match unless one exists. Returns `true`
    /// if the row is new, i.e. this is the account's first observation.
    pub async fn create_stub<'e, E>(
        &self,
        executor: E,
        match_id: &MatchId,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "INSERT INTO enrichment (match_id, account_id, created_at, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(match_id, account_id) DO NOTHING",
        )
        .bind(match_id.as_str())
        .bind(self.account.as_str())
        .bind(now)
        .bind(now)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Stores computed values on an existing row.
    pub async fn record<'e, E>(
        &self,
        executor: E,
        match_id: &MatchId,
        values: &EnrichmentValues,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "UPDATE enrichment SET performance_score = ?, session_id = ?, with_associates = ?,
                                   updated_at = ?
             WHERE match_id = ? AND account_id = ?",
        )
        .bind(values.performance_score)
        .bind(&values.session_id)
        .bind(values.with_associates)
        .bind(now)
        .bind(match_id.as_str())
        .bind(self.account.as_str())
        .execute(executor)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::MatchNotFound(format!(
                "{match_id} has no enrichment row for {}",
                self.account
            )));
        }
        Ok(())
    }

    pub async fn load<'e, E>(
        &self,
        executor: E,
        match_id: &MatchId,
    ) -> Result<Option<EnrichmentRecord>, DatabaseError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let row = sqlx::query("SELECT * FROM enrichment WHERE match_id = ? AND account_id = ?")
            .bind(match_id.as_str())
            .bind(self.account.as_str())
            .fetch_optional(executor)
            .await?;

        row.as_ref().map(enrichment_from_row).transpose()
    }

    /// Stubs still waiting for the downstream pass, oldest match first.
    pub async fn pending<'e, E>(
        &self,
        executor: E,
        limit: u32,
    ) -> Result<Vec<EnrichmentRecord>, DatabaseError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let rows = sqlx::query(
            "SELECT e.* FROM enrichment e
             JOIN matches m ON m.match_id = e.match_id
             WHERE e.account_id = ?
               AND e.performance_score IS NULL
               AND e.session_id IS NULL
               AND e.with_associates IS NULL
             ORDER BY m.start_time, e.match_id
             LIMIT ?",
        )
        .bind(self.account.as_str())
        .bind(limit)
        .fetch_all(executor)
        .await?;

        rows.iter().map(enrichment_from_row).collect()
    }

    pub async fn count<'e, E>(&self, executor: E) -> Result<i64, DatabaseError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM enrichment WHERE account_id = ?")
            .bind(self.account.as_str())
            .fetch_one(executor)
            .await?;
        Ok(count)
    }
}

fn enrichment_from_row(row: &SqliteRow) -> Result<EnrichmentRecord, DatabaseError> {
    Ok(EnrichmentRecord {
        match_id: MatchId::new(row.try_get::<String, _>("match_id")?),
        account_id: AccountId::new(row.try_get::<String, _>("account_id")?),
        performance_score: row.try_get("performance_score")?,
        session_id: row.try_get("session_id")?,
        with_associates: row.try_get("with_associates")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
