use sqlx::{Executor, Row, Sqlite, SqliteConnection};
use types::AccountId;

use crate::models::AliasRecord;
use crate::DatabaseError;

/// Global account id -> last known display name.
pub struct AliasDirectory;

impl AliasDirectory {
    /// Records a sighting of a display name. An existing alias is only replaced
    /// by one seen at the same time or later. Returns whether the row changed.
    pub async fn observe(
        conn: &mut SqliteConnection,
        alias: &AliasRecord,
    ) -> Result<bool, DatabaseError> {
        if let Some(current) = Self::get(&mut *conn, &alias.account_id).await? {
            if current.last_seen_at > alias.last_seen_at || current == *alias {
                return Ok(false);
            }
        }

        sqlx::query(
            "INSERT INTO aliases (account_id, display_name, last_seen_at, provenance)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(account_id) DO UPDATE SET
                display_name = excluded.display_name,
                last_seen_at = excluded.last_seen_at,
                provenance = excluded.provenance",
        )
        .bind(alias.account_id.as_str())
        .bind(&alias.display_name)
        .bind(alias.last_seen_at)
        .bind(&alias.provenance)
        .execute(&mut *conn)
        .await?;

        Ok(true)
    }

    pub async fn observe_all(
        conn: &mut SqliteConnection,
        aliases: &[AliasRecord],
    ) -> Result<usize, DatabaseError> {
        let mut changed = 0;
        for alias in aliases {
            if Self::observe(&mut *conn, alias).await? {
                changed += 1;
            }
        }
        Ok(changed)
    }

    pub async fn get<'e, E>(
        executor: E,
        account_id: &AccountId,
    ) -> Result<Option<AliasRecord>, DatabaseError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let row = sqlx::query(
            "SELECT account_id, display_name, last_seen_at, provenance FROM aliases
             WHERE account_id = ?",
        )
        .bind(account_id.as_str())
        .fetch_optional(executor)
        .await?;

        Ok(match row {
            Some(r) => Some(AliasRecord {
                account_id: AccountId::new(r.try_get::<String, _>("account_id")?),
                display_name: r.try_get("display_name")?,
                last_seen_at: r.try_get("last_seen_at")?,
                provenance: r.try_get("provenance")?,
            }),
            None => None,
        })
    }

    pub async fn count<'e, E>(executor: E) -> Result<i64, DatabaseError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM aliases")
            .fetch_one(executor)
            .await?;
        Ok(count)
    }
}
