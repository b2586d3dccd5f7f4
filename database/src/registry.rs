use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::types::Json;
use sqlx::{Executor, Row, Sqlite, SqliteConnection};
use types::{AccountId, MatchId, TeamScore};

use crate::models::{CompletionFlag, CompletionFlags, MatchMetadata, MatchRecord, MatchState};
use crate::DatabaseError;

/// Outcome of [`MatchRegistry::create_if_absent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Creation {
    Created,
    AlreadyExisted(MatchState),
}

/// Canonical per-match metadata, completion bitmask and tracked-player count.
pub struct MatchRegistry;

impl MatchRegistry {
    pub async fn lookup<'e, E>(
        executor: E,
        match_id: &MatchId,
    ) -> Result<Option<MatchState>, DatabaseError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let row = sqlx::query(
            "SELECT completion_flags, tracked_player_count FROM matches WHERE match_id = ?",
        )
        .bind(match_id.as_str())
        .fetch_optional(executor)
        .await?;

        Ok(match row {
            Some(r) => Some(MatchState {
                flags: CompletionFlags::from_bits(r.try_get("completion_flags")?),
                tracked_player_count: r.try_get("tracked_player_count")?,
            }),
            None => None,
        })
    }

    pub async fn load<'e, E>(
        executor: E,
        match_id: &MatchId,
    ) -> Result<Option<MatchRecord>, DatabaseError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let row = sqlx::query(
            "SELECT match_id, start_time, end_time, map_id, mode_id, playlist_id, team_scores,
                    completion_flags, first_sync_owner, first_sync_at, last_updated_at,
                    tracked_player_count
             FROM matches WHERE match_id = ?",
        )
        .bind(match_id.as_str())
        .fetch_optional(executor)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    /// Inserts the match unless it already exists. An existing record is left
    /// untouched and its current state is returned.
    pub async fn create_if_absent(
        conn: &mut SqliteConnection,
        metadata: &MatchMetadata,
        owner: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<Creation, DatabaseError> {
        let result = sqlx::query(
            "INSERT INTO matches (match_id, start_time, end_time, map_id, mode_id, playlist_id,
                                  team_scores, completion_flags, first_sync_owner, first_sync_at,
                                  last_updated_at, tracked_player_count)
             VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, 0)
             ON CONFLICT(match_id) DO NOTHING",
        )
        .bind(metadata.match_id.as_str())
        .bind(metadata.start_time)
        .bind(metadata.end_time)
        .bind(&metadata.map_id)
        .bind(&metadata.mode_id)
        .bind(&metadata.playlist_id)
        .bind(Json(&metadata.team_scores))
        .bind(owner.as_str())
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 1 {
            tracing::debug!(match_id = %metadata.match_id, owner = %owner, "created match record");
            return Ok(Creation::Created);
        }

        let state = Self::lookup(&mut *conn, &metadata.match_id)
            .await?
            .ok_or_else(|| DatabaseError::MatchNotFound(metadata.match_id.to_string()))?;
        Ok(Creation::AlreadyExisted(state))
    }

    /// Marks a data category as loaded. Setting a flag that is already set is a no-op.
    pub async fn set_flag<'e, E>(
        executor: E,
        match_id: &MatchId,
        flag: CompletionFlag,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "UPDATE matches SET completion_flags = completion_flags | ?, last_updated_at = ?
             WHERE match_id = ?",
        )
        .bind(flag.bit())
        .bind(now)
        .bind(match_id.as_str())
        .execute(executor)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::MatchNotFound(match_id.to_string()));
        }
        Ok(())
    }

    /// Adds one tracked observer. Callers guarantee at most one call per
    /// (match, account) pair.
    pub async fn increment_tracked_count<'e, E>(
        executor: E,
        match_id: &MatchId,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "UPDATE matches SET tracked_player_count = tracked_player_count + 1, last_updated_at = ?
             WHERE match_id = ?",
        )
        .bind(now)
        .bind(match_id.as_str())
        .execute(executor)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::MatchNotFound(match_id.to_string()));
        }
        Ok(())
    }

    pub async fn exists<'e, E>(executor: E, match_id: &MatchId) -> Result<bool, DatabaseError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        Ok(Self::lookup(executor, match_id).await?.is_some())
    }

    /// Fails with a conflict if `incoming` disagrees with what is stored.
    pub async fn ensure_metadata_matches(
        conn: &mut SqliteConnection,
        incoming: &MatchMetadata,
    ) -> Result<(), DatabaseError> {
        let stored = Self::load(&mut *conn, &incoming.match_id)
            .await?
            .ok_or_else(|| DatabaseError::MatchNotFound(incoming.match_id.to_string()))?;

        let differences = stored.metadata.differences(incoming);
        if differences.is_empty() {
            Ok(())
        } else {
            Err(DatabaseError::Conflict {
                table: "matches",
                key: incoming.match_id.to_string(),
                detail: format!("immutable fields differ: {}", differences.join(", ")),
            })
        }
    }
}

fn record_from_row(row: &SqliteRow) -> Result<MatchRecord, DatabaseError> {
    let Json(team_scores): Json<Vec<TeamScore>> = row.try_get("team_scores")?;
    Ok(MatchRecord {
        metadata: MatchMetadata {
            match_id: MatchId::new(row.try_get::<String, _>("match_id")?),
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            map_id: row.try_get("map_id")?,
            mode_id: row.try_get("mode_id")?,
            playlist_id: row.try_get("playlist_id")?,
            team_scores,
        },
        completion: CompletionFlags::from_bits(row.try_get("completion_flags")?),
        first_sync_owner: AccountId::new(row.try_get::<String, _>("first_sync_owner")?),
        first_sync_at: row.try_get("first_sync_at")?,
        last_updated_at: row.try_get("last_updated_at")?,
        tracked_player_count: row.try_get("tracked_player_count")?,
    })
}
