//! Read access to a legacy per-account store.
//!
//! Before the shared store existed every tracked account kept its own SQLite
//! file with a full copy of each match it played:
//!
//! ```text
//! matches      (match_id, start_time, end_time, map_id, mode_id, playlist_id,
//!               team_scores, performance_score, session_id, with_associates)
//! participants (match_id, account_id, gamertag, team_id, outcome, rank, score,
//!               kills, deaths, assists, shots_fired, shots_hit, damage_dealt,
//!               damage_taken, csr_before, csr_after, expected_kills, expected_deaths)
//! events       (match_id, seq, event_type, time_offset_ms, actor_id, target_id)
//! medals       (match_id, account_id, medal_id, count)
//! ```
//!
//! Timestamps are RFC 3339 text and `team_scores` is a JSON array.

use std::path::Path;

use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::rusqlite::{params, OpenFlags, OptionalExtension};
use r2d2_sqlite::SqliteConnectionManager;
use types::{AccountId, MatchId, TeamScore};

use crate::models::{
    AliasRecord, CompletionFlag, CompletionFlags, EnrichmentValues, EventRecord, MatchMetadata,
    MedalRecord, ParticipantRecord,
};
use crate::DatabaseError;

/// Everything a legacy store holds about one match.
#[derive(Debug, Clone)]
pub struct LegacyMatch {
    pub metadata: MatchMetadata,
    pub participants: Vec<ParticipantRecord>,
    pub events: Vec<EventRecord>,
    pub medals: Vec<MedalRecord>,
    pub aliases: Vec<AliasRecord>,
    pub enrichment: EnrichmentValues,
}

impl LegacyMatch {
    /// A category counts as loaded when the legacy store has rows for it. The
    /// roster also needs skill values, otherwise the skill fetch is still owed.
    pub fn completion(&self) -> CompletionFlags {
        let mut flags = CompletionFlags::empty();
        if self.participants.iter().any(ParticipantRecord::has_skill) {
            flags = flags.with(CompletionFlag::Participants);
        }
        if !self.events.is_empty() {
            flags = flags.with(CompletionFlag::Events);
        }
        if !self.medals.is_empty() {
            flags = flags.with(CompletionFlag::Medals);
        }
        flags
    }
}

#[async_trait::async_trait]
pub trait LegacySource: Send + Sync {
    /// The tracked account this store belongs to.
    fn account(&self) -> &AccountId;

    /// Match ids in the order they were played.
    async fn list_matches(&self) -> Result<Vec<MatchId>, DatabaseError>;

    async fn read_full_match(&self, match_id: &MatchId) -> Result<LegacyMatch, DatabaseError>;

    /// Just the account's own derived values for a match.
    async fn read_enrichment(&self, match_id: &MatchId) -> Result<EnrichmentValues, DatabaseError>;
}

type LegacyPool = Pool<SqliteConnectionManager>;

pub struct SqliteLegacyStore {
    account: AccountId,
    pool: LegacyPool,
}

impl SqliteLegacyStore {
    pub fn open(account: AccountId, path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let manager = SqliteConnectionManager::file(path.as_ref())
            .with_flags(OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX);
        let pool = Pool::builder().max_size(2).build(manager)?;
        tracing::debug!(account = %account, path = %path.as_ref().display(), "opened legacy store");
        Ok(Self { account, pool })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, DatabaseError>
    where
        T: Send + 'static,
        F: FnOnce(&LegacyPool) -> Result<T, DatabaseError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || f(&pool))
            .await
            .map_err(|e| DatabaseError::Legacy(e.to_string()))?
    }
}

#[async_trait::async_trait]
impl LegacySource for SqliteLegacyStore {
    fn account(&self) -> &AccountId {
        &self.account
    }

    async fn list_matches(&self) -> Result<Vec<MatchId>, DatabaseError> {
        self.blocking(|pool| {
            let conn = pool.get()?;
            let mut stmt =
                conn.prepare("SELECT match_id FROM matches ORDER BY start_time, match_id")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .map(|id| id.map(MatchId::new))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ids)
        })
        .await
    }

    async fn read_full_match(&self, match_id: &MatchId) -> Result<LegacyMatch, DatabaseError> {
        let account = self.account.clone();
        let match_id = match_id.clone();
        self.blocking(move |pool| read_match(pool, &account, &match_id))
            .await
    }

    async fn read_enrichment(&self, match_id: &MatchId) -> Result<EnrichmentValues, DatabaseError> {
        let match_id = match_id.clone();
        self.blocking(move |pool| {
            let conn = pool.get()?;
            conn.query_row(
                "SELECT performance_score, session_id, with_associates FROM matches
                 WHERE match_id = ?1",
                params![match_id.as_str()],
                |row| {
                    Ok(EnrichmentValues {
                        performance_score: row.get(0)?,
                        session_id: row.get(1)?,
                        with_associates: row.get(2)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| DatabaseError::MatchNotFound(match_id.to_string()))
        })
        .await
    }
}

struct LegacyMatchRow {
    start_time: String,
    end_time: String,
    map_id: String,
    mode_id: String,
    playlist_id: Option<String>,
    team_scores: Option<String>,
    enrichment: EnrichmentValues,
}

fn read_match(
    pool: &LegacyPool,
    account: &AccountId,
    match_id: &MatchId,
) -> Result<LegacyMatch, DatabaseError> {
    let conn = pool.get()?;

    let row = conn
        .query_row(
            "SELECT start_time, end_time, map_id, mode_id, playlist_id, team_scores,
                    performance_score, session_id, with_associates
             FROM matches WHERE match_id = ?1",
            params![match_id.as_str()],
            |row| {
                Ok(LegacyMatchRow {
                    start_time: row.get(0)?,
                    end_time: row.get(1)?,
                    map_id: row.get(2)?,
                    mode_id: row.get(3)?,
                    playlist_id: row.get(4)?,
                    team_scores: row.get(5)?,
                    enrichment: EnrichmentValues {
                        performance_score: row.get(6)?,
                        session_id: row.get(7)?,
                        with_associates: row.get(8)?,
                    },
                })
            },
        )
        .optional()?
        .ok_or_else(|| DatabaseError::MatchNotFound(match_id.to_string()))?;

    let mut team_scores: Vec<TeamScore> = match row.team_scores.as_deref() {
        Some(json) => serde_json::from_str(json)?,
        None => Vec::new(),
    };
    team_scores.sort_by_key(|t| t.team_id);

    let start_time = parse_timestamp(&row.start_time)?;
    let metadata = MatchMetadata {
        match_id: match_id.clone(),
        start_time,
        end_time: parse_timestamp(&row.end_time)?,
        map_id: row.map_id,
        mode_id: row.mode_id,
        playlist_id: row.playlist_id,
        team_scores,
    };

    let mut stmt = conn.prepare(
        "SELECT account_id, gamertag, team_id, outcome, rank, score, kills, deaths, assists,
                shots_fired, shots_hit, damage_dealt, damage_taken, csr_before, csr_after,
                expected_kills, expected_deaths
         FROM participants WHERE match_id = ?1 ORDER BY account_id",
    )?;
    let roster = stmt
        .query_map(params![match_id.as_str()], |row| {
            let gamertag: Option<String> = row.get(1)?;
            let participant = ParticipantRecord {
                match_id: match_id.clone(),
                account_id: AccountId::new(row.get::<_, String>(0)?),
                team_id: row.get(2)?,
                outcome: row.get(3)?,
                rank: row.get(4)?,
                score: row.get(5)?,
                kills: row.get(6)?,
                deaths: row.get(7)?,
                assists: row.get(8)?,
                shots_fired: row.get(9)?,
                shots_hit: row.get(10)?,
                damage_dealt: row.get(11)?,
                damage_taken: row.get(12)?,
                csr_before: row.get(13)?,
                csr_after: row.get(14)?,
                expected_kills: row.get(15)?,
                expected_deaths: row.get(16)?,
            };
            Ok((participant, gamertag))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let provenance = format!("legacy:{account}");
    let aliases = roster
        .iter()
        .filter_map(|(p, gamertag)| {
            gamertag.as_ref().map(|name| AliasRecord {
                account_id: p.account_id.clone(),
                display_name: name.clone(),
                last_seen_at: start_time,
                provenance: provenance.clone(),
            })
        })
        .collect();
    let participants = roster.into_iter().map(|(p, _)| p).collect();

    let mut stmt = conn.prepare(
        "SELECT seq, event_type, time_offset_ms, actor_id, target_id
         FROM events WHERE match_id = ?1 ORDER BY time_offset_ms, seq",
    )?;
    let events = stmt
        .query_map(params![match_id.as_str()], |row| {
            Ok(EventRecord {
                match_id: match_id.clone(),
                seq: row.get(0)?,
                event_type: row.get(1)?,
                time_offset_ms: row.get(2)?,
                actor_id: row.get::<_, Option<String>>(3)?.map(AccountId::new),
                target_id: row.get::<_, Option<String>>(4)?.map(AccountId::new),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT account_id, medal_id, count FROM medals
         WHERE match_id = ?1 AND count >= 1 ORDER BY account_id, medal_id",
    )?;
    let medals = stmt
        .query_map(params![match_id.as_str()], |row| {
            Ok(MedalRecord {
                match_id: match_id.clone(),
                account_id: AccountId::new(row.get::<_, String>(0)?),
                medal_id: row.get(1)?,
                count: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(LegacyMatch {
        metadata,
        participants,
        events,
        medals,
        aliases,
        enrichment: row.enrichment,
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}
