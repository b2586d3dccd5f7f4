use serde::Serialize;
use sqlx::SqliteConnection;
use types::MatchId;

use crate::models::{CompletionFlag, MatchState};
use crate::{DatabaseError, ParticipantStore};

/// Rows whose match has no registry record, per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OrphanReport {
    pub participants: i64,
    pub events: i64,
    pub medals: i64,
    pub enrichment: i64,
}

impl OrphanReport {
    pub fn total(&self) -> i64 {
        self.participants + self.events + self.medals + self.enrichment
    }

    pub fn is_clean(&self) -> bool {
        self.total() == 0
    }
}

pub struct IntegrityChecker;

impl IntegrityChecker {
    pub async fn orphans(conn: &mut SqliteConnection) -> Result<OrphanReport, DatabaseError> {
        Ok(OrphanReport {
            participants: orphans_in(conn, "participants").await?,
            events: orphans_in(conn, "match_events").await?,
            medals: orphans_in(conn, "medals").await?,
            enrichment: orphans_in(conn, "enrichment").await?,
        })
    }

    /// Like [`IntegrityChecker::orphans`] but any orphan is an error.
    pub async fn ensure_no_orphans(
        conn: &mut SqliteConnection,
    ) -> Result<OrphanReport, DatabaseError> {
        let report = Self::orphans(conn).await?;
        if !report.is_clean() {
            return Err(DatabaseError::Integrity(format!(
                "{} orphaned rows (participants {}, events {}, medals {}, enrichment {})",
                report.total(),
                report.participants,
                report.events,
                report.medals,
                report.enrichment
            )));
        }
        Ok(report)
    }

    /// Checks that a set completion bit is backed by rows.
    ///
    /// Only the roster is checked: a match can legitimately have no events or
    /// no medals, but never an empty roster.
    pub async fn verify_completion(
        conn: &mut SqliteConnection,
        match_id: &MatchId,
        state: &MatchState,
    ) -> Result<(), DatabaseError> {
        if state.flags.contains(CompletionFlag::Participants)
            && ParticipantStore::count_for_match(&mut *conn, match_id).await? == 0
        {
            return Err(DatabaseError::Integrity(format!(
                "match {match_id} is marked {} but has no participant rows",
                CompletionFlag::Participants.name()
            )));
        }
        Ok(())
    }
}

async fn orphans_in(conn: &mut SqliteConnection, table: &str) -> Result<i64, DatabaseError> {
    let (count,): (i64,) = sqlx::query_as(&format!(
        "SELECT COUNT(*) FROM {table} t
         WHERE NOT EXISTS (SELECT 1 FROM matches m WHERE m.match_id = t.match_id)"
    ))
    .fetch_one(&mut *conn)
    .await?;
    Ok(count)
}
