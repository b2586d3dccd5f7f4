use chrono::{DateTime, Utc};
use database::DatabaseError;
use serde::Serialize;
use types::{AccountId, MatchId};
use uuid::Uuid;

use crate::client::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    TransientFetch,
    PermanentFetch,
    Integrity,
    Conflict,
    Storage,
}

impl FailureKind {
    pub fn from_fetch(error: &FetchError) -> Self {
        match error {
            FetchError::Transient(_) => FailureKind::TransientFetch,
            FetchError::Permanent(_) => FailureKind::PermanentFetch,
        }
    }

    pub fn from_store(error: &DatabaseError) -> Self {
        match error {
            DatabaseError::Integrity(_) => FailureKind::Integrity,
            DatabaseError::Conflict { .. } => FailureKind::Conflict,
            _ => FailureKind::Storage,
        }
    }
}

/// Where in the pipeline a failure happened. Failures in `Events` and
/// `Skill` leave the match written with that category still pending; the
/// others mean the match was skipped this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Lookup,
    Document,
    Events,
    Skill,
    Write,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncFailure {
    pub match_id: MatchId,
    pub stage: FailureStage,
    pub kind: FailureKind,
    pub message: String,
}

impl SyncFailure {
    pub fn fetch(match_id: MatchId, stage: FailureStage, error: &FetchError) -> Self {
        Self {
            match_id,
            stage,
            kind: FailureKind::from_fetch(error),
            message: error.to_string(),
        }
    }

    pub fn store(match_id: MatchId, stage: FailureStage, error: &DatabaseError) -> Self {
        Self {
            match_id,
            stage,
            kind: FailureKind::from_store(error),
            message: error.to_string(),
        }
    }

    pub fn skipped_match(&self) -> bool {
        !matches!(self.stage, FailureStage::Events | FailureStage::Skill)
    }
}

/// How a single committed match was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MatchOutcome {
    New,
    Backfilled,
    AlreadyComplete,
    StillPartial,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub account: AccountId,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub new_matches_written: usize,
    pub known_matches_backfilled: usize,
    pub known_matches_already_complete: usize,
    /// Known matches that gained nothing this run because their missing
    /// sub-fetches failed again.
    pub known_matches_still_partial: usize,
    /// Known matches for which at least one sub-fetch was skipped because
    /// the shared store already held the data.
    pub api_calls_saved: u64,
    pub cancelled: bool,
    pub errors: Vec<SyncFailure>,
}

impl RunSummary {
    pub fn new(account: AccountId) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            account,
            started_at: Utc::now(),
            finished_at: None,
            new_matches_written: 0,
            known_matches_backfilled: 0,
            known_matches_already_complete: 0,
            known_matches_still_partial: 0,
            api_calls_saved: 0,
            cancelled: false,
            errors: Vec::new(),
        }
    }

    pub fn matches_written(&self) -> usize {
        self.new_matches_written
            + self.known_matches_backfilled
            + self.known_matches_already_complete
            + self.known_matches_still_partial
    }

    pub fn skipped_matches(&self) -> usize {
        self.errors.iter().filter(|f| f.skipped_match()).count()
    }

    pub fn failures_for(&self, match_id: &MatchId) -> Vec<&SyncFailure> {
        self.errors.iter().filter(|f| &f.match_id == match_id).collect()
    }

    pub(crate) fn record_failure(&mut self, failure: SyncFailure) {
        tracing::warn!(
            run_id = %self.run_id,
            match_id = %failure.match_id,
            stage = ?failure.stage,
            kind = ?failure.kind,
            "{}",
            failure.message
        );
        self.errors.push(failure);
    }

    pub(crate) fn record_outcome(&mut self, outcome: MatchOutcome, calls_saved: u64) {
        match outcome {
            MatchOutcome::New => self.new_matches_written += 1,
            MatchOutcome::Backfilled => self.known_matches_backfilled += 1,
            MatchOutcome::AlreadyComplete => self.known_matches_already_complete += 1,
            MatchOutcome::StillPartial => self.known_matches_still_partial += 1,
        }
        self.api_calls_saved += calls_saved;
    }

    pub(crate) fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_fetch_failures_do_not_count_as_skipped() {
        let mut summary = RunSummary::new(AccountId::from("alpha"));
        let error = FetchError::Transient("503".to_string());
        summary.record_failure(SyncFailure::fetch(MatchId::from("m1"), FailureStage::Events, &error));
        summary.record_failure(SyncFailure::fetch(MatchId::from("m2"), FailureStage::Document, &error));

        assert_eq!(summary.errors.len(), 2);
        assert_eq!(summary.skipped_matches(), 1);
        assert_eq!(summary.errors[0].kind, FailureKind::TransientFetch);
    }

    #[test]
    fn test_store_errors_map_to_kinds() {
        let conflict = DatabaseError::Conflict {
            table: "medals",
            key: "m1".to_string(),
            detail: "count 2 vs 3".to_string(),
        };
        assert_eq!(FailureKind::from_store(&conflict), FailureKind::Conflict);
        assert_eq!(
            FailureKind::from_store(&DatabaseError::Query("locked".to_string())),
            FailureKind::Storage
        );
    }

    #[test]
    fn test_summary_serializes_kinds_as_snake_case() {
        let mut summary = RunSummary::new(AccountId::from("alpha"));
        summary.record_outcome(MatchOutcome::AlreadyComplete, 1);
        summary.record_failure(SyncFailure::fetch(
            MatchId::from("m9"),
            FailureStage::Document,
            &FetchError::Permanent("404".to_string()),
        ));

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["api_calls_saved"], 1);
        assert_eq!(json["errors"][0]["kind"], "permanent_fetch");
        assert_eq!(json["errors"][0]["stage"], "document");
    }
}
