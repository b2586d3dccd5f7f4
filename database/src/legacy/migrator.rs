use chrono::Utc;
use serde::Serialize;
use types::{AccountId, MatchId};

use super::{LegacyMatch, LegacySource};
use crate::integrity::{IntegrityChecker, OrphanReport};
use crate::registry::Creation;
use crate::{
    AliasDirectory, DatabaseError, EnrichmentStore, EventLog, MatchRegistry, MedalLedger,
    ParticipantStore, SharedStore,
};

#[derive(Debug, Clone, Serialize)]
pub struct MigrationFailure {
    pub match_id: MatchId,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountMigrationStats {
    pub account: AccountId,
    pub total_matches: usize,
    /// Matches this account's store was the first to bring in.
    pub newly_contributed: usize,
    /// Matches a previously migrated account had already brought in.
    pub already_canonical: usize,
    /// Matches this account was already counted for by an earlier run.
    pub already_reflected: usize,
    pub failures: Vec<MigrationFailure>,
}

impl AccountMigrationStats {
    fn new(account: AccountId) -> Self {
        Self {
            account,
            total_matches: 0,
            newly_contributed: 0,
            already_canonical: 0,
            already_reflected: 0,
            failures: Vec::new(),
        }
    }

    pub fn canonical_fraction(&self) -> f64 {
        fraction(self.already_canonical, self.total_matches)
    }

    pub fn contributed_fraction(&self) -> f64 {
        fraction(self.newly_contributed, self.total_matches)
    }
}

fn fraction(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub accounts: Vec<AccountMigrationStats>,
    pub orphans: OrphanReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchOutcome {
    Contributed,
    Counted,
    AlreadyReflected,
}

/// Consolidates legacy per-account stores into the shared store.
///
/// Safe to run repeatedly over the same legacy snapshot: a match is copied only
/// by the first account that brings it in, and an account is counted for a
/// match only when its enrichment row is first created.
pub struct LegacyMigrator {
    store: SharedStore,
}

impl LegacyMigrator {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub async fn migrate(
        &self,
        sources: &[Box<dyn LegacySource>],
    ) -> Result<MigrationReport, DatabaseError> {
        let mut accounts = Vec::with_capacity(sources.len());
        for source in sources {
            let stats = self.migrate_account(source.as_ref()).await?;
            tracing::info!(
                account = %stats.account,
                total = stats.total_matches,
                contributed = stats.newly_contributed,
                canonical = stats.already_canonical,
                reflected = stats.already_reflected,
                failed = stats.failures.len(),
                "migrated legacy store: {:.1}% already canonical, {:.1}% newly contributed",
                stats.canonical_fraction() * 100.0,
                stats.contributed_fraction() * 100.0,
            );
            accounts.push(stats);
        }

        let mut conn = self.store.pool().acquire().await?;
        let orphans = IntegrityChecker::ensure_no_orphans(&mut conn).await?;

        Ok(MigrationReport { accounts, orphans })
    }

    pub async fn migrate_account(
        &self,
        source: &dyn LegacySource,
    ) -> Result<AccountMigrationStats, DatabaseError> {
        let mut stats = AccountMigrationStats::new(source.account().clone());
        let match_ids = source.list_matches().await?;
        stats.total_matches = match_ids.len();

        for match_id in &match_ids {
            match self.migrate_match(source, match_id).await {
                Ok(MatchOutcome::Contributed) => stats.newly_contributed += 1,
                Ok(MatchOutcome::Counted) => stats.already_canonical += 1,
                Ok(MatchOutcome::AlreadyReflected) => stats.already_reflected += 1,
                Err(e) if e.is_integrity() => return Err(e),
                Err(e) => {
                    tracing::warn!(account = %stats.account, match_id = %match_id, "legacy match not migrated: {e}");
                    stats.failures.push(MigrationFailure {
                        match_id: match_id.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(stats)
    }

    async fn migrate_match(
        &self,
        source: &dyn LegacySource,
        match_id: &MatchId,
    ) -> Result<MatchOutcome, DatabaseError> {
        if self.store.lookup(match_id).await?.is_none() {
            let legacy = source.read_full_match(match_id).await?;
            if self.contribute(source.account(), &legacy).await? {
                return Ok(MatchOutcome::Contributed);
            }
            // another writer created it between the lookup and our transaction
        }
        self.count_observer(source, match_id).await
    }

    /// Copies the full legacy row set. Returns `false` without writing if the
    /// match already exists.
    async fn contribute(
        &self,
        account: &AccountId,
        legacy: &LegacyMatch,
    ) -> Result<bool, DatabaseError> {
        let match_id = &legacy.metadata.match_id;
        let now = Utc::now();
        let mut tx = self.store.begin_write().await?;
        let conn = tx.conn();

        let creation =
            MatchRegistry::create_if_absent(&mut *conn, &legacy.metadata, account, now).await?;
        if let Creation::AlreadyExisted(_) = creation {
            tx.rollback().await?;
            return Ok(false);
        }

        ParticipantStore::bulk_insert(&mut *conn, match_id, &legacy.participants).await?;
        EventLog::bulk_insert(&mut *conn, match_id, &legacy.events).await?;
        MedalLedger::bulk_insert(&mut *conn, match_id, &legacy.medals).await?;
        let completion = legacy.completion();
        for flag in completion.present() {
            MatchRegistry::set_flag(&mut *conn, match_id, flag, now).await?;
        }
        AliasDirectory::observe_all(&mut *conn, &legacy.aliases).await?;

        let enrichment = EnrichmentStore::for_account(account.clone());
        if enrichment.create_stub(&mut *conn, match_id, now).await? {
            MatchRegistry::increment_tracked_count(&mut *conn, match_id, now).await?;
        }
        if !legacy.enrichment.is_empty() {
            enrichment
                .record(&mut *conn, match_id, &legacy.enrichment, now)
                .await?;
        }

        tx.commit().await?;
        tracing::debug!(account = %account, match_id = %match_id, flags = completion.bits(), "contributed legacy match");
        Ok(true)
    }

    /// Counts this account for a match someone else already brought in.
    async fn count_observer(
        &self,
        source: &dyn LegacySource,
        match_id: &MatchId,
    ) -> Result<MatchOutcome, DatabaseError> {
        let enrichment = EnrichmentStore::for_account(source.account().clone());
        if enrichment.load(self.store.pool(), match_id).await?.is_some() {
            return Ok(MatchOutcome::AlreadyReflected);
        }

        let values = source.read_enrichment(match_id).await?;
        let now = Utc::now();
        let mut tx = self.store.begin_write().await?;
        let conn = tx.conn();

        let outcome = if enrichment.create_stub(&mut *conn, match_id, now).await? {
            MatchRegistry::increment_tracked_count(&mut *conn, match_id, now).await?;
            if !values.is_empty() {
                enrichment.record(&mut *conn, match_id, &values, now).await?;
            }
            MatchOutcome::Counted
        } else {
            MatchOutcome::AlreadyReflected
        };

        tx.commit().await?;
        Ok(outcome)
    }
}
