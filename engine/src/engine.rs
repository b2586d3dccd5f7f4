use std::sync::Arc;

use chrono::{DateTime, Utc};
use database::{DatabaseError, SharedStore, WriteTransaction};
use itertools::Itertools;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use types::{AccountId, MatchId};

use crate::apply::apply_match;
use crate::fetch::{Classification, FetchedMatch, Fetcher};
use crate::summary::{FailureKind, FailureStage, MatchOutcome, RunSummary, SyncFailure};
use crate::{MatchClient, RateLimiter, SyncConfig, SyncError};

/// Syncs one account's matches into the shared store.
///
/// Matches are processed in batches of `batch_size`. Each batch is fetched
/// concurrently without touching the write lock, then written in a single
/// transaction with one savepoint per match. Several engines may run at once
/// against clones of the same [`SharedStore`] and [`RateLimiter`].
pub struct SyncEngine {
    account: AccountId,
    store: SharedStore,
    fetcher: Arc<Fetcher>,
    config: SyncConfig,
    cancel: CancellationToken,
}

impl SyncEngine {
    /// Fails with [`SyncError::Config`] if `config` does not validate.
    pub fn new(
        account: AccountId,
        store: SharedStore,
        client: Arc<dyn MatchClient>,
        limiter: RateLimiter,
        config: SyncConfig,
    ) -> Result<Self, SyncError> {
        let config = config.validate()?;
        let fetcher = Fetcher::new(client, limiter, config.fetch_timeout());
        Ok(Self {
            account,
            store,
            fetcher: Arc::new(fetcher),
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// Stops the run at the next batch boundary once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    /// Syncs `match_ids` for this engine's account.
    ///
    /// Per-match failures end up in the summary. Only an integrity violation
    /// in the store ends the run early with an error.
    pub async fn run(&self, match_ids: &[MatchId]) -> Result<RunSummary, SyncError> {
        let mut summary = RunSummary::new(self.account.clone());
        let match_ids: Vec<MatchId> = match_ids.iter().unique().cloned().collect();

        tracing::info!(
            run_id = %summary.run_id,
            account = %self.account,
            matches = match_ids.len(),
            batch_size = self.config.batch_size,
            "starting sync"
        );

        for (index, batch) in match_ids.chunks(self.config.batch_size).enumerate() {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                tracing::warn!(run_id = %summary.run_id, batch = index, "sync cancelled");
                break;
            }

            let fetched = self.fetch_batch(batch, &mut summary).await;
            self.write_batch(fetched, &mut summary).await?;
        }

        summary.finish();
        tracing::info!(
            run_id = %summary.run_id,
            account = %self.account,
            new = summary.new_matches_written,
            backfilled = summary.known_matches_backfilled,
            already_complete = summary.known_matches_already_complete,
            still_partial = summary.known_matches_still_partial,
            api_calls_saved = summary.api_calls_saved,
            errors = summary.errors.len(),
            "sync finished"
        );
        Ok(summary)
    }

    async fn fetch_batch(&self, batch: &[MatchId], summary: &mut RunSummary) -> Vec<FetchedMatch> {
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_matches));

        let handles: Vec<_> = batch
            .iter()
            .map(|match_id| {
                let permits = Arc::clone(&permits);
                let fetcher = Arc::clone(&self.fetcher);
                let store = self.store.clone();
                let account = self.account.clone();
                let id = match_id.clone();
                let task = tokio::spawn(async move {
                    let _permit = match permits.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(e) => {
                            return Err(SyncFailure {
                                match_id: id,
                                stage: FailureStage::Lookup,
                                kind: FailureKind::TransientFetch,
                                message: e.to_string(),
                            })
                        }
                    };
                    fetch_one(&fetcher, &store, &account, id).await
                });
                (match_id.clone(), task)
            })
            .collect();

        let mut fetched = Vec::with_capacity(handles.len());
        for (match_id, handle) in handles {
            match handle.await {
                Ok(Ok(fetched_match)) => {
                    for failure in fetched_match.sub_fetch_failures() {
                        summary.record_failure(failure);
                    }
                    fetched.push(fetched_match);
                }
                Ok(Err(failure)) => summary.record_failure(failure),
                Err(join_error) => summary.record_failure(SyncFailure {
                    match_id,
                    stage: FailureStage::Document,
                    kind: FailureKind::TransientFetch,
                    message: format!("fetch task failed: {join_error}"),
                }),
            }
        }
        fetched
    }

    async fn write_batch(
        &self,
        fetched: Vec<FetchedMatch>,
        summary: &mut RunSummary,
    ) -> Result<(), SyncError> {
        if fetched.is_empty() {
            return Ok(());
        }

        let mut tx = match self.store.begin_write().await {
            Ok(tx) => tx,
            Err(error) => {
                for m in &fetched {
                    summary.record_failure(SyncFailure::store(
                        m.match_id.clone(),
                        FailureStage::Write,
                        &error,
                    ));
                }
                return Ok(());
            }
        };

        let now = Utc::now();
        let mut staged: Vec<(&FetchedMatch, MatchOutcome)> = Vec::with_capacity(fetched.len());

        for (index, fetched_match) in fetched.iter().enumerate() {
            match self.write_one(&mut tx, fetched_match, now).await {
                Ok(Ok(outcome)) => staged.push((fetched_match, outcome)),
                Ok(Err(error)) => summary.record_failure(SyncFailure::store(
                    fetched_match.match_id.clone(),
                    FailureStage::Write,
                    &error,
                )),
                Err(error) => {
                    if let Err(rollback_error) = tx.rollback().await {
                        tracing::error!(%rollback_error, "failed to roll back sync batch");
                    }

                    if error.is_integrity() {
                        tracing::error!(
                            run_id = %summary.run_id,
                            match_id = %fetched_match.match_id,
                            %error,
                            "integrity violation, halting sync"
                        );
                        return Err(SyncError::Integrity {
                            match_id: fetched_match.match_id.clone(),
                            message: error.to_string(),
                        });
                    }

                    let abandoned = staged
                        .iter()
                        .map(|(m, _)| *m)
                        .chain(fetched[index..].iter());
                    for m in abandoned {
                        summary.record_failure(SyncFailure::store(
                            m.match_id.clone(),
                            FailureStage::Write,
                            &error,
                        ));
                    }
                    return Ok(());
                }
            }
        }

        match tx.commit().await {
            Ok(()) => {
                for (m, outcome) in staged {
                    tracing::debug!(match_id = %m.match_id, ?outcome, "match committed");
                    summary.record_outcome(outcome, m.calls_saved());
                }
            }
            Err(error) => {
                for (m, _) in staged {
                    summary.record_failure(SyncFailure::store(
                        m.match_id.clone(),
                        FailureStage::Write,
                        &error,
                    ));
                }
            }
        }
        Ok(())
    }

    /// Writes one match under its own savepoint.
    ///
    /// The inner error rejects only this match, whose savepoint has been rolled
    /// back. The outer error means the whole batch must be abandoned.
    async fn write_one(
        &self,
        tx: &mut WriteTransaction,
        fetched: &FetchedMatch,
        now: DateTime<Utc>,
    ) -> Result<Result<MatchOutcome, DatabaseError>, DatabaseError> {
        let mut savepoint = tx.savepoint().await?;
        match apply_match(&mut savepoint, &self.account, fetched, now).await {
            Ok(outcome) => {
                savepoint
                    .commit()
                    .await
                    .map_err(|e| DatabaseError::Transaction(e.to_string()))?;
                Ok(Ok(outcome))
            }
            Err(error) if error.is_integrity() => Err(error),
            Err(error) => {
                savepoint
                    .rollback()
                    .await
                    .map_err(|e| DatabaseError::Transaction(e.to_string()))?;
                Ok(Err(error))
            }
        }
    }
}

async fn fetch_one(
    fetcher: &Fetcher,
    store: &SharedStore,
    account: &AccountId,
    match_id: MatchId,
) -> Result<FetchedMatch, SyncFailure> {
    let classification = match store.lookup(&match_id).await {
        Ok(Some(state)) => Classification::Known(state),
        Ok(None) => Classification::New,
        Err(error) => return Err(SyncFailure::store(match_id, FailureStage::Lookup, &error)),
    };

    fetcher
        .fetch(account, &match_id, classification)
        .await
        .map_err(|error| SyncFailure::fetch(match_id, FailureStage::Document, &error))
}
