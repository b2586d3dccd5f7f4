//! The network half of a sync: everything that happens before the write lock
//! is taken.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use database::{CompletionFlag, MatchState};
use types::{AccountId, EventTimeline, MatchDocument, MatchId, SkillData};

use crate::client::{FetchError, MatchClient};
use crate::summary::{FailureStage, SyncFailure};
use crate::RateLimiter;

/// What the store knew about a match when the run looked it up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Classification {
    New,
    Known(MatchState),
}

impl Classification {
    fn needs(&self, flag: CompletionFlag) -> bool {
        match self {
            Classification::New => true,
            Classification::Known(state) => !state.flags.contains(flag),
        }
    }
}

#[derive(Debug)]
pub(crate) enum SubFetch<T> {
    Skipped,
    Fetched(T),
    Failed(FetchError),
}

impl<T> SubFetch<T> {
    pub fn fetched(&self) -> Option<&T> {
        match self {
            SubFetch::Fetched(value) => Some(value),
            _ => None,
        }
    }

    fn failure(&self) -> Option<&FetchError> {
        match self {
            SubFetch::Failed(error) => Some(error),
            _ => None,
        }
    }
}

impl<T> From<Result<T, FetchError>> for SubFetch<T> {
    fn from(result: Result<T, FetchError>) -> Self {
        match result {
            Ok(value) => SubFetch::Fetched(value),
            Err(error) => SubFetch::Failed(error),
        }
    }
}

#[derive(Debug)]
pub(crate) struct FetchedMatch {
    pub match_id: MatchId,
    pub document: MatchDocument,
    pub events: SubFetch<EventTimeline>,
    pub skill: SubFetch<SkillData>,
}

impl FetchedMatch {
    /// One call saved per known match whose shared data let it skip any
    /// sub-fetch. A new match never saves anything.
    pub fn calls_saved(&self) -> u64 {
        let skipped = matches!(self.events, SubFetch::Skipped)
            || matches!(self.skill, SubFetch::Skipped);
        u64::from(skipped)
    }

    pub fn sub_fetch_failures(&self) -> Vec<SyncFailure> {
        let events = self
            .events
            .failure()
            .map(|e| SyncFailure::fetch(self.match_id.clone(), FailureStage::Events, e));
        let skill = self
            .skill
            .failure()
            .map(|e| SyncFailure::fetch(self.match_id.clone(), FailureStage::Skill, e));
        events.into_iter().chain(skill).collect()
    }
}

pub(crate) struct Fetcher {
    client: Arc<dyn MatchClient>,
    limiter: RateLimiter,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(client: Arc<dyn MatchClient>, limiter: RateLimiter, timeout: Duration) -> Self {
        Self {
            client,
            limiter,
            timeout,
        }
    }

    /// Fetches the document and whichever sub-resources the store still lacks.
    ///
    /// A failed document fetch fails the match. Failed sub-fetches are carried
    /// in the result so the rest of the match can still be written.
    pub async fn fetch(
        &self,
        account: &AccountId,
        match_id: &MatchId,
        classification: Classification,
    ) -> Result<FetchedMatch, FetchError> {
        let document = self
            .call(self.client.fetch_match_document(match_id))
            .await?;

        if &document.match_id != match_id {
            return Err(FetchError::Permanent(format!(
                "requested {match_id} but received document for {}",
                document.match_id
            )));
        }
        if !document.includes(account) {
            return Err(FetchError::Permanent(format!(
                "account {account} not in roster"
            )));
        }

        let roster = document.account_ids();
        let (events, skill) = tokio::join!(
            async {
                if classification.needs(CompletionFlag::Events) {
                    SubFetch::from(self.call(self.client.fetch_event_timeline(match_id)).await)
                } else {
                    SubFetch::Skipped
                }
            },
            async {
                if classification.needs(CompletionFlag::Participants) {
                    SubFetch::from(self.call(self.client.fetch_skill(match_id, &roster)).await)
                } else {
                    SubFetch::Skipped
                }
            },
        );

        tracing::debug!(
            %match_id,
            ?classification,
            events_fetched = events.fetched().is_some(),
            skill_fetched = skill.fetched().is_some(),
            "fetched match"
        );

        Ok(FetchedMatch {
            match_id: match_id.clone(),
            document,
            events,
            skill,
        })
    }

    async fn call<T, F>(&self, request: F) -> Result<T, FetchError>
    where
        F: Future<Output = Result<T, FetchError>>,
    {
        self.limiter.acquire().await;
        match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Transient(format!(
                "request timed out after {:?}",
                self.timeout
            ))),
        }
    }
}
