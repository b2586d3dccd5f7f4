use thiserror::Error;
use types::{AccountId, EventTimeline, MatchDocument, MatchId, SkillData};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Network trouble or rate limiting. Worth trying again on a later run.
    #[error("transient fetch failure: {0}")]
    Transient(String),

    /// The match is gone or access is forbidden.
    #[error("permanent fetch failure: {0}")]
    Permanent(String),
}

/// The game service API as seen by the sync engine. Transport, auth and
/// retries are the implementor's business.
#[async_trait::async_trait]
pub trait MatchClient: Send + Sync {
    async fn fetch_match_document(&self, match_id: &MatchId) -> Result<MatchDocument, FetchError>;

    async fn fetch_event_timeline(&self, match_id: &MatchId) -> Result<EventTimeline, FetchError>;

    async fn fetch_skill(
        &self,
        match_id: &MatchId,
        account_ids: &[AccountId],
    ) -> Result<SkillData, FetchError>;
}
