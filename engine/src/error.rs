use database::DatabaseError;
use thiserror::Error;
use types::MatchId;

/// Failures that end a sync run. Per-match problems are reported in the
/// run summary instead.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Store error: {0}")]
    Store(#[from] DatabaseError),

    #[error("Integrity violation while syncing {match_id}: {message}")]
    Integrity { match_id: MatchId, message: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
