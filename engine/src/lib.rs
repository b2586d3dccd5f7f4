mod apply;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
mod fetch;
pub mod rate_limit;
pub mod summary;

pub use client::{FetchError, MatchClient};
pub use config::SyncConfig;
pub use engine::SyncEngine;
pub use error::SyncError;
pub use rate_limit::RateLimiter;
pub use summary::{FailureKind, FailureStage, RunSummary, SyncFailure};
