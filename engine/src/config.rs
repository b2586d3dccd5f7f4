use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{RateLimiter, SyncError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Matches per write transaction.
    pub batch_size: usize,
    /// Matches fetched at once by one account's engine.
    pub max_concurrent_matches: usize,
    /// Sustained request rate across all engines sharing a limiter.
    pub requests_per_second: f64,
    pub burst: u32,
    pub fetch_timeout_secs: u64,
    pub database_url: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 25,
            max_concurrent_matches: 4,
            requests_per_second: 5.0,
            burst: 10,
            fetch_timeout_secs: 30,
            database_url: None,
        }
    }
}

impl SyncConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, SyncError> {
        let config: SyncConfig = serde_yaml::from_str(yaml)?;
        config.validate()
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(self) -> Result<Self, SyncError> {
        if self.batch_size == 0 {
            return Err(SyncError::Config("batch_size must be at least 1".to_string()));
        }
        if self.max_concurrent_matches == 0 {
            return Err(SyncError::Config(
                "max_concurrent_matches must be at least 1".to_string(),
            ));
        }
        if !(self.requests_per_second > 0.0) {
            return Err(SyncError::Config(
                "requests_per_second must be positive".to_string(),
            ));
        }
        if self.burst == 0 {
            return Err(SyncError::Config("burst must be at least 1".to_string()));
        }
        Ok(self)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(self.requests_per_second, f64::from(self.burst))
    }
}
