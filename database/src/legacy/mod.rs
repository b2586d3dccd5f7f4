//! One-time consolidation of legacy per-account stores into the shared store.

pub mod migrator;
pub mod source;

pub use migrator::{AccountMigrationStats, LegacyMigrator, MigrationFailure, MigrationReport};
pub use source::{LegacyMatch, LegacySource, SqliteLegacyStore};
