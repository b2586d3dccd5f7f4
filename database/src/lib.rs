pub mod aliases;
pub mod config;
pub mod enrichment;
pub mod error;
pub mod events;
pub mod integrity;
pub mod legacy;
pub mod medals;
pub mod models;
pub mod participants;
pub mod registry;
pub mod store;


pub use aliases::AliasDirectory;
pub use config::DatabaseConfig;
pub use enrichment::EnrichmentStore;
pub use error::DatabaseError;
pub use events::EventLog;
pub use integrity::{IntegrityChecker, OrphanReport};
pub use legacy::{LegacyMatch, LegacyMigrator, LegacySource, MigrationReport, SqliteLegacyStore};
pub use medals::MedalLedger;
pub use models::{
    AliasRecord, CompletionFlag, CompletionFlags, EnrichmentRecord, EnrichmentValues, EventRecord,
    InsertOutcome, MatchMetadata, MatchRecord, MatchState, MedalRecord, ParticipantRecord,
};
pub use participants::ParticipantStore;
pub use registry::{Creation, MatchRegistry};
pub use store::{SharedStore, StoreStats, WriteTransaction};
