//! The shared store handle.
//!
//! One [`SharedStore`] is opened per run by whichever component drives it (the
//! sync engine or the legacy migrator) and cloned into every worker. Clones
//! share the pool and the write lock, so all writers in the process are
//! serialized on the same mutex while readers go straight to the pool.

use std::sync::Arc;

use serde::Serialize;
use sqlx::{Connection, Sqlite, SqliteConnection, SqlitePool, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard};
use types::MatchId;

use crate::integrity::{IntegrityChecker, OrphanReport};
use crate::models::{EventRecord, MatchRecord, MatchState, MedalRecord, ParticipantRecord};
use crate::{
    AliasDirectory, DatabaseConfig, DatabaseError, EventLog, MatchRegistry, MedalLedger,
    ParticipantStore,
};

#[derive(Clone)]
pub struct SharedStore {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl SharedStore {
    pub async fn open(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let pool = config
            .create_pool()
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;
        let store = Self::from_pool(pool);
        store.run_migrations().await?;
        tracing::info!(location = %config.url, "opened shared match store");
        Ok(store)
    }

    /// Wraps an existing pool. Migrations are not run.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))
    }

    pub async fn close(self) {
        self.pool.close().await;
        tracing::debug!("closed shared match store");
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Takes the store-wide write lock and opens a transaction under it.
    ///
    /// The lock is released when the returned value is committed or dropped.
    /// Never hold one across a network call.
    pub async fn begin_write(&self) -> Result<WriteTransaction, DatabaseError> {
        let guard = self.write_lock.clone().lock_owned().await;
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DatabaseError::Transaction(e.to_string()))?;
        Ok(WriteTransaction { tx, _guard: guard })
    }

    pub async fn lookup(&self, match_id: &MatchId) -> Result<Option<MatchState>, DatabaseError> {
        MatchRegistry::lookup(&self.pool, match_id).await
    }

    pub async fn match_record(
        &self,
        match_id: &MatchId,
    ) -> Result<Option<MatchRecord>, DatabaseError> {
        MatchRegistry::load(&self.pool, match_id).await
    }

    pub async fn participants(
        &self,
        match_id: &MatchId,
    ) -> Result<Vec<ParticipantRecord>, DatabaseError> {
        ParticipantStore::load_for_match(&self.pool, match_id).await
    }

    pub async fn events(&self, match_id: &MatchId) -> Result<Vec<EventRecord>, DatabaseError> {
        EventLog::load_for_match(&self.pool, match_id).await
    }

    pub async fn medals(&self, match_id: &MatchId) -> Result<Vec<MedalRecord>, DatabaseError> {
        MedalLedger::load_for_match(&self.pool, match_id).await
    }

    pub async fn orphans(&self) -> Result<OrphanReport, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        IntegrityChecker::orphans(&mut conn).await
    }

    pub async fn stats(&self) -> Result<StoreStats, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        StoreStats::collect(&mut conn).await
    }
}

/// A write transaction holding the store's write lock.
pub struct WriteTransaction {
    // dropped before the guard, so a rollback finishes while the lock is held
    tx: Transaction<'static, Sqlite>,
    _guard: OwnedMutexGuard<()>,
}

impl WriteTransaction {
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }

    /// Opens a savepoint so a single match can be rolled back without
    /// discarding the rest of the batch.
    pub async fn savepoint(&mut self) -> Result<Transaction<'_, Sqlite>, DatabaseError> {
        Connection::begin(&mut *self.tx)
            .await
            .map_err(|e| DatabaseError::Transaction(e.to_string()))
    }

    pub async fn commit(self) -> Result<(), DatabaseError> {
        self.tx
            .commit()
            .await
            .map_err(|e| DatabaseError::Transaction(e.to_string()))
    }

    pub async fn rollback(self) -> Result<(), DatabaseError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| DatabaseError::Transaction(e.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub matches: i64,
    pub complete_matches: i64,
    pub partial_matches: i64,
    pub participants: i64,
    pub events: i64,
    pub medals: i64,
    pub aliases: i64,
    pub enrichment: i64,
}

impl StoreStats {
    async fn collect(conn: &mut SqliteConnection) -> Result<Self, DatabaseError> {
        let all_bits = crate::models::CompletionFlags::all().bits();
        let (matches, complete_matches): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(completion_flags = ?), 0) FROM matches",
        )
        .bind(all_bits)
        .fetch_one(&mut *conn)
        .await?;

        Ok(Self {
            matches,
            complete_matches,
            partial_matches: matches - complete_matches,
            participants: count_rows(conn, "participants").await?,
            events: count_rows(conn, "match_events").await?,
            medals: count_rows(conn, "medals").await?,
            aliases: AliasDirectory::count(&mut *conn).await?,
            enrichment: count_rows(conn, "enrichment").await?,
        })
    }
}

async fn count_rows(conn: &mut SqliteConnection, table: &str) -> Result<i64, DatabaseError> {
    let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}
