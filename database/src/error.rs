use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Query execution error: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Match not found: {0}")]
    MatchNotFound(String),

    /// A stored invariant no longer holds, e.g. a completion bit is set but the
    /// rows it vouches for are missing.
    #[error("Integrity violation: {0}")]
    Integrity(String),

    /// A natural-key row already exists with different content.
    #[error("Conflicting {table} row for {key}: {detail}")]
    Conflict {
        table: &'static str,
        key: String,
        detail: String,
    },

    #[error("Legacy store error: {0}")]
    Legacy(String),

    #[error("Timestamp parse error: {0}")]
    TimestampParse(#[from] chrono::ParseError),
}

impl DatabaseError {
    pub fn is_integrity(&self) -> bool {
        matches!(self, DatabaseError::Integrity(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, DatabaseError::Conflict { .. })
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(e: sqlx::Error) -> Self {
        DatabaseError::Query(e.to_string())
    }
}

impl From<r2d2::Error> for DatabaseError {
    fn from(e: r2d2::Error) -> Self {
        DatabaseError::Legacy(e.to_string())
    }
}

impl From<r2d2_sqlite::rusqlite::Error> for DatabaseError {
    fn from(e: r2d2_sqlite::rusqlite::Error) -> Self {
        DatabaseError::Legacy(e.to_string())
    }
}
