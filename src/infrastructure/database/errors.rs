//! Database error types.

use thiserror::Error;

/// Errors surfaced by the storage layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// The write lock is held by another connection. Retryable.
    #[error("Database is locked or busy, try again")]
    Busy,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Row not found: {0}")]
    NotFound(String),

    /// Constraint violation (foreign key, unique, JSON check).
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// A stored value could not be decoded into its domain type.
    #[error("Corrupted row: {0}")]
    Corrupted(String),

    #[error("Query error: {0}")]
    Query(String),
}

impl DatabaseError {
    /// Whether the caller may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy)
    }

    /// One-line operator-facing message. Never a stack trace.
    pub fn friendly_message(&self) -> String {
        match self {
            Self::Busy => "Database is locked or busy, try again".to_string(),
            Self::Constraint(msg) => format!("Data integrity violation: {msg}"),
            other => other.to_string(),
        }
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => {
                let message = db.message().to_string();
                if message.contains("database is locked") || message.contains("database table is locked")
                {
                    Self::Busy
                } else if message.contains("FOREIGN KEY constraint failed")
                    || message.contains("UNIQUE constraint failed")
                    || message.contains("CHECK constraint failed")
                {
                    Self::Constraint(message)
                } else {
                    Self::Query(message)
                }
            }
            sqlx::Error::RowNotFound => Self::NotFound("row not found".to_string()),
            sqlx::Error::PoolTimedOut => Self::Busy,
            _ => Self::Query(err.to_string()),
        }
    }
}
