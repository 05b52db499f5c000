//! Database error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Failed to open database {target}: {source}")]
    Open {
        target: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate entry: {0}")]
    Duplicate(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// SQLITE_BUSY
const SQLITE_BUSY: i32 = 5;
/// SQLITE_LOCKED
const SQLITE_LOCKED: i32 = 6;

impl DbError {
    /// Whether the failure is worth retrying: lock contention, I/O hiccups
    /// and pool exhaustion. Malformed SQL, constraint violations and decode
    /// failures are not transient.
    pub fn is_transient(&self) -> bool {
        match self {
            DbError::Open { source, .. } | DbError::Sqlx(source) => is_transient_sqlx(source),
            DbError::Io(_) => true,
            _ => false,
        }
    }
}

fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            // Extended result codes keep the primary code in the low byte
            .map(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
            .unwrap_or(false),
        _ => false,
    }
}
