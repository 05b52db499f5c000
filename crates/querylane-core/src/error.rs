//! Core error types

use querylane_db::DbError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// Opening or closing the connection failed. Never retried.
    #[error("Connection error: {0}")]
    Connection(#[source] DbError),

    /// The operation itself failed; the original error is surfaced unchanged
    #[error(transparent)]
    Operation(DbError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl CoreError {
    /// The underlying database error, if any
    pub fn db_error(&self) -> Option<&DbError> {
        match self {
            CoreError::Connection(e) | CoreError::Operation(e) => Some(e),
            CoreError::InvalidArgument(_) => None,
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, CoreError::Connection(_))
    }
}
