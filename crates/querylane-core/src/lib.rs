//! Querylane Core Execution Layer
//!
//! This crate composes connection scoping, retry, result caching and
//! transactions around database operations, and provides lazy row, batch
//! and page streaming over the user table.

pub mod cache;
pub mod error;
pub mod executor;
pub mod logging;
pub mod operation;
pub mod retry;
pub mod scope;
pub mod streaming;
pub mod transaction;
pub mod users;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{CacheStats, Cached, FingerprintMode, QueryFingerprint, ResultCache};
pub use error::CoreError;
pub use executor::{ExecOptions, QueryExecutor, Stage};
pub use logging::LogQueries;
pub use operation::{ExecuteQuery, ExecuteStatement, Operation};
pub use retry::{Retry, RetryOn, RetryPolicy};
pub use scope::ConnectionScope;
pub use streaming::{StreamConfig, StreamingReader};
pub use transaction::Transactional;
