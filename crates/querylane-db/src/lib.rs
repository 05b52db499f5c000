//! Querylane Database Layer
//!
//! This crate provides the database abstraction for Querylane: a
//! connection/session capability over SQLite via sqlx, the row and user
//! models, and the `user_data` repository used by the execution layer.

pub mod error;
pub mod models;
pub mod repository;
pub mod seed;
pub mod session;
pub mod utils;

pub use error::DbError;
pub use models::*;
pub use repository::{DEFAULT_TABLE, UserRepository};
pub use seed::{SeedReport, read_users_csv};
pub use session::{Connector, Session, SqliteConnector, SqliteSession};
