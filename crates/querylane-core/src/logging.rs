//! Query logging stage

use async_trait::async_trait;
use chrono::Utc;
use querylane_db::{DbError, Session, Value};
use tracing::info;

use crate::operation::Operation;

/// Stage that logs the query text each time the inner operation executes
pub struct LogQueries<O> {
    inner: O,
}

impl<O> LogQueries<O> {
    pub fn new(inner: O) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<O: Operation> Operation for LogQueries<O> {
    type Output = O::Output;

    async fn call(&self, session: &mut dyn Session) -> Result<O::Output, DbError> {
        if let Some(query) = self.inner.query() {
            info!("[{}] Executing query: {}", Utc::now().to_rfc3339(), query.trim());
        }
        self.inner.call(session).await
    }

    fn query(&self) -> Option<&str> {
        self.inner.query()
    }

    fn params(&self) -> &[Value] {
        self.inner.params()
    }
}
