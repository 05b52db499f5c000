//! Operations: units of work run against an injected session

use async_trait::async_trait;
use querylane_db::{DbError, Record, Session, Value};

/// A unit of database work
///
/// The session is injected by the caller (a [`ConnectionScope`] or a
/// caller-owned connection); operations never open or close connections
/// themselves. Stages such as [`Retry`] and [`Transactional`] implement this
/// trait by wrapping an inner operation, which is how the execution chain is
/// composed.
///
/// [`ConnectionScope`]: crate::scope::ConnectionScope
/// [`Retry`]: crate::retry::Retry
/// [`Transactional`]: crate::transaction::Transactional
#[async_trait]
pub trait Operation: Send + Sync {
    type Output: Send;

    async fn call(&self, session: &mut dyn Session) -> Result<Self::Output, DbError>;

    /// Query text, used for cache fingerprints and query logging
    fn query(&self) -> Option<&str> {
        None
    }

    /// Bound parameters of [`Operation::query`]
    fn params(&self) -> &[Value] {
        &[]
    }
}

#[async_trait]
impl<O: Operation + ?Sized> Operation for Box<O> {
    type Output = O::Output;

    async fn call(&self, session: &mut dyn Session) -> Result<Self::Output, DbError> {
        (**self).call(session).await
    }

    fn query(&self) -> Option<&str> {
        (**self).query()
    }

    fn params(&self) -> &[Value] {
        (**self).params()
    }
}

/// Run a query and fetch every row
#[derive(Debug, Clone)]
pub struct ExecuteQuery {
    sql: String,
    params: Vec<Value>,
}

impl ExecuteQuery {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

#[async_trait]
impl Operation for ExecuteQuery {
    type Output = Vec<Record>;

    async fn call(&self, session: &mut dyn Session) -> Result<Vec<Record>, DbError> {
        session.fetch_all(&self.sql, &self.params).await
    }

    fn query(&self) -> Option<&str> {
        Some(&self.sql)
    }

    fn params(&self) -> &[Value] {
        &self.params
    }
}

/// Run a statement, returning the number of affected rows
#[derive(Debug, Clone)]
pub struct ExecuteStatement {
    sql: String,
    params: Vec<Value>,
}

impl ExecuteStatement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

#[async_trait]
impl Operation for ExecuteStatement {
    type Output = u64;

    async fn call(&self, session: &mut dyn Session) -> Result<u64, DbError> {
        session.execute(&self.sql, &self.params).await
    }

    fn query(&self) -> Option<&str> {
        Some(&self.sql)
    }

    fn params(&self) -> &[Value] {
        &self.params
    }
}
