//! Query executor: the ordered stage chain around one operation
//!
//! Every call runs through the same chain, outermost first:
//!
//! ```text
//! Connection → Retry → Cache → LogQueries → Transaction → Operation
//! ```
//!
//! Cache sits inside Retry, so a hit returns without any retry cycle while a
//! failing miss is retried. The connection is opened once per call, outside
//! the retry loop, so every attempt reuses it and open failures are never
//! retried.

use querylane_db::Connector;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::cache::{Cached, FingerprintMode, QueryFingerprint, ResultCache};
use crate::error::CoreError;
use crate::logging::LogQueries;
use crate::operation::Operation;
use crate::retry::{Retry, RetryPolicy};
use crate::scope::ConnectionScope;
use crate::transaction::Transactional;

/// One layer of the execution chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Connection,
    Retry,
    Cache,
    LogQueries,
    Transaction,
    Operation,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Connection => "connection",
            Stage::Retry => "retry",
            Stage::Cache => "cache",
            Stage::LogQueries => "log_queries",
            Stage::Transaction => "transaction",
            Stage::Operation => "operation",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOptions {
    /// Serve and store results through the result cache
    pub cached: bool,
    /// Wrap the operation in a transaction
    pub transactional: bool,
}

impl ExecOptions {
    pub fn cached() -> Self {
        Self {
            cached: true,
            transactional: false,
        }
    }

    pub fn transactional() -> Self {
        Self {
            cached: false,
            transactional: true,
        }
    }
}

/// Composes connection scoping, retry, caching and transactions
pub struct QueryExecutor<C> {
    scope: ConnectionScope<C>,
    retry: RetryPolicy,
    cache: Arc<ResultCache>,
    fingerprint_mode: FingerprintMode,
    log_queries: bool,
}

impl<C: Connector> QueryExecutor<C> {
    pub fn new(connector: Arc<C>, retry: RetryPolicy, cache: Arc<ResultCache>) -> Self {
        Self {
            scope: ConnectionScope::new(connector),
            retry,
            cache,
            fingerprint_mode: FingerprintMode::default(),
            log_queries: false,
        }
    }

    pub fn with_fingerprint_mode(mut self, mode: FingerprintMode) -> Self {
        self.fingerprint_mode = mode;
        self
    }

    pub fn with_query_logging(mut self, enabled: bool) -> Self {
        self.log_queries = enabled;
        self
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn scope(&self) -> &ConnectionScope<C> {
        &self.scope
    }

    /// The stages a call with `options` runs through, outermost first
    pub fn pipeline(&self, options: ExecOptions) -> Vec<Stage> {
        let mut stages = vec![Stage::Connection, Stage::Retry];
        if options.cached {
            stages.push(Stage::Cache);
        }
        if self.log_queries {
            stages.push(Stage::LogQueries);
        }
        if options.transactional {
            stages.push(Stage::Transaction);
        }
        stages.push(Stage::Operation);
        stages
    }

    /// Run `op` on a fresh connection, closed before this returns
    pub async fn execute<O>(&self, op: O, options: ExecOptions) -> Result<O::Output, CoreError>
    where
        O: Operation + 'static,
        O::Output: Clone + Sync + 'static,
    {
        let chain = self.build_chain(op, options)?;
        self.scope.run(&chain).await
    }

    /// Run `op` on a connection the caller owns and will close
    pub async fn execute_on<O>(
        &self,
        conn: &mut C::Conn,
        op: O,
        options: ExecOptions,
    ) -> Result<O::Output, CoreError>
    where
        O: Operation + 'static,
        O::Output: Clone + Sync + 'static,
    {
        let chain = self.build_chain(op, options)?;
        self.scope.run_on(conn, &chain).await
    }

    /// Wrap `op` in the inner stages, innermost first. The connection stage
    /// is applied by the caller.
    fn build_chain<O>(
        &self,
        op: O,
        options: ExecOptions,
    ) -> Result<Box<dyn Operation<Output = O::Output>>, CoreError>
    where
        O: Operation + 'static,
        O::Output: Clone + Sync + 'static,
    {
        let fingerprint = if options.cached {
            let query = op.query().ok_or_else(|| {
                CoreError::InvalidArgument("caching requires an operation with query text".to_string())
            })?;
            Some(QueryFingerprint::new(self.fingerprint_mode, query, op.params()))
        } else {
            None
        };

        let stages = self.pipeline(options);
        debug!(
            "Execution chain: {}",
            stages
                .iter()
                .map(Stage::as_str)
                .collect::<Vec<_>>()
                .join(" -> ")
        );

        let mut chain: Box<dyn Operation<Output = O::Output>> = Box::new(op);
        for stage in stages.iter().rev() {
            chain = match stage {
                Stage::Operation | Stage::Connection => chain,
                Stage::Transaction => Box::new(Transactional::new(chain)),
                Stage::LogQueries => Box::new(LogQueries::new(chain)),
                Stage::Cache => match &fingerprint {
                    Some(fp) => Box::new(Cached::new(chain, self.cache.clone(), fp.clone())),
                    None => chain,
                },
                Stage::Retry => Box::new(Retry::new(chain, self.retry.clone())),
            };
        }

        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{ExecuteQuery, ExecuteStatement};
    use crate::testing::{CountingConnector, Failing, seeded_connector};
    use crate::users::{CountUsers, UpdateUserEmail};
    use querylane_db::{DbError, UserRepository, Value};
    use std::time::Duration;

    fn executor(connector: Arc<CountingConnector>, retries: u32) -> QueryExecutor<CountingConnector> {
        QueryExecutor::new(
            connector,
            RetryPolicy::new(retries, Duration::ZERO),
            Arc::new(ResultCache::new()),
        )
    }

    #[test]
    fn test_pipeline_order() {
        let connector = Arc::new(CountingConnector::at("unused.db".into()));
        let exec = executor(connector, 3).with_query_logging(true);

        assert_eq!(
            exec.pipeline(ExecOptions {
                cached: true,
                transactional: true,
            }),
            vec![
                Stage::Connection,
                Stage::Retry,
                Stage::Cache,
                Stage::LogQueries,
                Stage::Transaction,
                Stage::Operation,
            ]
        );

        let exec = exec.with_query_logging(false);
        assert_eq!(
            exec.pipeline(ExecOptions::default()),
            vec![Stage::Connection, Stage::Retry, Stage::Operation]
        );
    }

    #[tokio::test]
    async fn test_one_connection_per_call_across_retries() {
        let (_dir, connector) = seeded_connector(&[]).await;
        let exec = executor(connector.clone(), 3);

        let attempt = exec
            .execute(Failing::times(2), ExecOptions::default())
            .await
            .unwrap();
        assert_eq!(attempt, 3);
        assert_eq!(connector.opened(), 1);
        assert_eq!(connector.closed(), 1);
    }

    #[tokio::test]
    async fn test_cached_query_executes_once() {
        let (_dir, connector) = seeded_connector(&[22.0, 29.0]).await;
        let exec = executor(connector.clone(), 3);
        let sql = "SELECT name FROM user_data ORDER BY rowid";

        let first = exec
            .execute(ExecuteQuery::new(sql), ExecOptions::cached())
            .await
            .unwrap();
        let second = exec
            .execute(ExecuteQuery::new(sql), ExecOptions::cached())
            .await
            .unwrap();

        assert_eq!(first, second);
        let stats = exec.cache().stats();
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.hit_count, 1);
        // Both calls still open and release a connection
        assert_eq!(connector.opened(), 2);
        assert_eq!(connector.closed(), 2);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_retry_cycle() {
        let (_dir, connector) = seeded_connector(&[]).await;
        let exec = executor(connector, 3);

        // Prime the cache under the same query text the failing op reports
        exec.cache().insert(
            QueryFingerprint::new(FingerprintMode::Query, "SELECT flaky", &[]),
            7usize,
        );

        let value = exec
            .execute(Failing::always(), ExecOptions::cached())
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_cache_miss_failure_is_retried() {
        let (_dir, connector) = seeded_connector(&[]).await;
        let exec = executor(connector, 3);

        let value = exec
            .execute(Failing::times(2), ExecOptions::cached())
            .await
            .unwrap();
        assert_eq!(value, 3);
        assert_eq!(exec.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_cached_reads_survive_writes() {
        let (_dir, connector) = seeded_connector(&[22.0]).await;
        let exec = executor(connector, 1);
        let sql = "SELECT COUNT(*) AS count FROM user_data";

        let before = exec
            .execute(ExecuteQuery::new(sql), ExecOptions::cached())
            .await
            .unwrap();

        exec.execute(
            ExecuteStatement::new(
                "INSERT INTO user_data (user_id, name, email, age) VALUES (?, ?, ?, ?)",
                vec!["u-x".into(), "x".into(), "x@example.com".into(), Value::Real(40.0)],
            ),
            ExecOptions::transactional(),
        )
        .await
        .unwrap();

        // Stale until invalidated
        let stale = exec
            .execute(ExecuteQuery::new(sql), ExecOptions::cached())
            .await
            .unwrap();
        assert_eq!(before, stale);

        exec.cache()
            .invalidate(&QueryFingerprint::new(FingerprintMode::Query, sql, &[]));
        let fresh = exec
            .execute(ExecuteQuery::new(sql), ExecOptions::cached())
            .await
            .unwrap();
        assert_eq!(fresh[0].get("count"), Some(&Value::Integer(2)));
    }

    #[tokio::test]
    async fn test_fingerprint_with_params() {
        let (_dir, connector) = seeded_connector(&[22.0, 45.0]).await;
        let exec = executor(connector, 1).with_fingerprint_mode(FingerprintMode::QueryAndParams);
        let sql = "SELECT name FROM user_data WHERE age > ?";

        let young = exec
            .execute(
                ExecuteQuery::with_params(sql, vec![Value::Integer(10)]),
                ExecOptions::cached(),
            )
            .await
            .unwrap();
        let old = exec
            .execute(
                ExecuteQuery::with_params(sql, vec![Value::Integer(40)]),
                ExecOptions::cached(),
            )
            .await
            .unwrap();

        assert_eq!(young.len(), 2);
        assert_eq!(old.len(), 1);
        assert_eq!(exec.cache().len(), 2);
    }

    #[tokio::test]
    async fn test_caching_requires_query_text() {
        let (_dir, connector) = seeded_connector(&[]).await;
        let exec = executor(connector.clone(), 1);

        let err = exec
            .execute(CountUsers::default(), ExecOptions::cached())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
        assert_eq!(connector.opened(), 0);
    }

    #[tokio::test]
    async fn test_transactional_update_missing_user() {
        let (_dir, connector) = seeded_connector(&[22.0]).await;
        let exec = executor(connector, 2);

        let err = exec
            .execute(
                UpdateUserEmail::new(UserRepository::default(), "nobody", "x@example.com"),
                ExecOptions::transactional(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Operation(DbError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_execute_on_caller_connection() {
        let (_dir, connector) = seeded_connector(&[22.0, 29.0]).await;
        let exec = executor(connector.clone(), 1);

        let mut conn = connector.open().await.unwrap();
        let count = exec
            .execute_on(&mut conn, CountUsers::default(), ExecOptions::transactional())
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(connector.closed(), 0);

        connector.close(conn).await.unwrap();
    }
}
