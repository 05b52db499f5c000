//! Lazy row, batch and page streams over the user table
//!
//! Row and batch streams hold one connection for their whole lifetime. The
//! connection is opened on the first poll by a producer task and closed when
//! the rows run out, when a row fails, or when the consumer drops the stream.
//! Page streams open and close a connection for every page instead.

use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use querylane_db::{Connector, DbError, Record, Session, UserRepository, UserRow, Value};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::scope::ConnectionScope;
use crate::users::{FetchPage, ListUsers, UsersOlderThan};

/// Sizes used by the streaming reader
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamConfig {
    /// Rows per batch
    pub batch_size: usize,
    /// Rows per page
    pub page_size: usize,
    /// Rows buffered between the producer task and the consumer
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            page_size: 100,
            channel_capacity: 64,
        }
    }
}

/// Produces lazy sequences of rows, batches and pages
pub struct StreamingReader<C> {
    connector: Arc<C>,
    repo: UserRepository,
    config: StreamConfig,
}

impl<C> Clone for StreamingReader<C> {
    fn clone(&self) -> Self {
        Self {
            connector: self.connector.clone(),
            repo: self.repo.clone(),
            config: self.config,
        }
    }
}

impl<C: Connector> StreamingReader<C> {
    pub fn new(connector: Arc<C>, config: StreamConfig) -> Self {
        Self {
            connector,
            repo: UserRepository::default(),
            config,
        }
    }

    pub fn with_repository(mut self, repo: UserRepository) -> Self {
        self.repo = repo;
        self
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Stream the rows of an arbitrary query
    ///
    /// Nothing is opened until the stream is first polled. Each call returns
    /// a fresh, single-pass stream.
    pub fn stream_records(
        &self,
        sql: impl Into<String>,
        params: Vec<Value>,
    ) -> BoxStream<'static, Result<Record, CoreError>> {
        let connector = self.connector.clone();
        let capacity = self.config.channel_capacity.max(1);
        let sql = sql.into();

        stream::once(async move {
            let (tx, rx) = mpsc::channel(capacity);
            tokio::spawn(produce(connector, sql, params, tx));
            stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|row| (row, rx)) })
        })
        .flatten()
        .boxed()
    }

    /// Every user, one row at a time
    pub fn stream_rows(&self) -> BoxStream<'static, Result<UserRow, CoreError>> {
        self.stream_records(self.repo.select_all_sql(), Vec::new())
            .map(|record| {
                record.and_then(|r| UserRow::try_from(&r).map_err(CoreError::Operation))
            })
            .boxed()
    }

    /// Every user, grouped into batches of `batch_size`; the last batch may
    /// be shorter
    pub fn stream_batches(
        &self,
        batch_size: usize,
    ) -> Result<BoxStream<'static, Result<Vec<UserRow>, CoreError>>, CoreError> {
        if batch_size == 0 {
            return Err(CoreError::InvalidArgument(
                "batch size must be at least 1".to_string(),
            ));
        }

        Ok(self
            .stream_rows()
            .chunks(batch_size)
            .map(|chunk| chunk.into_iter().collect::<Result<Vec<_>, _>>())
            .boxed())
    }

    /// Users older than `min_age`, read batch by batch, in table order
    pub fn batch_filter(
        &self,
        batch_size: usize,
        min_age: f64,
    ) -> Result<BoxStream<'static, Result<UserRow, CoreError>>, CoreError> {
        Ok(self
            .stream_batches(batch_size)?
            .map_ok(move |batch| {
                stream::iter(
                    batch
                        .into_iter()
                        .filter(move |user| user.age > min_age)
                        .map(Ok),
                )
            })
            .try_flatten()
            .boxed())
    }

    /// One page starting at `offset`, on its own connection
    pub async fn fetch_page(
        &self,
        page_size: usize,
        offset: usize,
    ) -> Result<Vec<UserRow>, CoreError> {
        if page_size == 0 {
            return Err(CoreError::InvalidArgument(
                "page size must be at least 1".to_string(),
            ));
        }

        let op = FetchPage {
            repo: self.repo.clone(),
            page_size: to_sql_int(page_size)?,
            offset: to_sql_int(offset)?,
        };

        ConnectionScope::new(self.connector.clone()).run(&op).await
    }

    /// Pages of `page_size` rows until a page comes back empty
    pub fn paginate(
        &self,
        page_size: usize,
    ) -> Result<BoxStream<'static, Result<Vec<UserRow>, CoreError>>, CoreError> {
        if page_size == 0 {
            return Err(CoreError::InvalidArgument(
                "page size must be at least 1".to_string(),
            ));
        }

        let reader = self.clone();
        Ok(stream::try_unfold(0usize, move |offset| {
            let reader = reader.clone();
            async move {
                let page = reader.fetch_page(page_size, offset).await?;
                if page.is_empty() {
                    debug!("Pagination finished at offset {}", offset);
                    return Ok(None);
                }
                Ok(Some((page, offset + page_size)))
            }
        })
        .boxed())
    }

    /// Every user's age, one row at a time
    pub fn stream_ages(&self) -> BoxStream<'static, Result<f64, CoreError>> {
        self.stream_records(self.repo.select_ages_sql(), Vec::new())
            .map(|record| {
                let record = record?;
                record
                    .get("age")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| {
                        CoreError::Operation(DbError::Decode("column age is not numeric".to_string()))
                    })
            })
            .boxed()
    }

    /// Mean age over the age stream, `None` for an empty table
    pub async fn average_age(&self) -> Result<Option<f64>, CoreError> {
        let (total, count) = self
            .stream_ages()
            .try_fold((0.0f64, 0u64), |(total, count), age| async move {
                Ok((total + age, count + 1))
            })
            .await?;

        if count == 0 {
            return Ok(None);
        }
        Ok(Some(total / count as f64))
    }

    /// All users and users older than `min_age`, fetched concurrently on
    /// separate connections. Returns once both have completed, even when one
    /// fails, so each connection is closed by its own scope.
    pub async fn fetch_concurrently(
        &self,
        min_age: f64,
    ) -> Result<(Vec<UserRow>, Vec<UserRow>), CoreError> {
        let scope = ConnectionScope::new(self.connector.clone());
        let all = ListUsers {
            repo: self.repo.clone(),
        };
        let older = UsersOlderThan {
            repo: self.repo.clone(),
            min_age,
        };

        let (all, older) = tokio::join!(scope.run(&all), scope.run(&older));
        Ok((all?, older?))
    }
}

fn to_sql_int(value: usize) -> Result<i64, CoreError> {
    i64::try_from(value)
        .map_err(|_| CoreError::InvalidArgument(format!("{} is out of range", value)))
}

/// Open a connection, forward rows until done or abandoned, close it
async fn produce<C: Connector>(
    connector: Arc<C>,
    sql: String,
    params: Vec<Value>,
    tx: mpsc::Sender<Result<Record, CoreError>>,
) {
    let mut conn = match connector.open().await {
        Ok(conn) => conn,
        Err(e) => {
            let _ = tx.send(Err(CoreError::Connection(e))).await;
            return;
        }
    };
    metrics::counter!("querylane_connections_opened_total").increment(1);

    let mut forwarded = 0usize;
    {
        let mut rows = conn.fetch(&sql, &params);
        while let Some(row) = rows.next().await {
            let failed = row.is_err();
            if tx.send(row.map_err(CoreError::Operation)).await.is_err() {
                debug!("Stream dropped by consumer after {} rows", forwarded);
                break;
            }
            if failed {
                break;
            }
            forwarded += 1;
        }
    }

    if let Err(e) = connector.close(conn).await {
        warn!("Failed to close streaming connection to {}: {}", connector.target(), e);
        let _ = tx.send(Err(CoreError::Connection(e))).await;
    }
    metrics::counter!("querylane_connections_closed_total").increment(1);
    debug!("Streamed {} rows from {}", forwarded, connector.target());
}
