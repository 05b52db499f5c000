//! Connection capability and the SQLite implementation
//!
//! A [`Connector`] opens and closes [`Session`]s; a session is one database
//! connection exposing parameterized execution, row iteration and explicit
//! transaction control. Each session is owned by exactly one caller at a time.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteRow};
use sqlx::{Column, Connection, Row, Sqlite, SqliteConnection, TypeInfo, ValueRef};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

use crate::error::DbError;
use crate::models::{Record, Value};

/// One open database connection
#[async_trait]
pub trait Session: Send {
    /// Execute a statement, returning the number of affected rows
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, DbError>;

    /// Execute a query and materialize every row
    async fn fetch_all(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Record>, DbError>;

    /// Execute a query and yield rows as the cursor advances
    fn fetch<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxStream<'a, Result<Record, DbError>>;

    async fn begin(&mut self) -> Result<(), DbError>;

    async fn commit(&mut self) -> Result<(), DbError>;

    async fn rollback(&mut self) -> Result<(), DbError>;
}

/// Opens and closes sessions against one database target
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Conn: Session + 'static;

    /// Human-readable target, used in logs and errors
    fn target(&self) -> &str;

    async fn open(&self) -> Result<Self::Conn, DbError>;

    /// Close a session. Consumes it, so a session can be closed at most once.
    async fn close(&self, conn: Self::Conn) -> Result<(), DbError>;
}

/// Connector for a SQLite database file
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    options: SqliteConnectOptions,
    target: String,
}

impl SqliteConnector {
    /// Create a connector from a `sqlite:` URL (e.g. `sqlite:users.db?mode=rwc`)
    pub fn new(database_url: &str) -> Result<Self, DbError> {
        let options = SqliteConnectOptions::from_str(database_url)?;
        Ok(Self {
            options,
            target: database_url.to_string(),
        })
    }

    /// Create a connector for a database file, creating it on first open
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        Self {
            options: SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true),
            target: path.display().to_string(),
        }
    }
}

#[async_trait]
impl Connector for SqliteConnector {
    type Conn = SqliteSession;

    fn target(&self) -> &str {
        &self.target
    }

    async fn open(&self) -> Result<SqliteSession, DbError> {
        debug!("Opening connection to {}", self.target);
        let conn = SqliteConnection::connect_with(&self.options)
            .await
            .map_err(|source| DbError::Open {
                target: self.target.clone(),
                source,
            })?;
        Ok(SqliteSession { conn })
    }

    async fn close(&self, conn: SqliteSession) -> Result<(), DbError> {
        debug!("Closing connection to {}", self.target);
        conn.conn.close().await?;
        Ok(())
    }
}

/// A single SQLite connection
pub struct SqliteSession {
    conn: SqliteConnection,
}

#[async_trait]
impl Session for SqliteSession {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, DbError> {
        let result = bind_values(sqlx::query(sql), params)
            .execute(&mut self.conn)
            .await?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Record>, DbError> {
        let rows = bind_values(sqlx::query(sql), params)
            .fetch_all(&mut self.conn)
            .await?;

        rows.iter().map(record_from_row).collect()
    }

    fn fetch<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxStream<'a, Result<Record, DbError>> {
        bind_values(sqlx::query(sql), params)
            .fetch(&mut self.conn)
            .map(|row| row.map_err(DbError::from).and_then(|row| record_from_row(&row)))
            .boxed()
    }

    async fn begin(&mut self) -> Result<(), DbError> {
        sqlx::query("BEGIN").execute(&mut self.conn).await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        sqlx::query("COMMIT").execute(&mut self.conn).await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        sqlx::query("ROLLBACK").execute(&mut self.conn).await?;
        Ok(())
    }
}

/// Bind positional parameters to a query
fn bind_values<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &'q [Value],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<i64>),
            Value::Integer(i) => query.bind(*i),
            Value::Real(f) => query.bind(*f),
            Value::Text(s) => query.bind(s.as_str()),
            Value::Blob(b) => query.bind(b.as_slice()),
        };
    }
    query
}

/// Decode a row by each value's storage class
fn record_from_row(row: &SqliteRow) -> Result<Record, DbError> {
    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());

    for (idx, column) in row.columns().iter().enumerate() {
        let (is_null, type_name) = {
            let raw = row.try_get_raw(idx)?;
            (raw.is_null(), raw.type_info().name().to_string())
        };

        let value = if is_null {
            Value::Null
        } else {
            match type_name.as_str() {
                "INTEGER" | "BOOLEAN" => Value::Integer(row.try_get(idx)?),
                "REAL" => Value::Real(row.try_get(idx)?),
                "BLOB" => Value::Blob(row.try_get(idx)?),
                _ => Value::Text(row.try_get(idx)?),
            }
        };

        columns.push(column.name().to_string());
        values.push(value);
    }

    Ok(Record::new(columns, values))
}
