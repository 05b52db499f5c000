//! Test helpers: a counting connector over a temporary SQLite file and
//! operations with scripted failures

use async_trait::async_trait;
use futures::stream::BoxStream;
use querylane_db::{
    Connector, DbError, NewUser, Record, Session, SqliteConnector, SqliteSession, UserRepository,
    Value,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

use crate::operation::Operation;

/// SQLite connector that counts opens and closes
pub struct CountingConnector {
    inner: SqliteConnector,
    attempts: AtomicUsize,
    fail_attempt: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl CountingConnector {
    pub fn at(path: PathBuf) -> Self {
        Self {
            inner: SqliteConnector::from_path(path),
            attempts: AtomicUsize::new(0),
            fail_attempt: AtomicUsize::new(0),
            opened: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
        }
    }

    /// Refuse the `n`th open attempt, counting from 1
    pub fn fail_open_attempt(&self, n: usize) {
        self.fail_attempt.store(n, Ordering::SeqCst);
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for CountingConnector {
    type Conn = SqliteSession;

    fn target(&self) -> &str {
        self.inner.target()
    }

    async fn open(&self) -> Result<SqliteSession, DbError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt == self.fail_attempt.load(Ordering::SeqCst) {
            return Err(DbError::Io(std::io::Error::other("open refused")));
        }
        let session = self.inner.open().await?;
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(session)
    }

    async fn close(&self, conn: SqliteSession) -> Result<(), DbError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.inner.close(conn).await
    }
}

/// A temporary `user_data` table with one user per age, inserted in order.
/// Seeding bypasses the counters.
pub async fn seeded_connector(ages: &[f64]) -> (TempDir, Arc<CountingConnector>) {
    let dir = TempDir::new().unwrap();
    let connector = CountingConnector::at(dir.path().join("users.db"));
    let repo = UserRepository::default();

    let mut session = connector.inner.open().await.unwrap();
    repo.create_table(&mut session).await.unwrap();
    for (i, age) in ages.iter().enumerate() {
        repo.insert_user(
            &mut session,
            NewUser {
                name: format!("user{}", i),
                email: format!("user{}@example.com", i),
                age: *age,
            },
        )
        .await
        .unwrap();
    }
    connector.inner.close(session).await.unwrap();

    (dir, Arc::new(connector))
}

/// Fails a fixed number of times, then returns the attempt number
pub struct Failing {
    failures: usize,
    transient: bool,
    calls: AtomicUsize,
}

impl Failing {
    pub fn times(failures: usize) -> Self {
        Self {
            failures,
            transient: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always() -> Self {
        Self::times(usize::MAX)
    }

    /// Fails with an I/O error, which counts as transient
    pub fn transient(failures: usize) -> Self {
        Self {
            transient: true,
            ..Self::times(failures)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Operation for Failing {
    type Output = usize;

    async fn call(&self, _session: &mut dyn Session) -> Result<usize, DbError> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            let msg = format!("attempt {}", attempt);
            return Err(if self.transient {
                DbError::Io(std::io::Error::other(msg))
            } else {
                DbError::NotFound(msg)
            });
        }
        Ok(attempt)
    }

    fn query(&self) -> Option<&str> {
        Some("SELECT flaky")
    }
}

/// Counts invocations of the wrapped operation
pub struct Counted<O> {
    inner: O,
    calls: AtomicUsize,
}

impl<O> Counted<O> {
    pub fn new(inner: O) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<O: Operation> Operation for Counted<O> {
    type Output = O::Output;

    async fn call(&self, session: &mut dyn Session) -> Result<O::Output, DbError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.call(session).await
    }

    fn query(&self) -> Option<&str> {
        self.inner.query()
    }

    fn params(&self) -> &[Value] {
        self.inner.params()
    }
}

/// Inserts a user, then fails
pub struct InsertThenFail {
    repo: UserRepository,
    user: NewUser,
}

impl InsertThenFail {
    pub fn new(user: NewUser) -> Self {
        Self {
            repo: UserRepository::default(),
            user,
        }
    }
}

#[async_trait]
impl Operation for InsertThenFail {
    type Output = ();

    async fn call(&self, session: &mut dyn Session) -> Result<(), DbError> {
        self.repo.insert_user(session, self.user.clone()).await?;
        Err(DbError::NotFound("simulated failure after insert".to_string()))
    }
}

/// Session whose first `failures` commits fail before reaching the database
pub struct FlakyCommit {
    inner: SqliteSession,
    failures: usize,
    commits: usize,
}

impl FlakyCommit {
    pub fn new(inner: SqliteSession, failures: usize) -> Self {
        Self {
            inner,
            failures,
            commits: 0,
        }
    }

    pub fn commits(&self) -> usize {
        self.commits
    }

    pub fn into_inner(self) -> SqliteSession {
        self.inner
    }
}

#[async_trait]
impl Session for FlakyCommit {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, DbError> {
        self.inner.execute(sql, params).await
    }

    async fn fetch_all(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Record>, DbError> {
        self.inner.fetch_all(sql, params).await
    }

    fn fetch<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [Value],
    ) -> BoxStream<'a, Result<Record, DbError>> {
        self.inner.fetch(sql, params)
    }

    async fn begin(&mut self) -> Result<(), DbError> {
        self.inner.begin().await
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        self.commits += 1;
        if self.commits <= self.failures {
            return Err(DbError::Io(std::io::Error::other("disk I/O error")));
        }
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        self.inner.rollback().await
    }
}
