//! Transaction stage

use async_trait::async_trait;
use querylane_db::{DbError, Session, Value};
use tracing::{debug, warn};

use crate::operation::Operation;

/// Stage that commits on success and rolls back on failure
///
/// Begin, commit and rollback are issued on the same session the inner
/// operation runs on. After a rollback the inner operation's own error is
/// returned unchanged.
pub struct Transactional<O> {
    inner: O,
}

impl<O> Transactional<O> {
    pub fn new(inner: O) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<O: Operation> Operation for Transactional<O> {
    type Output = O::Output;

    async fn call(&self, session: &mut dyn Session) -> Result<O::Output, DbError> {
        session.begin().await?;

        let err = match self.inner.call(&mut *session).await {
            Ok(output) => match session.commit().await {
                Ok(()) => {
                    metrics::counter!("querylane_transactions_committed_total").increment(1);
                    debug!("Transaction committed");
                    return Ok(output);
                }
                Err(e) => {
                    warn!("Commit failed: {}", e);
                    e
                }
            },
            Err(e) => e,
        };

        // The session must leave this stage outside any transaction
        if let Err(rollback_err) = session.rollback().await {
            warn!("Rollback failed after error '{}': {}", err, rollback_err);
        }
        metrics::counter!("querylane_transactions_rolled_back_total").increment(1);
        debug!("Transaction rolled back: {}", err);
        Err(err)
    }

    fn query(&self) -> Option<&str> {
        self.inner.query()
    }

    fn params(&self) -> &[Value] {
        self.inner.params()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::ConnectionScope;
    use crate::operation::ExecuteStatement;
    use crate::retry::{Retry, RetryPolicy};
    use crate::testing::{FlakyCommit, InsertThenFail, seeded_connector};
    use crate::users::{CountUsers, ImportUsers};
    use crate::CoreError;
    use querylane_db::{Connector, NewUser, UserRepository};
    use std::time::Duration;

    fn new_user(name: &str, age: f64) -> NewUser {
        NewUser {
            name: name.to_string(),
            email: format!("{}@example.com", name),
            age,
        }
    }

    #[tokio::test]
    async fn test_failure_rolls_back_partial_writes() {
        let (_dir, connector) = seeded_connector(&[22.0, 29.0]).await;
        let scope = ConnectionScope::new(connector);

        let op = Transactional::new(InsertThenFail::new(new_user("mallory", 50.0)));
        let err = scope.run(&op).await.unwrap_err();
        assert!(matches!(err, CoreError::Operation(DbError::NotFound(_))));

        let count = scope.run(&CountUsers::default()).await.unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_success_commits_every_write() {
        let (_dir, connector) = seeded_connector(&[22.0]).await;
        let scope = ConnectionScope::new(connector);

        let op = Transactional::new(ImportUsers::new(
            UserRepository::default(),
            vec![new_user("trent", 31.0), new_user("victor", 44.0)],
        ));
        let report = scope.run(&op).await.unwrap();
        assert_eq!(report.inserted, 2);

        let count = scope.run(&CountUsers::default()).await.unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_without_transaction_partial_write_persists() {
        let (_dir, connector) = seeded_connector(&[22.0]).await;
        let scope = ConnectionScope::new(connector);

        // Same failing operation, no transaction stage: the insert sticks
        let op = InsertThenFail::new(new_user("mallory", 50.0));
        assert!(scope.run(&op).await.is_err());

        let count = scope.run(&CountUsers::default()).await.unwrap();
        assert_eq!(count, 2);
    }

    fn insert_statement(name: &str) -> ExecuteStatement {
        ExecuteStatement::new(
            "INSERT INTO user_data (user_id, name, email, age) VALUES (?, ?, ?, ?)",
            vec![
                format!("id-{}", name).into(),
                name.into(),
                format!("{}@example.com", name).into(),
                Value::Real(30.0),
            ],
        )
    }

    #[tokio::test]
    async fn test_failed_commit_rolls_back() {
        let (_dir, connector) = seeded_connector(&[22.0, 29.0]).await;
        let mut session = FlakyCommit::new(connector.open().await.unwrap(), 1);

        let op = Transactional::new(insert_statement("peggy"));
        let err = op.call(&mut session).await.unwrap_err();
        assert!(matches!(err, DbError::Io(_)));
        assert_eq!(session.commits(), 1);

        // Nothing left behind and no transaction still open
        let count = CountUsers::default().call(&mut session).await.unwrap();
        assert_eq!(count, 2);
        session.begin().await.unwrap();
        session.rollback().await.unwrap();

        connector.close(session.into_inner()).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_commit_is_retried_cleanly() {
        let (_dir, connector) = seeded_connector(&[22.0, 29.0]).await;
        let mut session = FlakyCommit::new(connector.open().await.unwrap(), 1);

        let op = Retry::new(
            Transactional::new(insert_statement("peggy")),
            RetryPolicy::new(3, Duration::ZERO),
        );
        let inserted = op.call(&mut session).await.unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(session.commits(), 2);

        let count = CountUsers::default().call(&mut session).await.unwrap();
        assert_eq!(count, 3);

        connector.close(session.into_inner()).await.unwrap();
    }
}
