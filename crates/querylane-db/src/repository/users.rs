//! User operations

use uuid::Uuid;

use super::{USER_COLUMNS, UserRepository};
use crate::error::DbError;
use crate::models::{NewUser, Record, UserRow, Value};
use crate::session::Session;

impl UserRepository {
    // ==================== User Operations ====================

    /// Insert a new user with a fresh UUID
    pub async fn insert_user(
        &self,
        session: &mut dyn Session,
        user: NewUser,
    ) -> Result<UserRow, DbError> {
        // Check if the email is already taken
        if self.get_user_by_email(session, &user.email).await?.is_some() {
            return Err(DbError::Duplicate(format!(
                "User with email '{}' already exists",
                user.email
            )));
        }

        let user_id = Uuid::new_v4().to_string();
        session
            .execute(
                &format!(
                    "INSERT INTO {} (user_id, name, email, age) VALUES (?, ?, ?, ?)",
                    self.table
                ),
                &[
                    Value::Text(user_id.clone()),
                    Value::Text(user.name.clone()),
                    Value::Text(user.email.clone()),
                    Value::Real(user.age),
                ],
            )
            .await?;

        Ok(UserRow {
            user_id,
            name: user.name,
            email: user.email,
            age: user.age,
        })
    }

    /// Get a user by email
    pub async fn get_user_by_email(
        &self,
        session: &mut dyn Session,
        email: &str,
    ) -> Result<Option<UserRow>, DbError> {
        let rows = session
            .fetch_all(
                &format!(
                    "SELECT {} FROM {} WHERE email = ? LIMIT 1",
                    USER_COLUMNS, self.table
                ),
                &[Value::from(email)],
            )
            .await?;

        rows.first().map(UserRow::try_from).transpose()
    }

    /// Get a user by ID
    pub async fn get_user_by_id(
        &self,
        session: &mut dyn Session,
        user_id: &str,
    ) -> Result<Option<UserRow>, DbError> {
        let rows = session
            .fetch_all(
                &format!(
                    "SELECT {} FROM {} WHERE user_id = ?",
                    USER_COLUMNS, self.table
                ),
                &[Value::from(user_id)],
            )
            .await?;

        rows.first().map(UserRow::try_from).transpose()
    }

    /// List all users in insertion order
    pub async fn list_users(&self, session: &mut dyn Session) -> Result<Vec<UserRow>, DbError> {
        let rows = session.fetch_all(&self.select_all_sql(), &[]).await?;
        decode_users(&rows)
    }

    /// List users strictly older than `min_age`
    pub async fn list_users_older_than(
        &self,
        session: &mut dyn Session,
        min_age: f64,
    ) -> Result<Vec<UserRow>, DbError> {
        let rows = session
            .fetch_all(
                &format!(
                    "SELECT {} FROM {} WHERE age > ? ORDER BY rowid",
                    USER_COLUMNS, self.table
                ),
                &[Value::Real(min_age)],
            )
            .await?;
        decode_users(&rows)
    }

    /// Fetch one page of users
    pub async fn fetch_page(
        &self,
        session: &mut dyn Session,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<UserRow>, DbError> {
        let rows = session
            .fetch_all(
                &self.select_page_sql(),
                &[Value::Integer(limit), Value::Integer(offset)],
            )
            .await?;
        decode_users(&rows)
    }

    /// Update a user's email, returning whether a row matched
    pub async fn update_user_email(
        &self,
        session: &mut dyn Session,
        user_id: &str,
        new_email: &str,
    ) -> Result<bool, DbError> {
        let affected = session
            .execute(
                &format!("UPDATE {} SET email = ? WHERE user_id = ?", self.table),
                &[Value::from(new_email), Value::from(user_id)],
            )
            .await?;
        Ok(affected > 0)
    }

    /// Count users
    pub async fn count_users(&self, session: &mut dyn Session) -> Result<i64, DbError> {
        let rows = session
            .fetch_all(
                &format!("SELECT COUNT(*) AS count FROM {}", self.table),
                &[],
            )
            .await?;

        match rows.first().and_then(|row| row.get("count")) {
            Some(Value::Integer(count)) => Ok(*count),
            _ => Err(DbError::Decode("COUNT(*) returned no integer".to_string())),
        }
    }
}

fn decode_users(rows: &[Record]) -> Result<Vec<UserRow>, DbError> {
    rows.iter().map(UserRow::try_from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Connector, SqliteConnector};
    use tempfile::TempDir;

    fn new_user(name: &str, age: f64) -> NewUser {
        NewUser {
            name: name.to_string(),
            email: format!("{}@example.com", name),
            age,
        }
    }

    #[tokio::test]
    async fn test_user_round_trip() {
        let dir = TempDir::new().unwrap();
        let connector = SqliteConnector::from_path(dir.path().join("users.db"));
        let mut session = connector.open().await.unwrap();
        let repo = UserRepository::default();

        repo.create_table(&mut session).await.unwrap();
        for (name, age) in [("alice", 22.0), ("bob", 29.0), ("carol", 45.0)] {
            repo.insert_user(&mut session, new_user(name, age)).await.unwrap();
        }

        assert_eq!(repo.count_users(&mut session).await.unwrap(), 3);

        let users = repo.list_users(&mut session).await.unwrap();
        let names: Vec<&str> = users.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);

        let older = repo.list_users_older_than(&mut session, 25.0).await.unwrap();
        assert_eq!(older.len(), 2);

        let page = repo.fetch_page(&mut session, 2, 2).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].name, "carol");

        let bob = repo
            .get_user_by_email(&mut session, "bob@example.com")
            .await
            .unwrap()
            .unwrap();
        assert!(
            repo.update_user_email(&mut session, &bob.user_id, "robert@example.com")
                .await
                .unwrap()
        );
        let bob = repo
            .get_user_by_id(&mut session, &bob.user_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bob.email, "robert@example.com");

        assert!(
            !repo
                .update_user_email(&mut session, "no-such-id", "x@example.com")
                .await
                .unwrap()
        );

        connector.close(session).await.unwrap();
    }

    #[tokio::test]
    async fn test_insert_duplicate_email() {
        let dir = TempDir::new().unwrap();
        let connector = SqliteConnector::from_path(dir.path().join("users.db"));
        let mut session = connector.open().await.unwrap();
        let repo = UserRepository::default();

        repo.create_table(&mut session).await.unwrap();
        repo.insert_user(&mut session, new_user("alice", 22.0)).await.unwrap();

        let result = repo.insert_user(&mut session, new_user("alice", 30.0)).await;
        assert!(matches!(result, Err(DbError::Duplicate(_))));

        connector.close(session).await.unwrap();
    }

    #[test]
    fn test_rejects_unsafe_table_name() {
        assert!(UserRepository::new("user_data").is_ok());
        assert!(matches!(
            UserRepository::new("user_data; DROP TABLE x"),
            Err(DbError::InvalidIdentifier(_))
        ));
    }
}
