//! Operations over the user table

use async_trait::async_trait;
use querylane_db::{DbError, NewUser, SeedReport, Session, UserRepository, UserRow};

use crate::operation::Operation;

/// Create the user table if missing
#[derive(Debug, Clone, Default)]
pub struct CreateUserTable {
    pub repo: UserRepository,
}

#[async_trait]
impl Operation for CreateUserTable {
    type Output = ();

    async fn call(&self, session: &mut dyn Session) -> Result<(), DbError> {
        self.repo.create_table(session).await
    }
}

/// Every user in insertion order
#[derive(Debug, Clone, Default)]
pub struct ListUsers {
    pub repo: UserRepository,
}

#[async_trait]
impl Operation for ListUsers {
    type Output = Vec<UserRow>;

    async fn call(&self, session: &mut dyn Session) -> Result<Vec<UserRow>, DbError> {
        self.repo.list_users(session).await
    }
}

/// Users strictly older than `min_age`
#[derive(Debug, Clone, Default)]
pub struct UsersOlderThan {
    pub repo: UserRepository,
    pub min_age: f64,
}

#[async_trait]
impl Operation for UsersOlderThan {
    type Output = Vec<UserRow>;

    async fn call(&self, session: &mut dyn Session) -> Result<Vec<UserRow>, DbError> {
        self.repo.list_users_older_than(session, self.min_age).await
    }
}

/// One offset/limit page of users
#[derive(Debug, Clone)]
pub struct FetchPage {
    pub repo: UserRepository,
    pub page_size: i64,
    pub offset: i64,
}

#[async_trait]
impl Operation for FetchPage {
    type Output = Vec<UserRow>;

    async fn call(&self, session: &mut dyn Session) -> Result<Vec<UserRow>, DbError> {
        self.repo.fetch_page(session, self.page_size, self.offset).await
    }
}

/// Number of users
#[derive(Debug, Clone, Default)]
pub struct CountUsers {
    pub repo: UserRepository,
}

#[async_trait]
impl Operation for CountUsers {
    type Output = i64;

    async fn call(&self, session: &mut dyn Session) -> Result<i64, DbError> {
        self.repo.count_users(session).await
    }
}

/// Change one user's email; a missing user is an error
#[derive(Debug, Clone)]
pub struct UpdateUserEmail {
    pub repo: UserRepository,
    pub user_id: String,
    pub new_email: String,
}

impl UpdateUserEmail {
    pub fn new(repo: UserRepository, user_id: impl Into<String>, new_email: impl Into<String>) -> Self {
        Self {
            repo,
            user_id: user_id.into(),
            new_email: new_email.into(),
        }
    }
}

#[async_trait]
impl Operation for UpdateUserEmail {
    type Output = ();

    async fn call(&self, session: &mut dyn Session) -> Result<(), DbError> {
        let updated = self
            .repo
            .update_user_email(session, &self.user_id, &self.new_email)
            .await?;

        if updated {
            Ok(())
        } else {
            Err(DbError::NotFound(format!("user {}", self.user_id)))
        }
    }
}

/// Insert users that are not present yet, keyed by email
#[derive(Debug, Clone)]
pub struct ImportUsers {
    pub repo: UserRepository,
    pub users: Vec<NewUser>,
}

impl ImportUsers {
    pub fn new(repo: UserRepository, users: Vec<NewUser>) -> Self {
        Self { repo, users }
    }
}

#[async_trait]
impl Operation for ImportUsers {
    type Output = SeedReport;

    async fn call(&self, session: &mut dyn Session) -> Result<SeedReport, DbError> {
        self.repo.create_table(&mut *session).await?;
        self.repo.import_users(session, &self.users).await
    }
}
