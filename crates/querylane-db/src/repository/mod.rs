//! Repository for the `user_data` table

use tracing::info;

use crate::error::DbError;
use crate::session::Session;
use crate::utils::validate_identifier;

// Submodules
mod users;

/// Default table consumed by the streaming reader
pub const DEFAULT_TABLE: &str = "user_data";

/// Column list shared by every user query
const USER_COLUMNS: &str = "user_id, name, email, age";

/// SQL for the user table. Operations take the session they run on, so the
/// repository itself holds no connection.
#[derive(Debug, Clone)]
pub struct UserRepository {
    table: String,
}

impl Default for UserRepository {
    fn default() -> Self {
        Self {
            table: DEFAULT_TABLE.to_string(),
        }
    }
}

impl UserRepository {
    /// Create a repository for the given table
    pub fn new(table: &str) -> Result<Self, DbError> {
        Ok(Self {
            table: validate_identifier(table)?.to_string(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the table if it doesn't exist
    pub async fn create_table(&self, session: &mut dyn Session) -> Result<(), DbError> {
        info!("Ensuring table {} exists", self.table);

        session
            .execute(
                &format!(
                    r#"
                    CREATE TABLE IF NOT EXISTS {} (
                        user_id TEXT PRIMARY KEY,
                        name TEXT NOT NULL,
                        email TEXT NOT NULL,
                        age REAL NOT NULL
                    )
                    "#,
                    self.table
                ),
                &[],
            )
            .await?;

        session
            .execute(
                &format!(
                    "CREATE INDEX IF NOT EXISTS idx_{0}_email ON {0}(email)",
                    self.table
                ),
                &[],
            )
            .await?;

        Ok(())
    }

    /// Every row in insertion order
    pub fn select_all_sql(&self) -> String {
        format!("SELECT {} FROM {} ORDER BY rowid", USER_COLUMNS, self.table)
    }

    /// Only the age column, in insertion order
    pub fn select_ages_sql(&self) -> String {
        format!("SELECT age FROM {} ORDER BY rowid", self.table)
    }

    /// One offset/limit window, in insertion order
    pub fn select_page_sql(&self) -> String {
        format!(
            "SELECT {} FROM {} ORDER BY rowid LIMIT ? OFFSET ?",
            USER_COLUMNS, self.table
        )
    }
}
