//! Seeding the user table from CSV

use serde::Serialize;
use std::io::Read;
use tracing::{debug, info};

use crate::error::DbError;
use crate::models::NewUser;
use crate::repository::UserRepository;
use crate::session::Session;

/// Outcome of a seeding run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub inserted: u64,
    /// Rows skipped because their email already exists
    pub skipped: u64,
}

/// Parse `name,email,age` rows (with a header line)
pub fn read_users_csv<R: Read>(reader: R) -> Result<Vec<NewUser>, DbError> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let users = csv_reader
        .deserialize::<NewUser>()
        .collect::<Result<Vec<_>, _>>()?;

    debug!("Parsed {} users from CSV", users.len());
    Ok(users)
}

impl UserRepository {
    /// Insert users whose email is not present yet
    ///
    /// Runs on the caller's session; wrap it in a transaction to make the
    /// import all-or-nothing.
    pub async fn import_users(
        &self,
        session: &mut dyn Session,
        users: &[NewUser],
    ) -> Result<SeedReport, DbError> {
        let mut report = SeedReport::default();

        for user in users {
            match self.insert_user(session, user.clone()).await {
                Ok(_) => report.inserted += 1,
                Err(DbError::Duplicate(msg)) => {
                    debug!("Skipping row: {}", msg);
                    report.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            "Imported {} users into {} ({} duplicates skipped)",
            report.inserted,
            self.table(),
            report.skipped
        );
        Ok(report)
    }
}
