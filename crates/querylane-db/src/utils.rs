//! Shared utility functions

use crate::error::DbError;

/// Validate a table name before it is interpolated into SQL
///
/// Table names cannot be bound as parameters, so only plain identifiers
/// (ASCII letters, digits and underscores, not starting with a digit) are
/// accepted.
///
/// # Examples
///
/// ```
/// use querylane_db::utils::validate_identifier;
///
/// assert!(validate_identifier("user_data").is_ok());
/// assert!(validate_identifier("users; DROP TABLE users").is_err());
/// ```
pub fn validate_identifier(name: &str) -> Result<&str, DbError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid && name.len() <= 64 {
        Ok(name)
    } else {
        Err(DbError::InvalidIdentifier(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("user_data").is_ok());
        assert!(validate_identifier("_users2").is_ok());

        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("2users").is_err());
        assert!(validate_identifier("user-data").is_err());
        assert!(validate_identifier("users WHERE 1=1").is_err());
        assert!(validate_identifier(&"a".repeat(65)).is_err());
    }
}
