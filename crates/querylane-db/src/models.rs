//! Database models

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

use crate::error::DbError;

/// A single SQL value, either bound as a parameter or decoded from a row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    /// Parse a command-line literal: integers first, then reals, else text.
    /// A literal wrapped in single or double quotes is always text, so
    /// `'007'` keeps its leading zeros.
    pub fn parse_literal(s: &str) -> Self {
        if let Some(text) = unquote(s) {
            Value::Text(text.to_string())
        } else if s.eq_ignore_ascii_case("null") {
            Value::Null
        } else if let Ok(i) = s.parse::<i64>() {
            Value::Integer(i)
        } else if let Ok(f) = s.parse::<f64>() {
            Value::Real(f)
        } else {
            Value::Text(s.to_string())
        }
    }

    /// Numeric view of the value. Text is parsed, so a DECIMAL column
    /// stored as text still reads as a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Real(f) => Some(*f),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Null | Value::Blob(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

fn unquote(s: &str) -> Option<&str> {
    ['\'', '"'].into_iter().find_map(|quote| {
        s.strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
    })
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Text(s) => write!(f, "'{}'", s),
            Value::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// One fetched row: column names paired positionally with values
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    pub columns: Vec<String>,
    pub values: Vec<Value>,
}

impl Record {
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Look up a value by column name
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|idx| self.values.get(idx))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (column, value) in self.columns.iter().zip(&self.values) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// A row of the `user_data` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRow {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub age: f64,
}

/// New user (for insertion); the id is assigned by the repository
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub age: f64,
}

// ==================== TryFrom Implementations ====================

impl TryFrom<&Record> for UserRow {
    type Error = DbError;

    fn try_from(record: &Record) -> Result<Self, Self::Error> {
        // Older tables name the key column `id` and keep it numeric
        let user_id = match record.get("user_id").or_else(|| record.get("id")) {
            Some(Value::Text(s)) => s.clone(),
            Some(Value::Integer(i)) => i.to_string(),
            _ => return Err(DbError::Decode("missing column user_id".to_string())),
        };

        Ok(UserRow {
            user_id,
            name: text_column(record, "name")?,
            email: text_column(record, "email")?,
            age: record
                .get("age")
                .and_then(Value::as_f64)
                .ok_or_else(|| DbError::Decode("column age is not numeric".to_string()))?,
        })
    }
}

fn text_column(record: &Record, column: &str) -> Result<String, DbError> {
    record
        .get(column)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| DbError::Decode(format!("missing text column {}", column)))
}
