//! Cache keys derived from query text

use querylane_db::Value;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Error type for parsing a fingerprint mode
#[derive(Debug, Clone)]
pub struct ParseFingerprintModeError(String);

impl fmt::Display for ParseFingerprintModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid fingerprint mode: {}", self.0)
    }
}

impl std::error::Error for ParseFingerprintModeError {}

/// What goes into a cache key
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintMode {
    /// The raw query text only. The same query with different parameters
    /// shares one entry.
    #[default]
    Query,
    /// Query text plus bound parameters
    QueryAndParams,
}

impl FingerprintMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FingerprintMode::Query => "query",
            FingerprintMode::QueryAndParams => "query_and_params",
        }
    }
}

impl FromStr for FingerprintMode {
    type Err = ParseFingerprintModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "query" => Ok(FingerprintMode::Query),
            "query_and_params" => Ok(FingerprintMode::QueryAndParams),
            _ => Err(ParseFingerprintModeError(s.to_string())),
        }
    }
}

/// Cache key for one query
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryFingerprint {
    key: String,
}

impl QueryFingerprint {
    pub fn new(mode: FingerprintMode, query: &str, params: &[Value]) -> Self {
        let key = match mode {
            FingerprintMode::Query => query.to_string(),
            FingerprintMode::QueryAndParams => {
                let params: Vec<String> = params.iter().map(|p| format!("{:?}", p)).collect();
                format!("{}\u{1f}[{}]", query, params.join(","))
            }
        };
        Self { key }
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Short SHA256 prefix of the key, for log lines
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.key.as_bytes());
        hex::encode(&hasher.finalize()[..6])
    }
}

impl fmt::Display for QueryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.digest())
    }
}
