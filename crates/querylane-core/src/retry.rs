//! Retry policy and the retry stage

use async_trait::async_trait;
use querylane_db::{DbError, Session, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::operation::Operation;

/// Error type for parsing a retry classification
#[derive(Debug, Clone)]
pub struct ParseRetryOnError(String);

impl fmt::Display for ParseRetryOnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid retry classification: {}", self.0)
    }
}

impl std::error::Error for ParseRetryOnError {}

/// Which failures are retried
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetryOn {
    /// Retry every error
    #[default]
    Any,
    /// Retry only lock contention and I/O failures; fail fast on the rest
    Transient,
}

impl RetryOn {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryOn::Any => "any",
            RetryOn::Transient => "transient",
        }
    }

    pub fn should_retry(&self, err: &DbError) -> bool {
        match self {
            RetryOn::Any => true,
            RetryOn::Transient => err.is_transient(),
        }
    }
}

impl FromStr for RetryOn {
    type Err = ParseRetryOnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "any" => Ok(RetryOn::Any),
            "transient" => Ok(RetryOn::Transient),
            _ => Err(ParseRetryOnError(s.to_string())),
        }
    }
}

/// Total attempts and the fixed wait between them
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    retries: u32,
    delay: Duration,
    retry_on: RetryOn,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            delay: Duration::from_secs(1),
            retry_on: RetryOn::Any,
        }
    }
}

impl RetryPolicy {
    /// Create a policy making at most `retries` attempts in total
    ///
    /// A value of zero is raised to one: an operation is always attempted.
    pub fn new(retries: u32, delay: Duration) -> Self {
        let retries = if retries == 0 {
            warn!("retries must be at least 1, using 1");
            1
        } else {
            retries
        };

        Self {
            retries,
            delay,
            retry_on: RetryOn::Any,
        }
    }

    pub fn with_retry_on(mut self, retry_on: RetryOn) -> Self {
        self.retry_on = retry_on;
        self
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn retry_on(&self) -> RetryOn {
        self.retry_on
    }
}

/// Stage that re-invokes the inner operation on failure
pub struct Retry<O> {
    inner: O,
    policy: RetryPolicy,
}

impl<O> Retry<O> {
    pub fn new(inner: O, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<O: Operation> Operation for Retry<O> {
    type Output = O::Output;

    async fn call(&self, session: &mut dyn Session) -> Result<O::Output, DbError> {
        let retries = self.policy.retries;
        let mut attempt = 1;

        loop {
            match self.inner.call(&mut *session).await {
                Ok(output) => {
                    if attempt > 1 {
                        debug!("Succeeded on attempt {}/{}", attempt, retries);
                    }
                    return Ok(output);
                }
                Err(e) if attempt < retries && self.policy.retry_on.should_retry(&e) => {
                    metrics::counter!("querylane_retries_total").increment(1);
                    warn!(
                        "[Retry {}/{}] Error: {}. Retrying in {:?}...",
                        attempt, retries, e, self.policy.delay
                    );
                    tokio::time::sleep(self.policy.delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!("[Retry {}/{}] Error: {}. Giving up", attempt, retries, e);
                    return Err(e);
                }
            }
        }
    }

    fn query(&self) -> Option<&str> {
        self.inner.query()
    }

    fn params(&self) -> &[Value] {
        self.inner.params()
    }
}
