//! Cache stage

use async_trait::async_trait;
use querylane_db::{DbError, Session, Value};
use std::sync::Arc;
use tracing::debug;

use super::fingerprint::QueryFingerprint;
use super::store::ResultCache;
use crate::operation::Operation;

/// Stage that answers from the cache and stores results on a miss
///
/// On a hit the inner operation is not invoked at all.
pub struct Cached<O> {
    inner: O,
    cache: Arc<ResultCache>,
    fingerprint: QueryFingerprint,
}

impl<O> Cached<O> {
    pub fn new(inner: O, cache: Arc<ResultCache>, fingerprint: QueryFingerprint) -> Self {
        Self {
            inner,
            cache,
            fingerprint,
        }
    }

    pub fn fingerprint(&self) -> &QueryFingerprint {
        &self.fingerprint
    }
}

#[async_trait]
impl<O> Operation for Cached<O>
where
    O: Operation,
    O::Output: Clone + Sync + 'static,
{
    type Output = O::Output;

    async fn call(&self, session: &mut dyn Session) -> Result<O::Output, DbError> {
        if let Some(cached) = self.cache.get::<O::Output>(&self.fingerprint) {
            debug!("[CACHE HIT] Returning cached result for {}", self.fingerprint);
            return Ok(cached);
        }

        debug!("[CACHE MISS] Executing query {}", self.fingerprint);
        let output = self.inner.call(session).await?;
        self.cache.insert(self.fingerprint.clone(), output.clone());
        Ok(output)
    }

    fn query(&self) -> Option<&str> {
        self.inner.query()
    }

    fn params(&self) -> &[Value] {
        self.inner.params()
    }
}
