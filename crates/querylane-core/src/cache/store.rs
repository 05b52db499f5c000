//! In-memory result cache

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use super::fingerprint::QueryFingerprint;

/// Cache statistics
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entry_count: u64,
    pub hit_count: u64,
    pub miss_count: u64,
}

struct CacheEntry {
    value: Arc<dyn Any + Send + Sync>,
    cached_at: DateTime<Utc>,
}

/// Fingerprint → result cache shared by every caller holding the `Arc`
///
/// Entries are never evicted or expired, and writes through the executor do
/// not invalidate them: a cached read keeps returning the same rows after the
/// table changes until [`ResultCache::invalidate`] or [`ResultCache::clear`]
/// is called. Concurrent misses on one fingerprint may both execute; the last
/// insert wins.
#[derive(Default)]
pub struct ResultCache {
    entries: RwLock<HashMap<QueryFingerprint, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a cached value, recording a hit or miss
    ///
    /// An entry stored with a different type than `T` counts as a miss.
    pub fn get<T>(&self, fingerprint: &QueryFingerprint) -> Option<T>
    where
        T: Clone + 'static,
    {
        let found = {
            let entries = self.entries.read();
            entries.get(fingerprint).and_then(|entry| {
                let value: &(dyn Any + Send + Sync) = &*entry.value;
                value.downcast_ref::<T>().cloned()
            })
        };

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("querylane_cache_hits_total").increment(1);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("querylane_cache_misses_total").increment(1);
        }
        found
    }

    /// Store a value, replacing any previous entry
    pub fn insert<T>(&self, fingerprint: QueryFingerprint, value: T)
    where
        T: Send + Sync + 'static,
    {
        debug!("Caching result for query {}", fingerprint);
        self.entries.write().insert(
            fingerprint,
            CacheEntry {
                value: Arc::new(value),
                cached_at: Utc::now(),
            },
        );
    }

    /// When the entry for `fingerprint` was stored
    pub fn cached_at(&self, fingerprint: &QueryFingerprint) -> Option<DateTime<Utc>> {
        self.entries.read().get(fingerprint).map(|e| e.cached_at)
    }

    pub fn contains(&self, fingerprint: &QueryFingerprint) -> bool {
        self.entries.read().contains_key(fingerprint)
    }

    /// Drop one entry, returning whether it existed
    pub fn invalidate(&self, fingerprint: &QueryFingerprint) -> bool {
        self.entries.write().remove(fingerprint).is_some()
    }

    /// Drop every entry, returning how many there were
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.write();
        let count = entries.len();
        entries.clear();
        info!("Cleared {} cached results", count);
        count
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.len() as u64,
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
        }
    }
}
