//! In-memory TTL cache for pipeline responses.
//!
//! Keyed by operation name plus its parameters. An entry older than the TTL is
//! reported as `Stale` together with its age; the caller decides whether that
//! is acceptable. Nothing is written to disk.

use crate::data::TimeSeriesTable;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub operation: &'static str,
    pub params: String,
}

impl CacheKey {
    pub fn new(operation: &'static str, params: impl Into<String>) -> Self {
        Self {
            operation,
            params: params.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    Table(TimeSeriesTable),
    Rate(f64),
    Returns(Vec<f64>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub value: CachedValue,
    /// Provider that produced the value.
    pub source: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Fresh(CacheEntry),
    Stale { entry: CacheEntry, age: Duration },
    Miss,
}

#[derive(Debug)]
pub struct ResponseCache {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, (CacheEntry, Instant)>>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &CacheKey) -> CacheLookup {
        self.get_at(key, Instant::now())
    }

    fn get_at(&self, key: &CacheKey, now: Instant) -> CacheLookup {
        let entries = self.lock();
        match entries.get(key) {
            None => {
                debug!(operation = key.operation, params = %key.params, "cache miss");
                CacheLookup::Miss
            }
            Some((entry, stored_at)) => {
                let age = now.saturating_duration_since(*stored_at);
                if age < self.ttl {
                    debug!(operation = key.operation, params = %key.params, "cache hit");
                    CacheLookup::Fresh(entry.clone())
                } else {
                    debug!(
                        operation = key.operation,
                        params = %key.params,
                        age_secs = age.as_secs(),
                        "cache entry expired"
                    );
                    CacheLookup::Stale {
                        entry: entry.clone(),
                        age,
                    }
                }
            }
        }
    }

    pub fn put(&self, key: CacheKey, value: CachedValue, source: impl Into<String>) {
        let entry = CacheEntry {
            value,
            source: source.into(),
        };
        self.lock().insert(key, (entry, Instant::now()));
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    // A panic while holding the lock leaves the map itself intact.
    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, (CacheEntry, Instant)>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
