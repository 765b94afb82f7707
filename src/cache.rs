//! Caller-owned cache of computed indicator columns.
//!
//! The cache never reads the system clock: every call takes `now`, so the
//! same sequence of calls always expires the same entries. Each backtest (or
//! sweep) owns its cache; nothing is shared process-wide.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone)]
struct CacheEntry {
    values: Arc<[f64]>,
    inserted_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.inserted_at > ttl
    }
}

/// Indicator columns keyed by name, each valid for `ttl` after insertion.
///
/// ### Example
/// ```rust
/// use crypto_bts::cache::IndicatorCache;
/// use chrono::{DateTime, Duration};
///
/// let now = DateTime::default();
/// let mut cache = IndicatorCache::new(Duration::minutes(5));
/// let ema = cache.get_or_insert_with("BTCUSDT:1h:ema_21", now, || vec![1.0, 2.0]);
/// assert_eq!(&ema[..], &[1.0, 2.0]);
/// assert!(cache.get("BTCUSDT:1h:ema_21", now + Duration::minutes(6)).is_none());
/// ```
#[derive(Debug, Clone)]
pub struct IndicatorCache {
    entries: HashMap<String, CacheEntry>,
    ttl: Duration,
}

impl IndicatorCache {
    /// Creates an empty cache whose entries live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Returns the time-to-live of entries.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the column cached under `key` if it has not expired at `now`.
    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<Arc<[f64]>> {
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired(now, self.ttl))
            .map(|entry| Arc::clone(&entry.values))
    }

    /// Stores `values` under `key`, replacing any previous entry.
    pub fn insert(&mut self, key: impl Into<String>, values: impl Into<Arc<[f64]>>, now: DateTime<Utc>) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                values: values.into(),
                inserted_at: now,
            },
        );
    }

    /// Returns the cached column, computing and storing it when missing or
    /// expired.
    pub fn get_or_insert_with<F>(&mut self, key: &str, now: DateTime<Utc>, compute: F) -> Arc<[f64]>
    where
        F: FnOnce() -> Vec<f64>,
    {
        if let Some(values) = self.get(key, now) {
            return values;
        }
        let values: Arc<[f64]> = compute().into();
        self.insert(key, Arc::clone(&values), now);
        values
    }

    /// Drops every entry expired at `now` and returns how many were removed.
    pub fn cleanup(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, entry| !entry.is_expired(now, ttl));
        before - self.entries.len()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
