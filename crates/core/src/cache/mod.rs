//! In-memory memoization of expensive derived values.
//!
//! Keys are canonicalized from structured lookup values before hashing:
//! serde_json keeps object members sorted, so two structurally-equal lookups
//! map to the same entry regardless of field insertion order. Expiry is
//! enforced on every read; a full sweep additionally runs once per
//! [`CLEANUP_BATCH_THRESHOLD`] inserts, which keeps cleanup cost
//! proportional to insert volume without a background timer.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::warn;
use serde::Serialize;

use crate::clock::Clock;
use crate::errors::Result;

/// TTL applied when `set` is called without an explicit one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Every this-many inserts, sweep the whole store for expired entries.
const CLEANUP_BATCH_THRESHOLD: usize = 50;

/// Canonical cache key for a structured lookup value.
///
/// serde_json's map type is ordered, so object fields serialize sorted and
/// key identity is independent of field insertion order.
pub fn canonical_key<K: Serialize>(key: &K) -> Result<String> {
    let value = serde_json::to_value(key)?;
    Ok(value.to_string())
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: DateTime<Utc>,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.stored_at);
        age > chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX)
    }
}

/// Diagnostic snapshot of the cache contents.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub keys: Vec<String>,
}

/// Keyed store with per-entry TTL and amortized cleanup.
pub struct TtlCache<V> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_default_ttl(DEFAULT_TTL, clock)
    }

    pub fn with_default_ttl(default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
            clock,
        }
    }

    /// Cached value for `key`, or None. A logically-expired entry is never
    /// returned, even when the amortized sweep has not run yet; it is
    /// removed on the spot.
    pub fn get<K: Serialize>(&self, key: &K) -> Option<V> {
        let key = match canonical_key(key) {
            Ok(key) => key,
            Err(e) => {
                warn!("Unserializable cache key, treating as miss: {}", e);
                return None;
            }
        };

        let now = self.clock.now();
        let mut entries = self.entries.write().unwrap();
        let expired = entries.get(&key).is_some_and(|entry| entry.is_expired(now));
        if expired {
            entries.remove(&key);
            return None;
        }
        entries.get(&key).map(|entry| entry.value.clone())
    }

    /// Store `value` under `key` with the default TTL.
    pub fn set<K: Serialize>(&self, key: &K, value: V) {
        self.set_with_ttl(key, value, self.default_ttl)
    }

    /// Store `value` under `key`. Once the store size reaches a multiple of
    /// the cleanup threshold, all expired entries are swept.
    pub fn set_with_ttl<K: Serialize>(&self, key: &K, value: V, ttl: Duration) {
        let key = match canonical_key(key) {
            Ok(key) => key,
            Err(e) => {
                warn!("Unserializable cache key, dropping set: {}", e);
                return;
            }
        };

        let now = self.clock.now();
        let mut entries = self.entries.write().unwrap();
        entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: now,
                ttl,
            },
        );

        if entries.len() % CLEANUP_BATCH_THRESHOLD == 0 {
            entries.retain(|_, entry| !entry.is_expired(now));
        }
    }

    /// Remove one entry; returns whether it existed.
    pub fn remove<K: Serialize>(&self, key: &K) -> bool {
        let Ok(key) = canonical_key(key) else {
            return false;
        };
        self.entries.write().unwrap().remove(&key).is_some()
    }

    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }

    /// Manual full sweep; returns the number of entries removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.read().unwrap();
        CacheStats {
            size: entries.len(),
            keys: entries.keys().cloned().collect(),
        }
    }
}
