//! Result cache for extracted audio payloads.
//!
//! Successful extractions are stored in memory keyed by media identifier with
//! a fixed (non-sliding) time-to-live. Expired entries are dropped lazily on
//! lookup and by a periodic sweep driven from `main`. There is no capacity
//! bound beyond TTL eviction; within the TTL window growth is unbounded.

use bytes::Bytes;
use dashmap::DashMap;
use std::{
    hash::Hash,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::debug;

/// Cache for audio payloads, keyed by media identifier.
pub type AudioCache = TtlCache<String, Bytes>;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V) -> Self {
        Self {
            value,
            inserted_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() > ttl
    }
}

/// Map with per-entry expiry. The TTL is fixed at construction and counts
/// from insertion, never from last access. Entries are immutable once
/// written; a re-insert after expiry fully replaces the old payload.
#[derive(Debug)]
pub struct TtlCache<K: Clone + Eq + Hash, V> {
    data: Arc<DashMap<K, CacheEntry<V>>>,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Lookup with lazy expiry: an entry past its TTL is removed and treated
    /// as absent.
    pub fn get(&self, key: &K) -> Option<V> {
        if let Some(entry) = self.data.get(key) {
            if entry.is_expired(self.ttl) {
                drop(entry);
                self.data.remove(key);
                None
            } else {
                Some(entry.value.clone())
            }
        } else {
            None
        }
    }

    pub fn insert(&self, key: K, value: V) {
        self.data.insert(key, CacheEntry::new(value));
    }

    /// Removes every entry unconditionally and reports how many were evicted.
    pub fn clear(&self) -> usize {
        let removed = self.data.len();
        self.data.clear();
        removed
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Sweeps expired entries and returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let ttl = self.ttl;
        let stale: Vec<K> = self
            .data
            .iter()
            .filter_map(|entry| {
                if entry.value().is_expired(ttl) {
                    Some(entry.key().clone())
                } else {
                    None
                }
            })
            .collect();

        let mut removed = 0;
        for key in stale {
            if self.data.remove(&key).is_some() {
                removed += 1;
            }
        }

        if removed > 0 {
            debug!("🧹 Cache sweep removed {} expired entries", removed);
        }

        removed
    }
}

impl<K, V> Clone for TtlCache<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            ttl: self.ttl,
        }
    }
}
