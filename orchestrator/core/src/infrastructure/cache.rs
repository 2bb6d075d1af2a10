// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Bounded key/value cache with LRU eviction and optional per-entry TTL.
//!
//! `get` and `set` both promote an entry to most-recently-used. An expired
//! entry is removed on access and reported as a miss. When a new key is
//! inserted into a full cache exactly one entry, the least recently used,
//! is evicted.

use crate::domain::config::CacheConfig;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub max_size: usize,
    pub evictions: u64,
    pub expirations: u64,
    /// hits / (hits + misses); 0.0 before any lookup
    pub hit_rate: f64,
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

struct CacheState<K: Hash + Eq, V> {
    entries: LruCache<K, CacheEntry<V>>,
    counters: Counters,
}

pub struct BoundedCache<K: Hash + Eq, V> {
    state: Mutex<CacheState<K, V>>,
    max_size: usize,
    default_ttl: Option<Duration>,
}

impl<K, V> BoundedCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// A `max_size` of zero is treated as one.
    pub fn new(max_size: usize) -> Self {
        Self::with_default_ttl(max_size, None)
    }

    pub fn with_default_ttl(max_size: usize, default_ttl: Option<Duration>) -> Self {
        let capacity = NonZeroUsize::MIN.saturating_add(max_size.saturating_sub(1));
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                counters: Counters::default(),
            }),
            max_size: capacity.get(),
            default_ttl,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::with_default_ttl(config.max_size, config.default_ttl())
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Look up `key`, promoting it on a hit.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut state = self.state.lock();

        let expired = match state.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                let value = entry.value.clone();
                state.counters.hits += 1;
                metrics::counter!("concord_cache_hits_total").increment(1);
                return Some(value);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            state.entries.pop(key);
            state.counters.expirations += 1;
            trace!("Cache entry expired on access");
        }
        state.counters.misses += 1;
        metrics::counter!("concord_cache_misses_total").increment(1);
        None
    }

    /// Insert or replace `key`. `ttl` falls back to the cache default; a ttl
    /// too large to represent as a deadline never expires.
    pub fn set(&self, key: K, value: V, ttl: Option<Duration>) {
        let expires_at = ttl
            .or(self.default_ttl)
            .and_then(|ttl| Instant::now().checked_add(ttl));
        let mut state = self.state.lock();

        let evicting = !state.entries.contains(&key) && state.entries.len() >= self.max_size;
        let displaced = state.entries.push(key, CacheEntry { value, expires_at });
        if evicting && displaced.is_some() {
            state.counters.evictions += 1;
            trace!(max_size = self.max_size, "Evicted least recently used cache entry");
        }
    }

    /// Returns whether the key was present.
    pub fn delete(&self, key: &K) -> bool {
        self.state.lock().entries.pop(key).is_some()
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    /// Presence check for a live entry; does not change recency or counters.
    pub fn contains(&self, key: &K) -> bool {
        let now = Instant::now();
        self.state
            .lock()
            .entries
            .peek(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every expired entry, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();
        let expired: Vec<K> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.entries.pop(key);
        }
        state.counters.expirations += expired.len() as u64;
        expired.len()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let lookups = state.counters.hits + state.counters.misses;
        CacheStats {
            hits: state.counters.hits,
            misses: state.counters.misses,
            size: state.entries.len(),
            max_size: self.max_size,
            evictions: state.counters.evictions,
            expirations: state.counters.expirations,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                state.counters.hits as f64 / lookups as f64
            },
        }
    }
}

impl<K: Hash + Eq, V> std::fmt::Debug for BoundedCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedCache")
            .field("max_size", &self.max_size)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}
