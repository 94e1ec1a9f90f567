//! # Global State Cache
//!
//! Two bounded LRU maps: per-key block-version entries and the
//! `block_hash → prev_block_hash` chain. A read probes the exact block
//! first, then walks the chain backwards up to the history depth; a broken
//! link or a tombstone ends the walk empty-handed; the chain is the single
//! authority on ancestry, and a value is never fabricated across a missing
//! link.

use crate::domain::cache::CachedValue;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use tracing::debug;

/// Capacity bounds for the global cache.
#[derive(Clone, Copy, Debug)]
pub struct CacheConfig {
    /// Distinct keys kept.
    pub max_keys: usize,
    /// Block versions kept per key.
    pub versions_per_key: usize,
    /// Ancestor hops a read may take; doubles as the chain capacity.
    pub max_history_depth: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_keys: 100 * 1024,
            versions_per_key: 200,
            max_history_depth: 100,
        }
    }
}

/// Hit/miss/commit counters, merged upward from the lower tiers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: i64,
    pub misses: i64,
    pub commits: i64,
}

struct StateCacheInner<V> {
    values: LruCache<String, LruCache<String, CachedValue<V>>>,
    hash_chain: LruCache<String, String>,
    config: CacheConfig,
}

/// Global block-versioned cache shared by every block in flight.
pub struct StateCache<V> {
    inner: Mutex<StateCacheInner<V>>,
    hits: AtomicI64,
    misses: AtomicI64,
    commits: AtomicI64,
}

impl<V: Clone> Default for StateCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> StateCache<V> {
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    pub fn with_config(config: CacheConfig) -> Self {
        let keys = NonZeroUsize::new(config.max_keys.max(1)).expect("non-zero capacity");
        let depth = NonZeroUsize::new(config.max_history_depth.max(1)).expect("non-zero capacity");
        Self {
            inner: Mutex::new(StateCacheInner {
                values: LruCache::new(keys),
                hash_chain: LruCache::new(depth),
                config,
            }),
            hits: AtomicI64::new(0),
            misses: AtomicI64::new(0),
            commits: AtomicI64::new(0),
        }
    }

    /// Value of `key` as of `block_hash`: the exact block if present,
    /// otherwise the nearest ancestor within the history depth.
    pub fn get(&self, key: &str, block_hash: &str) -> Option<V> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let versions = inner.values.get_mut(key)?;

        if let Some(entry) = versions.get(block_hash) {
            if entry.deleted {
                return None;
            }
            return entry.data.clone();
        }

        let mut hash = block_hash.to_string();
        let mut hops = 0usize;
        loop {
            hops += 1;
            // A missing link means unknown ancestry; never guess across it.
            hash = inner.hash_chain.get(&hash)?.clone();
            if let Some(entry) = versions.get(&hash) {
                if entry.deleted {
                    return None;
                }
                return entry.data.clone();
            }
            if hops >= inner.config.max_history_depth {
                return None;
            }
        }
    }

    /// Forget every block version of a key.
    pub fn remove(&self, key: &str) {
        self.lock().values.pop(key);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn add_stats(&self, hits: i64, misses: i64) {
        self.hits.fetch_add(hits, Ordering::Relaxed);
        self.misses.fetch_add(misses, Ordering::Relaxed);
    }

    /// Install a finished block's entries and its ancestry link in one
    /// atomic step. The first commit for a block hash wins; replays are
    /// no-ops.
    pub(crate) fn commit_block(
        &self,
        block_hash: &str,
        prev_block_hash: &str,
        entries: Vec<(String, CachedValue<V>)>,
        hits: i64,
        misses: i64,
    ) -> bool {
        {
            let mut guard = self.lock();
            let inner = &mut *guard;
            if inner.hash_chain.contains(block_hash) {
                debug!(block_hash, "state cache commit replay ignored");
                return false;
            }
            let versions_cap = NonZeroUsize::new(inner.config.versions_per_key.max(1))
                .expect("non-zero capacity");
            for (key, entry) in entries {
                if !inner.values.contains(&key) {
                    inner.values.put(key.clone(), LruCache::new(versions_cap));
                }
                if let Some(versions) = inner.values.get_mut(&key) {
                    versions.put(block_hash.to_string(), entry);
                }
            }
            inner
                .hash_chain
                .put(block_hash.to_string(), prev_block_hash.to_string());
        }
        self.add_stats(hits, misses);
        self.commits.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StateCacheInner<V>> {
        // A panicked writer can only leave a partially-installed block; the
        // cache stays usable, so recover the guard.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
