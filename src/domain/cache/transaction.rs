//! # Transaction Cache
//!
//! Thread-local to one transaction execution. Writes become visible to
//! reads on the same cache immediately; other transactions sharing the
//! block cache see them only after `commit`, last committer winning at the
//! key level.

use crate::domain::cache::block::BlockCache;
use crate::domain::cache::CachedValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

/// Per-transaction write buffer nested inside exactly one block cache.
pub struct TransactionCache<V> {
    parent: Arc<BlockCache<V>>,
    entries: Mutex<HashMap<String, CachedValue<V>>>,
    round: i64,
    hits: AtomicI64,
    misses: AtomicI64,
}

impl<V: Clone> TransactionCache<V> {
    pub fn new(parent: Arc<BlockCache<V>>) -> Self {
        let round = parent.round();
        Self {
            parent,
            entries: Mutex::new(HashMap::new()),
            round,
            hits: AtomicI64::new(0),
            misses: AtomicI64::new(0),
        }
    }

    /// Record a write; the value is cloned in.
    pub fn set(&self, key: &str, value: &V) {
        self.lock().insert(
            key.to_string(),
            CachedValue {
                data: Some(value.clone()),
                deleted: false,
                round: self.round,
            },
        );
    }

    /// Own writes first (immediately visible), then the parent block.
    pub fn get(&self, key: &str) -> Option<V> {
        if let Some(entry) = self.lock().get(key) {
            if entry.deleted {
                return None;
            }
            return entry.data.clone();
        }
        self.parent.get(key)
    }

    /// Mark a key deleted for this transaction.
    pub fn remove(&self, key: &str) {
        let round = self.round;
        self.lock()
            .entry(key.to_string())
            .and_modify(|entry| entry.deleted = true)
            .or_insert(CachedValue {
                data: None,
                deleted: true,
                round,
            });
    }

    /// Push every entry up into the block cache and merge the counters.
    pub fn commit(&self) {
        let drained: Vec<(String, CachedValue<V>)> = self.lock().drain().collect();
        for (key, value) in drained {
            self.parent.set_value(&key, value);
        }
        self.parent.add_stats(
            self.hits.swap(0, Ordering::Relaxed),
            self.misses.swap(0, Ordering::Relaxed),
        );
    }

    pub fn add_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> (i64, i64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CachedValue<V>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
