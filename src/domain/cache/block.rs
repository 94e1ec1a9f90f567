//! # Block Cache
//!
//! Pre-commit cache for all state changes inside one block. Reads consult
//! this block's own writes first; misses fall through to the global cache
//! **keyed by the previous block's hash**, so a block in progress never
//! observes its own uncommitted state through the global path.

use crate::domain::cache::state::StateCache;
use crate::domain::cache::CachedValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// The block identity a cache is scoped to. The hash may arrive late,
/// after the block is assembled.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub round: i64,
    pub hash: String,
    pub prev_hash: String,
}

struct BlockCacheInner<V> {
    entries: HashMap<String, CachedValue<V>>,
    block_hash: String,
    prev_block_hash: String,
}

/// Per-block write-through cache in front of a shared `StateCache`.
pub struct BlockCache<V> {
    main: Arc<StateCache<V>>,
    inner: RwLock<BlockCacheInner<V>>,
    round: i64,
    hits: AtomicI64,
    misses: AtomicI64,
}

impl<V: Clone> BlockCache<V> {
    pub fn new(main: Arc<StateCache<V>>, block: Block) -> Self {
        Self {
            main,
            inner: RwLock::new(BlockCacheInner {
                entries: HashMap::new(),
                block_hash: block.hash,
                prev_block_hash: block.prev_hash,
            }),
            round: block.round,
            hits: AtomicI64::new(0),
            misses: AtomicI64::new(0),
        }
    }

    pub fn round(&self) -> i64 {
        self.round
    }

    /// Record a write; the value is cloned in.
    pub fn set(&self, key: &str, value: &V) {
        self.write().entries.insert(
            key.to_string(),
            CachedValue {
                data: Some(value.clone()),
                deleted: false,
                round: self.round,
            },
        );
    }

    /// Read through this block: own writes first (tombstones end the
    /// lookup), then the global cache as of the previous block.
    pub fn get(&self, key: &str) -> Option<V> {
        let guard = self.read();
        if let Some(entry) = guard.entries.get(key) {
            if entry.deleted {
                return None;
            }
            return entry.data.clone();
        }
        let prev = guard.prev_block_hash.clone();
        drop(guard);
        self.main.get(key, &prev)
    }

    /// Mark a key deleted for this block.
    pub fn remove(&self, key: &str) {
        let mut guard = self.write();
        let round = self.round;
        guard
            .entries
            .entry(key.to_string())
            .and_modify(|entry| entry.deleted = true)
            .or_insert(CachedValue {
                data: None,
                deleted: true,
                round,
            });
    }

    /// The block hash becomes known once the block is assembled.
    pub fn set_block_hash(&self, hash: &str) {
        self.write().block_hash = hash.to_string();
    }

    pub fn block_hash(&self) -> String {
        self.read().block_hash.clone()
    }

    /// Merge this block's entries into the global cache. The state cache
    /// accepts the first commit per block hash; replays are no-ops either
    /// way, and the local entries are cleared.
    pub fn commit(&self) {
        let (entries, block_hash, prev_hash) = {
            let mut guard = self.write();
            let entries: Vec<(String, CachedValue<V>)> = guard.entries.drain().collect();
            (entries, guard.block_hash.clone(), guard.prev_block_hash.clone())
        };
        debug!(block_hash = %block_hash, count = entries.len(), "committing block cache");
        self.main.commit_block(
            &block_hash,
            &prev_hash,
            entries,
            self.hits.swap(0, Ordering::Relaxed),
            self.misses.swap(0, Ordering::Relaxed),
        );
    }

    pub fn stats(&self) -> (i64, i64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    pub(crate) fn set_value(&self, key: &str, value: CachedValue<V>) {
        self.write().entries.insert(key.to_string(), value);
    }

    pub(crate) fn add_stats(&self, hits: i64, misses: i64) {
        self.hits.fetch_add(hits, Ordering::Relaxed);
        self.misses.fetch_add(misses, Ordering::Relaxed);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BlockCacheInner<V>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BlockCacheInner<V>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}
