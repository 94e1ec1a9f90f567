//! # Multi-Tier Block State Cache
//!
//! Three tiers keep speculative state cheap and ordered by block ancestry:
//!
//! - `TransactionCache`: thread-local to one transaction execution
//! - `BlockCache`: all writes of one in-flight block
//! - `StateCache`: global, keyed by block hash with an explicit
//!   `block_hash → prev_block_hash` chain for ancestor reads
//!
//! Values are cloned at every tier boundary, so a caller mutating what it
//! read can never leak into shared storage. Reads never fail; absence is an
//! `Option`.

pub mod block;
pub mod state;
pub mod transaction;

pub use block::{Block, BlockCache};
pub use state::{CacheConfig, CacheStats, StateCache};
pub use transaction::TransactionCache;

use std::sync::Arc;

/// One cached entry: the value (already cloned in), a tombstone marker and
/// the round it was written at.
#[derive(Clone, Debug)]
pub(crate) struct CachedValue<V> {
    pub data: Option<V>,
    pub deleted: bool,
    pub round: i64,
}

/// Convenience constructor for the common per-block setup: a block cache
/// and a transaction cache nested inside it.
pub fn new_block_txn_caches<V: Clone>(
    state: Arc<StateCache<V>>,
    block: Block,
) -> (Arc<BlockCache<V>>, TransactionCache<V>) {
    let block_cache = Arc::new(BlockCache::new(state, block));
    let txn_cache = TransactionCache::new(Arc::clone(&block_cache));
    (block_cache, txn_cache)
}
