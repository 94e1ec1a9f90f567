//! # Weighted Merkle Patricia Trie
//!
//! Persistent 16-ary trie over 64-nibble keys with per-subtree weight
//! accumulators. Mutations run against in-memory nodes; `commit` serializes
//! the dirty spine into an atomic storage batch and can collapse deep
//! subtrees into hash-refs to bound live memory.
//!
//! ## Structural invariants
//!
//! - a branch never keeps a single non-nil child: deletion reduces it back
//!   into the parent path
//! - two short nodes are never adjacent: merges happen on delete
//! - dirty nodes are never persisted
//! - a hash-ref never points at another hash-ref
//!
//! ## Rollback bookkeeping
//!
//! Commits record every persisted hash in `created` and the stale hash of
//! every rewritten node in `pending_deleted`. A hash that is re-created
//! while queued for deletion cancels out of the pending set, so a node the
//! caller can still reach through an older snapshot is never purged.

use crate::domain::errors::TrieError;
use crate::domain::hashing::{empty_state_hash, Hash};
use crate::domain::nibbles::{common_prefix_len, key_to_nibbles};
use crate::domain::wmpt::codec::{decode_node, encode_node};
use crate::domain::wmpt::node::{BranchNode, HashRefNode, Node, ShortNode, ValueNode};
use crate::ports::database::{Batcher, StorageAdapter};
use rayon::prelude::*;
use std::collections::HashSet;
use std::mem;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// External keys are fixed at 32 bytes, expanded to 64 nibbles.
pub const EXTERNAL_KEY_LENGTH: usize = 32;

/// Bounded worker pool shared by parallel commit and proof marking.
pub(crate) const TRIE_WORKERS: usize = 5;

/// Signed weight change; replacement of a value can shrink the total.
type WeightDelta = i64;

pub(crate) fn trie_pool() -> Option<&'static rayon::ThreadPool> {
    static POOL: OnceLock<Option<rayon::ThreadPool>> = OnceLock::new();
    POOL.get_or_init(|| {
        rayon::ThreadPoolBuilder::new()
            .num_threads(TRIE_WORKERS)
            .build()
            .ok()
    })
    .as_ref()
}

/// Weighted Merkle Patricia Trie bound to a storage adapter.
pub struct WeightedMerkleTrie {
    pub(crate) root: Node,
    pub(crate) db: Arc<dyn StorageAdapter>,
    old_root: HashRefNode,
    /// Hashes persisted since the last rollback point.
    created: Vec<Hash>,
    /// Stale hashes of replaced or removed nodes, awaiting `delete_nodes`.
    pending_deleted: Vec<Hash>,
    /// Hashes already purged from storage; rollback must not retry them.
    already_deleted: HashSet<Hash>,
}

impl WeightedMerkleTrie {
    pub fn new(root: Option<Node>, db: Arc<dyn StorageAdapter>) -> Self {
        let root = root.unwrap_or(Node::Nil);
        let old_root = HashRefNode {
            hash: empty_state_hash(),
            weight: 0,
        };
        Self {
            root,
            db,
            old_root,
            created: Vec::new(),
            pending_deleted: Vec::new(),
            already_deleted: HashSet::new(),
        }
    }

    /// Root hash; recalculated if the spine is dirty.
    pub fn root(&mut self) -> Hash {
        self.root.calc_hash()
    }

    /// Total weight of the trie.
    pub fn weight(&self) -> u64 {
        self.root.weight()
    }

    pub fn get_root(&self) -> &Node {
        &self.root
    }

    /// Point the trie at a persisted root.
    pub fn set_root(&mut self, hash: Hash, weight: u64) {
        self.root = if hash == empty_state_hash() {
            Node::Nil
        } else {
            Node::hash_ref(hash, weight)
        };
    }

    /// Snapshot of the current tree for hot reads, collapsed below
    /// `collapse_level` branch generations.
    pub fn copy_root(&mut self, collapse_level: usize) -> Node {
        self.root.calc_hash();
        self.root.copy_root(collapse_level)
    }

    // =========================================================================
    // MUTATION
    // =========================================================================

    /// Insert or replace the value under a 32-byte key. An empty value is a
    /// delete.
    pub fn update(&mut self, key: &[u8], value: &[u8], weight: u64) -> Result<(), TrieError> {
        if key.len() != EXTERNAL_KEY_LENGTH {
            return Err(TrieError::InvalidKey {
                expected: EXTERNAL_KEY_LENGTH,
                actual: key.len(),
            });
        }
        if value.is_empty() {
            return self.delete(key).map(|_| ());
        }
        self.put(&key_to_nibbles(key), value.to_vec(), weight)
    }

    /// Nibble-key form of `update`; the building block the external API
    /// expands into.
    pub fn put(&mut self, key_nibbles: &[u8], value: Vec<u8>, weight: u64) -> Result<(), TrieError> {
        let mut root = mem::take(&mut self.root);
        let result = put_in(&self.db, &mut root, key_nibbles, value, weight);
        self.root = root;
        result.map(|_| ())
    }

    /// Delete a 32-byte key, returning the weight it carried.
    pub fn delete(&mut self, key: &[u8]) -> Result<u64, TrieError> {
        if key.len() != EXTERNAL_KEY_LENGTH {
            return Err(TrieError::InvalidKey {
                expected: EXTERNAL_KEY_LENGTH,
                actual: key.len(),
            });
        }
        self.delete_nibbles(&key_to_nibbles(key))
    }

    /// Nibble-key form of `delete`.
    pub fn delete_nibbles(&mut self, key_nibbles: &[u8]) -> Result<u64, TrieError> {
        let mut root = mem::take(&mut self.root);
        let result = delete_in(&self.db, &mut root, key_nibbles, &mut self.pending_deleted);
        self.root = root;
        result
    }

    /// Fetch the value under a 32-byte key, resolving persisted subtrees on
    /// the way down.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>, TrieError> {
        if key.len() != EXTERNAL_KEY_LENGTH {
            return Err(TrieError::InvalidKey {
                expected: EXTERNAL_KEY_LENGTH,
                actual: key.len(),
            });
        }
        get_at(&self.db, &self.root, &key_to_nibbles(key))
    }

    /// Nibble-key form of `get`.
    pub fn get_nibbles(&self, key_nibbles: &[u8]) -> Result<Vec<u8>, TrieError> {
        get_at(&self.db, &self.root, key_nibbles)
    }

    // =========================================================================
    // COMMIT / ROLLBACK
    // =========================================================================

    /// Remember the current root as the rollback point. Opens a fresh
    /// window: only hashes persisted after this survive a rollback purge.
    pub fn save_root(&mut self) {
        let hash = self.root.calc_hash();
        self.old_root = HashRefNode {
            hash,
            weight: self.root.weight(),
        };
        self.created.clear();
    }

    /// Restore the saved root and purge every hash persisted since.
    pub fn rollback(&mut self) -> Result<(), TrieError> {
        warn!(created = self.created.len(), "rolling back trie to saved root");
        let target = self.old_root;
        self.reset_to(target)
    }

    /// Catastrophic rollback to an arbitrary persisted root.
    pub fn rollback_trie(&mut self, target_hash: Hash, target_weight: u64) -> Result<(), TrieError> {
        warn!(created = self.created.len(), "rolling back trie to explicit root");
        self.reset_to(HashRefNode {
            hash: target_hash,
            weight: target_weight,
        })
    }

    fn reset_to(&mut self, target: HashRefNode) -> Result<(), TrieError> {
        self.root = if target.hash == empty_state_hash() {
            Node::Nil
        } else {
            Node::HashRef(target)
        };
        if !self.created.is_empty() {
            let mut batch = self.db.new_batch();
            for hash in &self.created {
                if !self.already_deleted.contains(hash) {
                    batch.delete(hash)?;
                }
            }
            batch.commit(false)?;
        }
        self.created.clear();
        self.pending_deleted.clear();
        Ok(())
    }

    /// Flush accumulated tombstones in one atomic batch and rotate them into
    /// the already-deleted set so a later rollback cannot retry them.
    pub fn delete_nodes(&mut self) -> Result<(), TrieError> {
        if self.pending_deleted.is_empty() {
            return Ok(());
        }
        let mut batch = self.db.new_batch();
        for hash in &self.pending_deleted {
            batch.delete(hash)?;
        }
        batch.commit(false)?;
        debug!(count = self.pending_deleted.len(), "flushed trie tombstones");
        let flushed = mem::take(&mut self.pending_deleted);
        self.created.retain(|h| !flushed.contains(h));
        self.already_deleted.extend(flushed);
        Ok(())
    }

    /// Serialize the dirty spine into a storage batch, collapsing subtrees
    /// below `collapse_level` branch generations into hash-refs. The batch
    /// is returned unwritten; the caller picks the durability mode. The 16
    /// top-level children are committed on a bounded worker pool.
    pub fn commit(&mut self, collapse_level: usize) -> Result<Box<dyn Batcher>, TrieError> {
        let mut batch = self.db.new_batch();
        let root = mem::take(&mut self.root);
        let mut puts: Vec<(Hash, Vec<u8>)> = Vec::new();
        let mut stale: Vec<Hash> = Vec::new();

        let committed = match root {
            Node::Branch(mut b) if b.dirty => {
                push_stale(&mut stale, b.hash);
                let children = mem::replace(&mut b.children, std::array::from_fn(|_| Node::Nil));
                let tasks: Vec<(usize, Node)> = children.into_iter().enumerate().collect();

                let run = |(i, child): (usize, Node)| {
                    let mut child_puts = Vec::new();
                    let mut child_stale = Vec::new();
                    let node = commit_node(child, collapse_level, 1, &mut child_puts, &mut child_stale);
                    (i, node, child_puts, child_stale)
                };
                let results: Vec<_> = match trie_pool() {
                    Some(pool) => pool.install(|| tasks.into_par_iter().map(run).collect()),
                    None => tasks.into_iter().map(run).collect(),
                };
                for (i, node, child_puts, child_stale) in results {
                    b.children[i] = node;
                    puts.extend(child_puts);
                    stale.extend(child_stale);
                }

                let mut node = Node::Branch(b);
                let hash = node.calc_hash();
                puts.push((hash, encode_node(&node)));
                if collapse_level == 0 {
                    Node::hash_ref(hash, node.weight())
                } else {
                    node
                }
            }
            other => commit_node(other, collapse_level, 0, &mut puts, &mut stale),
        };
        self.root = committed;

        debug!(
            nodes = puts.len(),
            collapse_level, "committing weighted trie batch"
        );
        for (hash, bytes) in puts {
            batch.put(&hash, &bytes)?;
            // A hash queued for deletion that reappears here was re-created
            // with identical content; deleting it would orphan live state.
            self.pending_deleted.retain(|h| h != &hash);
            self.created.push(hash);
        }
        stale.retain(|h| !self.created.contains(h));
        self.pending_deleted.extend(stale);
        Ok(batch)
    }
}

fn push_stale(stale: &mut Vec<Hash>, hash: Hash) {
    // A freshly built node still carries the empty-state placeholder; there
    // is nothing persisted to tombstone.
    if hash != empty_state_hash() {
        stale.push(hash);
    }
}

pub(crate) fn resolve(db: &Arc<dyn StorageAdapter>, node: &HashRefNode) -> Result<Node, TrieError> {
    let bytes = db.get(&node.hash)?;
    let loaded = decode_node(&bytes)?;
    debug_assert!(
        !matches!(loaded, Node::HashRef(_)),
        "hash ref resolved to another hash ref"
    );
    Ok(loaded)
}

// =============================================================================
// RECURSIVE OPERATIONS
// =============================================================================

/// Build the tail of a path: a bare leaf when the key is exhausted, a short
/// wrapping the leaf otherwise.
fn leaf_for(key: &[u8], value: Vec<u8>, weight: u64) -> Node {
    let leaf = Node::Value(ValueNode::new(value, weight));
    if key.is_empty() {
        leaf
    } else {
        Node::Short(ShortNode::new(key.to_vec(), leaf))
    }
}

fn put_in(
    db: &Arc<dyn StorageAdapter>,
    node: &mut Node,
    key: &[u8],
    value: Vec<u8>,
    weight: u64,
) -> Result<WeightDelta, TrieError> {
    match node {
        Node::Nil => {
            *node = leaf_for(key, value, weight);
            Ok(weight as WeightDelta)
        }
        Node::Value(v) => {
            debug_assert!(key.is_empty(), "value leaf reached with key remainder");
            if v.value == value && v.weight == weight {
                // Identical write: leave the node clean.
                return Ok(0);
            }
            let delta = weight as WeightDelta - v.weight as WeightDelta;
            v.value = value;
            v.weight = weight;
            v.dirty = true;
            Ok(delta)
        }
        Node::Branch(b) => {
            debug_assert!(!key.is_empty(), "branch reached with exhausted key");
            let idx = key[0] as usize;
            let delta = put_in(db, &mut b.children[idx], &key[1..], value, weight)?;
            b.weight = (b.weight as WeightDelta + delta) as u64;
            b.dirty = true;
            Ok(delta)
        }
        Node::Short(s) => {
            let p = common_prefix_len(&s.key, key);
            if p == s.key.len() {
                let delta = put_in(db, &mut s.child, &key[p..], value, weight)?;
                s.dirty = true;
                return Ok(delta);
            }
            // Split at the divergence point: a branch takes over, with the
            // short's remainder and the new leaf hung at their nibbles.
            debug_assert!(p < key.len(), "key exhausted inside a short prefix");
            let Node::Short(old) = mem::take(node) else {
                unreachable!()
            };
            let old_idx = old.key[p] as usize;
            let new_idx = key[p] as usize;
            let old_rest = old.key[p + 1..].to_vec();
            let old_child = *old.child;
            let old_side = if old_rest.is_empty() {
                old_child
            } else {
                Node::Short(ShortNode::new(old_rest, old_child))
            };

            let mut branch = BranchNode::new();
            branch.weight = old_side.weight() + weight;
            branch.children[old_idx] = old_side;
            branch.children[new_idx] = leaf_for(&key[p + 1..], value, weight);
            let branch_node = Node::Branch(Box::new(branch));

            *node = if p > 0 {
                Node::Short(ShortNode::new(key[..p].to_vec(), branch_node))
            } else {
                branch_node
            };
            Ok(weight as WeightDelta)
        }
        Node::HashRef(h) => {
            let loaded = resolve(db, h)?;
            *node = loaded;
            put_in(db, node, key, value, weight)
        }
    }
}

fn delete_in(
    db: &Arc<dyn StorageAdapter>,
    node: &mut Node,
    key: &[u8],
    pending: &mut Vec<Hash>,
) -> Result<u64, TrieError> {
    match node {
        Node::Nil => Err(TrieError::KeyNotFound),
        Node::Value(v) => {
            if !key.is_empty() {
                return Err(TrieError::KeyNotFound);
            }
            push_stale(pending, v.hash);
            let removed = v.weight;
            *node = Node::Nil;
            Ok(removed)
        }
        Node::Short(s) => {
            let p = common_prefix_len(&s.key, key);
            if p != s.key.len() {
                return Err(TrieError::KeyNotFound);
            }
            let removed = delete_in(db, &mut s.child, &key[p..], pending)?;
            if s.child.is_nil() {
                push_stale(pending, s.hash);
                *node = Node::Nil;
                return Ok(removed);
            }
            s.dirty = true;
            // Path compression: a short returning from below merges into
            // this one so two shorts are never adjacent.
            if matches!(*s.child, Node::Short(_)) {
                let Node::Short(inner) = mem::take(&mut *s.child) else {
                    unreachable!()
                };
                s.key.extend_from_slice(&inner.key);
                s.child = inner.child;
            }
            Ok(removed)
        }
        Node::Branch(b) => {
            if key.is_empty() {
                return Err(TrieError::KeyNotFound);
            }
            let idx = key[0] as usize;
            let removed = delete_in(db, &mut b.children[idx], &key[1..], pending)?;
            b.weight -= removed;
            b.dirty = true;
            if b.children[idx].is_nil() && b.occupied() == 1 {
                push_stale(pending, b.hash);
                *node = reduce_branch(db, node_take_branch(node), pending)?;
            }
            Ok(removed)
        }
        Node::HashRef(h) => {
            let loaded = resolve(db, h)?;
            *node = loaded;
            delete_in(db, node, key, pending)
        }
    }
}

fn node_take_branch(node: &mut Node) -> Box<BranchNode> {
    match mem::take(node) {
        Node::Branch(b) => b,
        _ => unreachable!("reduce called on a non-branch"),
    }
}

/// Merge a branch's single surviving child back into the parent path. The
/// survivor keeps its subtree; a surviving short absorbs the slot nibble.
fn reduce_branch(
    db: &Arc<dyn StorageAdapter>,
    mut branch: Box<BranchNode>,
    pending: &mut Vec<Hash>,
) -> Result<Node, TrieError> {
    let slot = branch
        .children
        .iter()
        .position(|c| !c.is_nil())
        .unwrap_or_else(|| {
            debug_assert!(false, "branch reduced with no surviving child");
            0
        });
    let mut survivor = mem::take(&mut branch.children[slot]);

    // The survivor's shape decides the merge, so a persisted survivor is
    // loaded. A proof-reconstructed trie may not be able to resolve it; the
    // envelope form is kept in that case and normalizes on the next reload.
    if let Node::HashRef(h) = &survivor {
        match resolve(db, h) {
            Ok(loaded) => {
                if matches!(loaded, Node::Short(_)) {
                    push_stale(pending, h.hash);
                }
                survivor = loaded;
            }
            Err(TrieError::KeyNotFound) => {}
            Err(other) => return Err(other),
        }
    }

    match survivor {
        Node::Short(mut inner) => {
            let mut key = vec![slot as u8];
            key.extend_from_slice(&inner.key);
            inner.key = key;
            inner.dirty = true;
            Ok(Node::Short(inner))
        }
        other => Ok(Node::Short(ShortNode::new(vec![slot as u8], other))),
    }
}

fn get_at(db: &Arc<dyn StorageAdapter>, node: &Node, key: &[u8]) -> Result<Vec<u8>, TrieError> {
    match node {
        Node::Nil => Err(TrieError::KeyNotFound),
        Node::Value(v) => {
            if key.is_empty() {
                Ok(v.value.clone())
            } else {
                Err(TrieError::KeyNotFound)
            }
        }
        Node::Short(s) => {
            let p = common_prefix_len(&s.key, key);
            if p != s.key.len() {
                return Err(TrieError::KeyNotFound);
            }
            get_at(db, &s.child, &key[p..])
        }
        Node::Branch(b) => {
            if key.is_empty() {
                return Err(TrieError::KeyNotFound);
            }
            get_at(db, &b.children[key[0] as usize], &key[1..])
        }
        Node::HashRef(h) => {
            let loaded = resolve(db, h)?;
            get_at(db, &loaded, key)
        }
    }
}

/// Sequential commit of one subtree. Clean nodes are left untouched; dirty
/// nodes are rehashed, serialized and queued, and branches at the collapse
/// level drop their children in favour of a hash-ref.
fn commit_node(
    node: Node,
    collapse_level: usize,
    level: usize,
    puts: &mut Vec<(Hash, Vec<u8>)>,
    stale: &mut Vec<Hash>,
) -> Node {
    if !node.dirty() {
        return node;
    }
    match node {
        Node::Value(v) => {
            push_stale(stale, v.hash);
            let mut node = Node::Value(v);
            let hash = node.calc_hash();
            puts.push((hash, encode_node(&node)));
            node
        }
        Node::Short(mut s) => {
            push_stale(stale, s.hash);
            let child = mem::take(&mut *s.child);
            *s.child = commit_node(child, collapse_level, level, puts, stale);
            let mut node = Node::Short(s);
            let hash = node.calc_hash();
            puts.push((hash, encode_node(&node)));
            node
        }
        Node::Branch(mut b) => {
            push_stale(stale, b.hash);
            for child in b.children.iter_mut() {
                if !child.dirty() {
                    continue;
                }
                let taken = mem::take(child);
                *child = commit_node(taken, collapse_level, level + 1, puts, stale);
            }
            let mut node = Node::Branch(b);
            let hash = node.calc_hash();
            puts.push((hash, encode_node(&node)));
            if level == collapse_level {
                Node::hash_ref(hash, node.weight())
            } else {
                node
            }
        }
        clean => clean,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_db::MemoryDb;
    use crate::domain::hashing::raw_hash;

    fn new_trie() -> WeightedMerkleTrie {
        WeightedMerkleTrie::new(None, Arc::new(MemoryDb::new()))
    }

    fn nib(s: &str) -> Vec<u8> {
        s.bytes().map(|b| b - b'0').collect()
    }

    #[test]
    fn test_empty_trie_root() {
        let mut trie = new_trie();
        assert_eq!(trie.root(), empty_state_hash());
        assert_eq!(trie.weight(), 0);
    }

    #[test]
    fn test_round_trip_weights() {
        let mut trie = new_trie();
        trie.put(&nib("00000"), b"hello".to_vec(), 10).unwrap();
        trie.put(&nib("00200"), b"hi".to_vec(), 9).unwrap();
        trie.put(&nib("00300"), b"hello".to_vec(), 8).unwrap();
        trie.put(&nib("00220"), b"hello".to_vec(), 7).unwrap();
        assert_eq!(trie.weight(), 34);

        // Replacement applies a signed weight delta.
        trie.put(&nib("00000"), b"hi".to_vec(), 6).unwrap();
        assert_eq!(trie.weight(), 30);
        assert_eq!(trie.get_nibbles(&nib("00000")).unwrap(), b"hi");
        assert_eq!(trie.get_nibbles(&nib("00220")).unwrap(), b"hello");
    }

    #[test]
    fn test_insertion_order_independence() {
        let keys: Vec<[u8; 32]> = (0u32..8).map(|i| raw_hash(&i.to_be_bytes())).collect();
        let mut forward = new_trie();
        let mut backward = new_trie();
        for (i, key) in keys.iter().enumerate() {
            forward
                .update(key, format!("value-{i}").as_bytes(), i as u64 + 1)
                .unwrap();
        }
        for (i, key) in keys.iter().enumerate().rev() {
            backward
                .update(key, format!("value-{i}").as_bytes(), i as u64 + 1)
                .unwrap();
        }
        assert_eq!(forward.root(), backward.root());
        assert_eq!(forward.weight(), backward.weight());
    }

    #[test]
    fn test_delete_is_inverse_of_insert() {
        let keys: Vec<[u8; 32]> = (0u32..6).map(|i| raw_hash(&i.to_be_bytes())).collect();
        let mut trie = new_trie();
        for (i, key) in keys.iter().enumerate() {
            trie.update(key, b"value", i as u64 + 1).unwrap();
        }
        let root_before = trie.root();

        let extra = raw_hash(b"extra");
        trie.update(&extra, b"extra-value", 100).unwrap();
        assert_ne!(trie.root(), root_before);

        let removed = trie.delete(&extra).unwrap();
        assert_eq!(removed, 100);
        assert_eq!(trie.root(), root_before);
    }

    #[test]
    fn test_single_key_delete_restores_empty_root() {
        let mut trie = new_trie();
        let key = raw_hash(b"only");
        trie.update(&key, b"v", 3).unwrap();
        trie.delete(&key).unwrap();
        assert_eq!(trie.root(), empty_state_hash());
        assert_eq!(trie.weight(), 0);
    }

    #[test]
    fn test_final_nibble_collision_and_reduction() {
        // Two keys diverging only at the last nibble force a short-wrapped
        // branch; deleting one collider reduces back to a single short leaf.
        let mut trie = new_trie();
        trie.put(&nib("1230"), b"a".to_vec(), 1).unwrap();
        let lone_root = trie.root();

        trie.put(&nib("1231"), b"b".to_vec(), 2).unwrap();
        assert_eq!(trie.weight(), 3);
        assert_eq!(trie.get_nibbles(&nib("1231")).unwrap(), b"b");

        trie.delete_nibbles(&nib("1231")).unwrap();
        assert_eq!(trie.root(), lone_root);
        assert_eq!(trie.get_nibbles(&nib("1230")).unwrap(), b"a");
    }

    #[test]
    fn test_empty_value_update_deletes() {
        let mut trie = new_trie();
        let key = raw_hash(b"k");
        trie.update(&key, b"v", 5).unwrap();
        trie.update(&key, b"", 0).unwrap();
        assert_eq!(trie.get(&key), Err(TrieError::KeyNotFound));
        assert_eq!(trie.root(), empty_state_hash());
    }

    #[test]
    fn test_invalid_key_length() {
        let mut trie = new_trie();
        assert!(matches!(
            trie.update(b"short", b"v", 1),
            Err(TrieError::InvalidKey { expected: 32, actual: 5 })
        ));
    }

    #[test]
    fn test_commit_persists_and_reload_reads() {
        let db = Arc::new(MemoryDb::new());
        let mut trie = WeightedMerkleTrie::new(None, db.clone());
        let keys: Vec<[u8; 32]> = (0u32..20).map(|i| raw_hash(&i.to_be_bytes())).collect();
        for (i, key) in keys.iter().enumerate() {
            trie.update(key, format!("v{i}").as_bytes(), i as u64).unwrap();
        }
        let root = trie.root();
        let weight = trie.weight();

        let batch = trie.commit(1).unwrap();
        batch.commit(false).unwrap();
        assert!(db.has(&root));

        // A fresh trie over the same storage resolves through the root ref.
        let mut reloaded = WeightedMerkleTrie::new(None, db);
        reloaded.set_root(root, weight);
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(reloaded.get(key).unwrap(), format!("v{i}").as_bytes());
        }
        assert_eq!(reloaded.root(), root);
    }

    #[test]
    fn test_commit_clears_dirty_and_collapses() {
        let db = Arc::new(MemoryDb::new());
        let mut trie = WeightedMerkleTrie::new(None, db.clone());
        for i in 0u32..40 {
            trie.update(&raw_hash(&i.to_be_bytes()), b"x", 1).unwrap();
        }
        let root = trie.root();
        trie.commit(0).unwrap().commit(false).unwrap();

        // Collapse at level 0 leaves only a hash-ref in memory.
        assert!(matches!(trie.get_root(), Node::HashRef(_)));
        assert!(!trie.get_root().dirty());
        assert_eq!(trie.root(), root);
        assert_eq!(db.get(&root).map(|b| b.is_empty()), Ok(false));
        // Reads keep working through storage.
        assert_eq!(trie.get(&raw_hash(&7u32.to_be_bytes())).unwrap(), b"x");
    }

    #[test]
    fn test_update_after_collapse_resolves_refs() {
        let db = Arc::new(MemoryDb::new());
        let mut trie = WeightedMerkleTrie::new(None, db);
        for i in 0u32..10 {
            trie.update(&raw_hash(&i.to_be_bytes()), b"x", 1).unwrap();
        }
        let mut expected = {
            // Mirror trie that never commits, for the expected hash.
            let mut mirror = new_trie();
            for i in 0u32..10 {
                mirror.update(&raw_hash(&i.to_be_bytes()), b"x", 1).unwrap();
            }
            mirror.update(&raw_hash(&3u32.to_be_bytes()), b"y", 2).unwrap();
            mirror
        };

        trie.commit(0).unwrap().commit(false).unwrap();
        trie.update(&raw_hash(&3u32.to_be_bytes()), b"y", 2).unwrap();
        assert_eq!(trie.root(), expected.root());
    }

    #[test]
    fn test_rollback_restores_saved_root() {
        let db = Arc::new(MemoryDb::new());
        let mut trie = WeightedMerkleTrie::new(None, db.clone());
        trie.update(&raw_hash(b"a"), b"1", 1).unwrap();
        trie.commit(1).unwrap().commit(false).unwrap();
        trie.save_root();
        let saved = trie.root();

        trie.update(&raw_hash(b"b"), b"2", 2).unwrap();
        trie.commit(1).unwrap().commit(false).unwrap();
        assert_ne!(trie.root(), saved);

        trie.rollback().unwrap();
        assert_eq!(trie.root(), saved);
        // Nodes created after the save point are purged from storage.
        assert_eq!(trie.get(&raw_hash(b"a")).unwrap(), b"1");
        assert_eq!(trie.get(&raw_hash(b"b")), Err(TrieError::KeyNotFound));
    }

    #[test]
    fn test_delete_nodes_flushes_tombstones() {
        let db = Arc::new(MemoryDb::new());
        let mut trie = WeightedMerkleTrie::new(None, db.clone());
        trie.update(&raw_hash(b"a"), b"1", 1).unwrap();
        trie.commit(1).unwrap().commit(false).unwrap();
        let old_root = trie.root();

        trie.update(&raw_hash(b"a"), b"2", 1).unwrap();
        trie.commit(1).unwrap().commit(false).unwrap();
        assert!(db.has(&old_root));

        trie.delete_nodes().unwrap();
        assert!(!db.has(&old_root));
        assert!(db.has(&trie.root()));
    }

    #[test]
    fn test_copy_root_snapshot_reads() {
        let db = Arc::new(MemoryDb::new());
        let mut trie = WeightedMerkleTrie::new(None, db.clone());
        for i in 0u32..12 {
            trie.update(&raw_hash(&i.to_be_bytes()), b"x", 1).unwrap();
        }
        let root = trie.root();
        trie.commit(2).unwrap().commit(false).unwrap();

        let snapshot = trie.copy_root(1);
        let mut hot = WeightedMerkleTrie::new(Some(snapshot), db);
        assert_eq!(hot.root(), root);
        assert_eq!(hot.get(&raw_hash(&5u32.to_be_bytes())).unwrap(), b"x");
    }
}
