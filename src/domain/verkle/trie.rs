//! # Verkle Trie
//!
//! Vector-committed trie over 32-byte tree keys, exposed as file-rooted
//! storage: per file a content root hash, a size slot and the value body
//! chunked into 32-byte slots across the header and main storage areas.
//!
//! Nodes persist under `namespace ‖ stem-prefix` keys; a freshly opened
//! trie loads only the root and resolves deeper nodes on demand, the same
//! shape the weighted Patricia trie uses for hash-refs.

use crate::domain::errors::VerkleError;
use crate::domain::verkle::committer::CommitDigest;
use crate::domain::verkle::node::{
    decode_verkle_node, encode_verkle_node, InternalNode, LeafNode, SlotValue, UnresolvedNode,
    VerkleNode,
};
use crate::domain::verkle::tree_key::{
    split_tree_key, tree_key_for_file_hash, tree_key_for_storage_size, tree_key_for_storage_slot,
    TreeKey, CHUNK_SIZE, STEM_LENGTH,
};
use crate::ports::database::{Batcher, StorageAdapter};
use std::mem;
use std::sync::Arc;
use tracing::{debug, warn};

const NODE_KEY_PREFIX: &[u8] = b"verkle_node/";

/// Storage key of the node at `path` inside one trie's namespace.
fn node_key(namespace: &[u8], path: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(NODE_KEY_PREFIX.len() + 4 + namespace.len() + path.len());
    key.extend_from_slice(NODE_KEY_PREFIX);
    key.extend_from_slice(&(namespace.len() as u32).to_be_bytes());
    key.extend_from_slice(namespace);
    key.extend_from_slice(path);
    key
}

/// Vector-committed trie bound to a namespace in the storage adapter.
pub struct VerkleTrie {
    pub(crate) namespace: Vec<u8>,
    pub(crate) db: Arc<dyn StorageAdapter>,
    pub(crate) root: VerkleNode,
    /// Node paths vacated since the last flush.
    removed_paths: Vec<Vec<u8>>,
}

impl VerkleTrie {
    /// Open the trie stored under `namespace_key`, starting empty if
    /// nothing is persisted yet.
    pub fn new(namespace_key: &[u8], db: Arc<dyn StorageAdapter>) -> Self {
        let root = match db.get(&node_key(namespace_key, &[])) {
            Ok(bytes) => match decode_verkle_node(&bytes, &[]) {
                Ok(node) => node,
                Err(err) => {
                    warn!(error = %err, "corrupt verkle root record, starting empty");
                    VerkleNode::Empty
                }
            },
            Err(_) => VerkleNode::Empty,
        };
        Self {
            namespace: namespace_key.to_vec(),
            db,
            root,
            removed_paths: Vec::new(),
        }
    }

    /// Root commitment digest, recomputed if stale.
    pub fn hash(&mut self) -> CommitDigest {
        self.root.calc_commitment()
    }

    /// Recompute all commitments and return the root digest.
    pub fn commit(&mut self) -> CommitDigest {
        self.hash()
    }

    // =========================================================================
    // RAW SLOT OPERATIONS
    // =========================================================================

    /// Insert a value (at most 32 bytes, zero-padded) at a tree key.
    pub fn insert(&mut self, key: &TreeKey, value: &[u8]) -> Result<(), VerkleError> {
        debug_assert!(value.len() <= CHUNK_SIZE as usize);
        let (stem, suffix) = split_tree_key(key);
        let mut padded: SlotValue = [0u8; 32];
        padded[..value.len().min(32)].copy_from_slice(&value[..value.len().min(32)]);

        let mut root = mem::take(&mut self.root);
        let result = insert_at(
            &self.db,
            &self.namespace,
            &mut root,
            &stem,
            suffix,
            padded,
            0,
        );
        self.root = root;
        result
    }

    /// Read the 32-byte slot at a tree key.
    pub fn get(&self, key: &TreeKey) -> Result<Option<SlotValue>, VerkleError> {
        let (stem, suffix) = split_tree_key(key);
        get_at(&self.db, &self.namespace, &self.root, &stem, suffix, 0)
    }

    /// Clear the slot at a tree key; `true` if something was removed.
    pub fn delete(&mut self, key: &TreeKey) -> Result<bool, VerkleError> {
        let (stem, suffix) = split_tree_key(key);
        let mut root = mem::take(&mut self.root);
        let result = delete_at(
            &self.db,
            &self.namespace,
            &mut root,
            &stem,
            suffix,
            0,
            &mut self.removed_paths,
        );
        self.root = root;
        result
    }

    // =========================================================================
    // FILE-META LAYER
    // =========================================================================

    /// Record a file: its content root hash plus the meta bytes chunked
    /// into value storage.
    pub fn insert_file_meta(
        &mut self,
        filepath_hash: &[u8],
        root_hash: &[u8; 32],
        meta: &[u8],
    ) -> Result<(), VerkleError> {
        self.insert(&tree_key_for_file_hash(filepath_hash), root_hash)?;
        self.insert_value(filepath_hash, meta)
    }

    /// Remove a file's meta bytes, size slot and content root hash.
    pub fn delete_file_meta(&mut self, filepath_hash: &[u8]) -> Result<(), VerkleError> {
        self.delete_value(filepath_hash)?;
        self.delete(&tree_key_for_file_hash(filepath_hash))?;
        Ok(())
    }

    /// The file's content root hash slot, if present.
    pub fn get_file_meta_root_hash(
        &self,
        filepath_hash: &[u8],
    ) -> Result<Option<SlotValue>, VerkleError> {
        self.get(&tree_key_for_file_hash(filepath_hash))
    }

    /// The file's stored meta bytes, if present.
    pub fn get_file_meta(&self, filepath_hash: &[u8]) -> Result<Option<Vec<u8>>, VerkleError> {
        self.get_value(filepath_hash)
    }

    /// Store an opaque value: write its size slot, then every 32-byte chunk
    /// at its computed tree key. A shorter replacement deletes the chunks
    /// it no longer covers.
    pub fn insert_value(&mut self, filepath_hash: &[u8], data: &[u8]) -> Result<(), VerkleError> {
        let old_chunks = self.stored_chunk_count(filepath_hash)?;

        let mut size = [0u8; 32];
        size[24..].copy_from_slice(&(data.len() as u64).to_be_bytes());
        self.insert(&tree_key_for_storage_size(filepath_hash), &size)?;

        let mut new_chunks = 0u64;
        for (i, chunk) in data.chunks(CHUNK_SIZE as usize).enumerate() {
            self.insert(&tree_key_for_storage_slot(filepath_hash, i as u64), chunk)?;
            new_chunks = i as u64 + 1;
        }
        for i in new_chunks..old_chunks {
            self.delete(&tree_key_for_storage_slot(filepath_hash, i))?;
        }
        Ok(())
    }

    /// Read a stored value back: size slot, then chunks, splicing the tail
    /// to the exact length.
    pub fn get_value(&self, filepath_hash: &[u8]) -> Result<Option<Vec<u8>>, VerkleError> {
        let size_slot = match self.get(&tree_key_for_storage_size(filepath_hash))? {
            Some(slot) => slot,
            None => return Ok(None),
        };
        let size = u64::from_be_bytes(size_slot[24..].try_into().unwrap_or_default());
        let chunks = size.div_ceil(CHUNK_SIZE);

        let mut out = Vec::with_capacity(size as usize);
        for i in 0..chunks {
            let chunk = self
                .get(&tree_key_for_storage_slot(filepath_hash, i))?
                .ok_or(VerkleError::MissingNode)?;
            out.extend_from_slice(&chunk);
        }
        out.truncate(size as usize);
        Ok(Some(out))
    }

    /// Remove a stored value: every chunk, then the size slot.
    pub fn delete_value(&mut self, filepath_hash: &[u8]) -> Result<(), VerkleError> {
        let chunks = self.stored_chunk_count(filepath_hash)?;
        for i in 0..chunks {
            self.delete(&tree_key_for_storage_slot(filepath_hash, i))?;
        }
        self.delete(&tree_key_for_storage_size(filepath_hash))?;
        Ok(())
    }

    fn stored_chunk_count(&self, filepath_hash: &[u8]) -> Result<u64, VerkleError> {
        match self.get(&tree_key_for_storage_size(filepath_hash))? {
            Some(slot) => {
                let size = u64::from_be_bytes(slot[24..].try_into().unwrap_or_default());
                Ok(size.div_ceil(CHUNK_SIZE))
            }
            None => Ok(0),
        }
    }

    // =========================================================================
    // PERSISTENCE
    // =========================================================================

    /// Batch-serialize every unpersisted node under its path key and drop
    /// vacated paths, then write the batch atomically.
    pub fn flush(&mut self) -> Result<(), VerkleError> {
        self.root.calc_commitment();
        let mut batch = self.db.new_batch();
        let mut written = 0usize;
        let mut path = Vec::new();
        flush_node(
            &mut self.root,
            &mut path,
            &self.namespace,
            batch.as_mut(),
            &mut written,
        )?;
        for removed in self.removed_paths.drain(..) {
            batch.delete(&node_key(&self.namespace, &removed))?;
        }
        batch.commit(false)?;
        debug!(nodes = written, "flushed verkle trie");
        Ok(())
    }

    /// Recompute commitments and persist in one step.
    pub fn commit_and_flush(&mut self) -> Result<CommitDigest, VerkleError> {
        let digest = self.commit();
        self.flush()?;
        Ok(digest)
    }

    /// Resolve every reference along a stem path so proof collection can
    /// walk in-memory nodes.
    pub(crate) fn materialize_path(&mut self, stem: &[u8; STEM_LENGTH]) -> Result<(), VerkleError> {
        let mut root = mem::take(&mut self.root);
        let result = materialize_at(&self.db, &self.namespace, &mut root, stem, 0);
        self.root = root;
        result
    }
}

fn materialize_at(
    db: &Arc<dyn StorageAdapter>,
    namespace: &[u8],
    node: &mut VerkleNode,
    stem: &[u8; STEM_LENGTH],
    depth: usize,
) -> Result<(), VerkleError> {
    match node {
        VerkleNode::Unresolved(r) => {
            *node = resolve_verkle(db, namespace, r)?;
            materialize_at(db, namespace, node, stem, depth)
        }
        VerkleNode::Internal(internal) => materialize_at(
            db,
            namespace,
            &mut internal.children[stem[depth] as usize],
            stem,
            depth + 1,
        ),
        VerkleNode::Empty | VerkleNode::Leaf(_) => Ok(()),
    }
}

pub(crate) fn resolve_verkle(
    db: &Arc<dyn StorageAdapter>,
    namespace: &[u8],
    reference: &UnresolvedNode,
) -> Result<VerkleNode, VerkleError> {
    let bytes = db.get(&node_key(namespace, &reference.path))?;
    decode_verkle_node(&bytes, &reference.path)
}

fn insert_at(
    db: &Arc<dyn StorageAdapter>,
    namespace: &[u8],
    node: &mut VerkleNode,
    stem: &[u8; STEM_LENGTH],
    suffix: u8,
    value: SlotValue,
    depth: usize,
) -> Result<(), VerkleError> {
    match node {
        VerkleNode::Empty => {
            let mut leaf = LeafNode::new(*stem);
            leaf.values[suffix as usize] = Some(value);
            *node = VerkleNode::Leaf(leaf);
            Ok(())
        }
        VerkleNode::Unresolved(r) => {
            *node = resolve_verkle(db, namespace, r)?;
            insert_at(db, namespace, node, stem, suffix, value, depth)
        }
        VerkleNode::Leaf(leaf) if leaf.stem == *stem => {
            leaf.values[suffix as usize] = Some(value);
            leaf.dirty = true;
            leaf.persisted = false;
            Ok(())
        }
        VerkleNode::Leaf(_) => {
            // Two stems share this slot: grow internal nodes down to the
            // first diverging byte.
            let VerkleNode::Leaf(mut old) = mem::take(node) else {
                unreachable!()
            };
            // The old leaf moves to a deeper path and must be re-persisted
            // there.
            old.persisted = false;
            let split = (depth..STEM_LENGTH)
                .find(|&i| old.stem[i] != stem[i])
                .unwrap_or(STEM_LENGTH - 1);

            let mut new_leaf = LeafNode::new(*stem);
            new_leaf.values[suffix as usize] = Some(value);

            let mut bottom = InternalNode::new();
            let old_idx = old.stem[split] as usize;
            bottom.children[old_idx] = VerkleNode::Leaf(old);
            bottom.children[stem[split] as usize] = VerkleNode::Leaf(new_leaf);

            let mut grown = VerkleNode::Internal(bottom);
            for level in (depth..split).rev() {
                let mut wrap = InternalNode::new();
                wrap.children[stem[level] as usize] = grown;
                grown = VerkleNode::Internal(wrap);
            }
            *node = grown;
            Ok(())
        }
        VerkleNode::Internal(internal) => {
            internal.dirty = true;
            internal.persisted = false;
            insert_at(
                db,
                namespace,
                &mut internal.children[stem[depth] as usize],
                stem,
                suffix,
                value,
                depth + 1,
            )
        }
    }
}

fn get_at(
    db: &Arc<dyn StorageAdapter>,
    namespace: &[u8],
    node: &VerkleNode,
    stem: &[u8; STEM_LENGTH],
    suffix: u8,
    depth: usize,
) -> Result<Option<SlotValue>, VerkleError> {
    match node {
        VerkleNode::Empty => Ok(None),
        VerkleNode::Leaf(leaf) => {
            if leaf.stem == *stem {
                Ok(leaf.values[suffix as usize])
            } else {
                Ok(None)
            }
        }
        VerkleNode::Internal(internal) => get_at(
            db,
            namespace,
            &internal.children[stem[depth] as usize],
            stem,
            suffix,
            depth + 1,
        ),
        VerkleNode::Unresolved(r) => {
            let loaded = resolve_verkle(db, namespace, r)?;
            get_at(db, namespace, &loaded, stem, suffix, depth)
        }
    }
}

fn delete_at(
    db: &Arc<dyn StorageAdapter>,
    namespace: &[u8],
    node: &mut VerkleNode,
    stem: &[u8; STEM_LENGTH],
    suffix: u8,
    depth: usize,
    removed_paths: &mut Vec<Vec<u8>>,
) -> Result<bool, VerkleError> {
    match node {
        VerkleNode::Empty => Ok(false),
        VerkleNode::Unresolved(r) => {
            *node = resolve_verkle(db, namespace, r)?;
            delete_at(db, namespace, node, stem, suffix, depth, removed_paths)
        }
        VerkleNode::Leaf(leaf) => {
            if leaf.stem != *stem {
                return Ok(false);
            }
            let removed = leaf.values[suffix as usize].take().is_some();
            if !removed {
                return Ok(false);
            }
            leaf.dirty = true;
            leaf.persisted = false;
            if leaf.is_vacant() {
                removed_paths.push(stem[..depth].to_vec());
                *node = VerkleNode::Empty;
            }
            Ok(true)
        }
        VerkleNode::Internal(internal) => {
            let removed = delete_at(
                db,
                namespace,
                &mut internal.children[stem[depth] as usize],
                stem,
                suffix,
                depth + 1,
                removed_paths,
            )?;
            if removed {
                internal.dirty = true;
                internal.persisted = false;
            }
            Ok(removed)
        }
    }
}

fn flush_node(
    node: &mut VerkleNode,
    path: &mut Vec<u8>,
    namespace: &[u8],
    batch: &mut dyn Batcher,
    written: &mut usize,
) -> Result<(), VerkleError> {
    if node.persisted() {
        return Ok(());
    }
    if let VerkleNode::Internal(internal) = node {
        for slot in 0..internal.children.len() {
            path.push(slot as u8);
            flush_node(&mut internal.children[slot], path, namespace, batch, written)?;
            path.pop();
        }
    }
    let record = encode_verkle_node(node)?;
    batch
        .put(&node_key(namespace, path), &record)
        .map_err(VerkleError::from)?;
    *written += 1;
    match node {
        VerkleNode::Internal(n) => n.persisted = true,
        VerkleNode::Leaf(n) => n.persisted = true,
        _ => {}
    }
    Ok(())
}
