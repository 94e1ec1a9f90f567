//! # In-Memory Storage Adapter
//!
//! Ordered `BTreeMap` store used by tests and development nodes. Shares one
//! map across clones so a batch can own a handle to the store it commits to.

use crate::domain::cancel::CancelToken;
use crate::domain::errors::StorageError;
use crate::ports::database::{Batcher, IterVisitor, StorageAdapter};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

type Store = Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>;

/// In-memory implementation of `StorageAdapter`.
#[derive(Clone, Default)]
pub struct MemoryDb {
    store: Store,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        read(&self.store).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// A poisoned lock only means a writer panicked mid-insert; the map itself is
// still structurally sound, so recover the guard instead of failing reads.
fn read(store: &Store) -> std::sync::RwLockReadGuard<'_, BTreeMap<Vec<u8>, Vec<u8>>> {
    store.read().unwrap_or_else(|e| e.into_inner())
}

fn write(store: &Store) -> std::sync::RwLockWriteGuard<'_, BTreeMap<Vec<u8>, Vec<u8>>> {
    store.write().unwrap_or_else(|e| e.into_inner())
}

impl StorageAdapter for MemoryDb {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, StorageError> {
        read(&self.store).get(key).cloned().ok_or(StorageError::NotFound)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        write(&self.store).insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn has(&self, key: &[u8]) -> bool {
        read(&self.store).contains_key(key)
    }

    fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        write(&self.store).remove(key);
        Ok(())
    }

    fn new_batch(&self) -> Box<dyn Batcher> {
        Box::new(MemoryBatch {
            store: Arc::clone(&self.store),
            ops: Vec::new(),
        })
    }

    fn iterate(
        &self,
        prefix: Option<&[u8]>,
        cancel: &CancelToken,
        visitor: IterVisitor<'_>,
    ) -> Result<(), StorageError> {
        let guard = read(&self.store);
        let entries = guard
            .iter()
            .filter(|(k, _)| prefix.map_or(true, |p| k.starts_with(p)));
        for (key, value) in entries {
            if cancel.is_cancelled() {
                return Ok(());
            }
            if !visitor(key, value) {
                return Ok(());
            }
        }
        Ok(())
    }

    fn close(&self) {}
}

enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Buffered batch; all operations land in one write-lock acquisition so the
/// store never observes a partial batch.
pub struct MemoryBatch {
    store: Store,
    ops: Vec<BatchOp>,
}

impl Batcher for MemoryBatch {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.ops.push(BatchOp::Put(key.to_vec(), value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StorageError> {
        self.ops.push(BatchOp::Delete(key.to_vec()));
        Ok(())
    }

    fn commit(self: Box<Self>, _sync: bool) -> Result<(), StorageError> {
        let mut guard = write(&self.store);
        for op in self.ops {
            match op {
                BatchOp::Put(key, value) => {
                    guard.insert(key, value);
                }
                BatchOp::Delete(key) => {
                    guard.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_put_delete() {
        let db = MemoryDb::new();
        assert_eq!(db.get(b"k"), Err(StorageError::NotFound));

        db.put(b"k", b"v").unwrap();
        assert_eq!(db.get(b"k").unwrap(), b"v");
        assert!(db.has(b"k"));

        db.delete(b"k").unwrap();
        assert_eq!(db.get(b"k"), Err(StorageError::NotFound));
        assert!(!db.has(b"k"));
    }

    #[test]
    fn test_batch_commit_applies_all_ops() {
        let db = MemoryDb::new();
        db.put(b"drop", b"me").unwrap();

        let mut batch = db.new_batch();
        batch.put(b"a", b"1").unwrap();
        batch.put(b"b", b"2").unwrap();
        batch.delete(b"drop").unwrap();

        // Nothing visible before commit.
        assert_eq!(db.get(b"a"), Err(StorageError::NotFound));
        assert!(db.has(b"drop"));

        batch.commit(false).unwrap();
        assert_eq!(db.get(b"a").unwrap(), b"1");
        assert_eq!(db.get(b"b").unwrap(), b"2");
        assert!(!db.has(b"drop"));
    }

    #[test]
    fn test_iterate_ordered_with_prefix() {
        let db = MemoryDb::new();
        db.put(b"a/1", b"x").unwrap();
        db.put(b"a/2", b"y").unwrap();
        db.put(b"b/1", b"z").unwrap();

        let mut seen = Vec::new();
        db.iterate(Some(b"a/"), &CancelToken::new(), &mut |k, _| {
            seen.push(k.to_vec());
            true
        })
        .unwrap();
        assert_eq!(seen, vec![b"a/1".to_vec(), b"a/2".to_vec()]);
    }

    #[test]
    fn test_iterate_respects_cancel() {
        let db = MemoryDb::new();
        for i in 0..10u8 {
            db.put(&[i], b"v").unwrap();
        }

        let cancel = CancelToken::new();
        let mut count = 0;
        db.iterate(None, &cancel, &mut |_, _| {
            count += 1;
            cancel.cancel();
            true
        })
        .unwrap();
        assert_eq!(count, 1);
    }
}
