//! # RocksDB Storage Adapter
//!
//! Production adapter behind the `rocksdb-store` feature. Batches map onto
//! RocksDB write batches, which are atomic by construction; `sync` commits
//! flush the WAL before returning.

use crate::domain::cancel::CancelToken;
use crate::domain::errors::StorageError;
use crate::ports::database::{Batcher, IterVisitor, StorageAdapter};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, WriteOptions, DB};
use std::path::Path;
use std::sync::Arc;

/// RocksDB-backed implementation of `StorageAdapter`.
#[derive(Clone)]
pub struct RocksDb {
    db: Arc<DB>,
}

impl RocksDb {
    /// Open (or create) a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path).map_err(io_err)?;
        Ok(Self { db: Arc::new(db) })
    }
}

fn io_err(err: rocksdb::Error) -> StorageError {
    StorageError::Io(err.to_string())
}

impl StorageAdapter for RocksDb {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, StorageError> {
        match self.db.get(key).map_err(io_err)? {
            Some(value) => Ok(value),
            None => Err(StorageError::NotFound),
        }
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.db.put(key, value).map_err(io_err)
    }

    fn has(&self, key: &[u8]) -> bool {
        matches!(self.db.get(key), Ok(Some(_)))
    }

    fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        self.db.delete(key).map_err(io_err)
    }

    fn new_batch(&self) -> Box<dyn Batcher> {
        Box::new(RocksBatch {
            db: Arc::clone(&self.db),
            batch: WriteBatch::default(),
        })
    }

    fn iterate(
        &self,
        prefix: Option<&[u8]>,
        cancel: &CancelToken,
        visitor: IterVisitor<'_>,
    ) -> Result<(), StorageError> {
        let mode = match prefix {
            Some(p) => IteratorMode::From(p, Direction::Forward),
            None => IteratorMode::Start,
        };
        for item in self.db.iterator(mode) {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let (key, value) = item.map_err(io_err)?;
            if let Some(p) = prefix {
                if !key.starts_with(p) {
                    return Ok(());
                }
            }
            if !visitor(&key, &value) {
                return Ok(());
            }
        }
        Ok(())
    }

    fn close(&self) {
        // Dropping the last handle closes the database; flush best-effort.
        let _ = self.db.flush();
    }
}

/// RocksDB write batch with an owned handle back to the database.
pub struct RocksBatch {
    db: Arc<DB>,
    batch: WriteBatch,
}

impl Batcher for RocksBatch {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.batch.put(key, value);
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StorageError> {
        self.batch.delete(key);
        Ok(())
    }

    fn commit(self: Box<Self>, sync: bool) -> Result<(), StorageError> {
        let mut opts = WriteOptions::default();
        opts.set_sync(sync);
        self.db.write_opt(self.batch, &opts).map_err(io_err)
    }
}
