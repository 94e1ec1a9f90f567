//! # Storage Ports
//!
//! The narrow contract every tree persists through. The adapter is the sole
//! persistence boundary: trees never write outside a batch, and a batch is
//! atomic: failure of any operation leaves the store unchanged.

use crate::domain::cancel::CancelToken;
use crate::domain::errors::StorageError;

/// Atomic write batch. Puts and deletes are buffered until `commit`.
pub trait Batcher: Send {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StorageError>;
    fn delete(&mut self, key: &[u8]) -> Result<(), StorageError>;

    /// Apply the batch atomically. `sync` forces the write to durable media
    /// before returning.
    fn commit(self: Box<Self>, sync: bool) -> Result<(), StorageError>;
}

/// Visitor for ordered iteration. Return `false` to stop early.
pub type IterVisitor<'a> = &'a mut dyn FnMut(&[u8], &[u8]) -> bool;

/// Ordered embedded key-value store seen through a narrow seam.
pub trait StorageAdapter: Send + Sync {
    /// Fetch a value; `StorageError::NotFound` on a miss.
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, StorageError>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError>;

    fn has(&self, key: &[u8]) -> bool;

    fn delete(&self, key: &[u8]) -> Result<(), StorageError>;

    /// Start a new atomic batch. The batch owns its connection handle and
    /// may outlive this borrow.
    fn new_batch(&self) -> Box<dyn Batcher>;

    /// Visit entries in ascending key order, optionally restricted to a
    /// prefix. Checks the cancel token between entries and stops promptly.
    fn iterate(
        &self,
        prefix: Option<&[u8]>,
        cancel: &CancelToken,
        visitor: IterVisitor<'_>,
    ) -> Result<(), StorageError>;

    fn close(&self);
}
