//! # Adapters
//!
//! Concrete storage engines plugged into the `ports::database` seam.

pub mod memory_db;

#[cfg(feature = "rocksdb-store")]
pub mod rocks_db;

pub use memory_db::MemoryDb;

#[cfg(feature = "rocksdb-store")]
pub use rocks_db::RocksDb;
