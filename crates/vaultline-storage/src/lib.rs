//! Storage backend abstraction for Vaultline.
//!
//! This crate defines the [`StorageBackend`] trait: a pure key-value storage
//! interface that knows nothing about secrets, organizations, or encryption.
//! The secret version store in `vaultline-core` builds its records, indexes,
//! and transactional guarantees on top of it, and only ever hands it
//! ciphertext or wrapped keys.
//!
//! Two implementations are provided:
//!
//! - [`RocksDbBackend`]: production default, backed by `RocksDB` (feature `rocksdb-backend`)
//! - [`MemoryBackend`]: in-memory, for tests and local development

mod error;
mod memory;
#[cfg(feature = "rocksdb-backend")]
mod rocksdb_backend;

pub use error::StorageError;
pub use memory::MemoryBackend;
#[cfg(feature = "rocksdb-backend")]
pub use rocksdb_backend::RocksDbBackend;

/// A single mutation inside an atomic [`StorageBackend::write_batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Insert or overwrite `key` with `value`.
    Put { key: String, value: Vec<u8> },
    /// Remove `key`. Removing a missing key is not an error.
    Delete { key: String },
}

impl BatchOp {
    /// Build a put operation.
    pub fn put(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Build a delete operation.
    pub fn delete(key: impl Into<String>) -> Self {
        Self::Delete { key: key.into() }
    }

    /// The key this operation touches. Later operations on the same key
    /// win over earlier ones.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// A pluggable key-value storage backend.
///
/// Keys are UTF-8 strings using `/` as a separator (e.g. `orgs/<id>`,
/// `versions/<secret>/0000000003`). Values are opaque byte arrays.
///
/// Every mutation goes through [`write_batch`](StorageBackend::write_batch);
/// there are no single-key writes. Implementations must be safe to share
/// across async tasks (`Send + Sync`).
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Retrieve a value by key.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// List all keys that start with the given prefix, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::List`] if the underlying backend fails.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Apply every operation in `ops` atomically: either all of them become
    /// visible or none do.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Transaction`] if the batch could not be
    /// committed. Nothing from the batch is visible in that case.
    async fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), StorageError>;
}
