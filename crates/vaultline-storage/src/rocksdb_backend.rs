//! `RocksDB` storage backend, the production default.
//!
//! `RocksDB` is a blocking C++ library, so every call runs on the tokio
//! blocking pool. A [`BatchOp`] list becomes one `RocksDB` `WriteBatch`,
//! which the database applies atomically.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rocksdb::{DBWithThreadMode, Direction, IteratorMode, MultiThreaded, Options, WriteBatch};
use tracing::debug;

use crate::{BatchOp, StorageBackend, StorageError};

type Db = DBWithThreadMode<MultiThreaded>;

/// Secret store records persisted in a `RocksDB` database directory.
///
/// # Examples
///
/// ```no_run
/// # use vaultline_storage::RocksDbBackend;
/// let backend = RocksDbBackend::open("/var/lib/vaultline/data").unwrap();
/// ```
#[derive(Clone)]
pub struct RocksDbBackend {
    db: Arc<Db>,
    path: PathBuf,
}

impl std::fmt::Debug for RocksDbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksDbBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RocksDbBackend {
    /// Open (or create) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if `RocksDB` cannot open or create it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = Db::open(&opts, path).map_err(|e| StorageError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        debug!(path = %path.display(), "rocksdb opened");

        Ok(Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
        })
    }

    /// Run `f` against the database on the blocking pool.
    async fn blocking<T, F>(&self, f: F, on_panic: impl FnOnce(String) -> StorageError) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Db) -> Result<T, StorageError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(db.as_ref()))
            .await
            .map_err(|e| on_panic(format!("blocking task panicked: {e}")))?
    }
}

#[async_trait::async_trait]
impl StorageBackend for RocksDbBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let owned = key.to_owned();
        let key = key.to_owned();
        self.blocking(
            move |db| {
                db.get(owned.as_bytes()).map_err(|e| StorageError::Read {
                    key: owned.clone(),
                    reason: e.to_string(),
                })
            },
            |reason| StorageError::Read { key, reason },
        )
        .await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let owned = prefix.to_owned();
        let prefix = prefix.to_owned();
        self.blocking(
            move |db| {
                let mut keys = Vec::new();
                for item in db.iterator(IteratorMode::From(owned.as_bytes(), Direction::Forward)) {
                    let (raw, _) = item.map_err(|e| StorageError::List {
                        prefix: owned.clone(),
                        reason: e.to_string(),
                    })?;
                    let key = String::from_utf8(raw.into_vec()).map_err(|e| StorageError::InvalidKey {
                        reason: e.to_string(),
                    })?;
                    if !key.starts_with(&owned) {
                        break;
                    }
                    keys.push(key);
                }
                Ok(keys)
            },
            |reason| StorageError::List { prefix, reason },
        )
        .await
    }

    async fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), StorageError> {
        let count = ops.len();
        self.blocking(
            move |db| {
                let mut batch = WriteBatch::default();
                for op in &ops {
                    match op {
                        BatchOp::Put { key, value } => batch.put(key.as_bytes(), value),
                        BatchOp::Delete { key } => batch.delete(key.as_bytes()),
                    }
                }
                db.write(batch).map_err(|e| StorageError::Transaction {
                    ops: count,
                    reason: e.to_string(),
                })
            },
            |reason| StorageError::Transaction { ops: count, reason },
        )
        .await
    }
}
