//! In-memory storage backend.
//!
//! Keeps every record in one `BTreeMap` behind a `tokio` `RwLock`. Nothing is
//! persisted. Used by the test suites and for local development, where the
//! server starts with `VAULTLINE_STORAGE=memory`.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::{BatchOp, StorageBackend, StorageError};

/// An in-memory storage backend backed by a `BTreeMap`.
///
/// Keys stay sorted, so a prefix listing is a single range scan. A batch is
/// applied under one write guard, so readers never observe half of it.
///
/// # Examples
///
/// ```
/// # use vaultline_storage::{BatchOp, MemoryBackend, StorageBackend};
/// # #[tokio::main]
/// # async fn main() {
/// let backend = MemoryBackend::new();
/// backend
///     .write_batch(vec![BatchOp::put("orgs/a", b"1".to_vec())])
///     .await
///     .unwrap();
/// assert_eq!(backend.get("orgs/a").await.unwrap(), Some(b"1".to_vec()));
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    records: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let records = self.records.read().await;
        Ok(records
            .range(prefix.to_owned()..)
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), StorageError> {
        let mut records = self.records.write().await;
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    records.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    records.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn seeded(keys: &[&str]) -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend
            .write_batch(
                keys.iter()
                    .map(|k| BatchOp::put(*k, k.as_bytes().to_vec()))
                    .collect(),
            )
            .await
            .unwrap();
        backend
    }

    #[tokio::test]
    async fn missing_key_reads_as_none() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.get("orgs/nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn later_op_on_same_key_wins() {
        let backend = seeded(&["active/env/a"]).await;

        backend
            .write_batch(vec![
                BatchOp::delete("active/env/a"),
                BatchOp::put("secrets/a", b"record".to_vec()),
                BatchOp::put("versions/a/0000000001", b"v1".to_vec()),
                BatchOp::put("versions/a/0000000001", b"v1-final".to_vec()),
                BatchOp::delete("secrets/a"),
            ])
            .await
            .unwrap();

        assert_eq!(backend.get("active/env/a").await.unwrap(), None);
        assert_eq!(backend.get("secrets/a").await.unwrap(), None);
        assert_eq!(
            backend.get("versions/a/0000000001").await.unwrap(),
            Some(b"v1-final".to_vec())
        );
    }

    #[tokio::test]
    async fn deleting_a_missing_key_is_a_noop() {
        let backend = seeded(&["orgs/a"]).await;
        backend
            .write_batch(vec![BatchOp::delete("orgs/missing")])
            .await
            .unwrap();
        assert_eq!(backend.list("orgs/").await.unwrap(), ["orgs/a"]);
    }

    #[tokio::test]
    async fn list_is_sorted_and_stops_at_prefix_boundary() {
        let backend = seeded(&[
            "versions/s1/0000000002",
            "versions/s1/0000000001",
            "versions/s10/0000000001",
            "secrets/s1",
        ])
        .await;

        assert_eq!(
            backend.list("versions/s1/").await.unwrap(),
            ["versions/s1/0000000001", "versions/s1/0000000002"]
        );
        assert!(backend.list("blind/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clones_share_records() {
        let backend = MemoryBackend::new();
        let clone = backend.clone();
        backend
            .write_batch(vec![BatchOp::put("orgs/a", b"1".to_vec())])
            .await
            .unwrap();
        assert_eq!(clone.get("orgs/a").await.unwrap(), Some(b"1".to_vec()));
    }
}
