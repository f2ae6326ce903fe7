//! JSON-lines audit sink.
//!
//! Appends one JSON object per [`AuditEvent`] to a file opened in append
//! mode. Writes are serialized through a `tokio::sync::Mutex` around the
//! handle; the worker delivers one event at a time anyway.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard};

use crate::audit::{AuditEvent, AuditSink};
use crate::error::AuditError;

const SINK_NAME: &str = "file";

/// Audit sink that appends JSON lines to a file.
pub struct FileAuditSink {
    path: PathBuf,
    writer: Mutex<Option<File>>,
}

impl FileAuditSink {
    /// The file is created (or opened for append) lazily on first write.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: Mutex::new(None),
        }
    }

    fn failure(reason: String) -> AuditError {
        AuditError::BackendFailure {
            name: SINK_NAME.to_owned(),
            reason,
        }
    }

    async fn open(&self) -> Result<MutexGuard<'_, Option<File>>, AuditError> {
        let mut guard = self.writer.lock().await;
        if guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .map_err(|e| {
                    Self::failure(format!("cannot open '{}': {e}", self.path.display()))
                })?;
            *guard = Some(file);
        }
        Ok(guard)
    }
}

#[async_trait::async_trait]
impl AuditSink for FileAuditSink {
    fn name(&self) -> &'static str {
        SINK_NAME
    }

    async fn log(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(event).map_err(|e| AuditError::Serialization {
            reason: e.to_string(),
        })?;
        line.push(b'\n');

        let mut guard = self.open().await?;
        let Some(file) = guard.as_mut() else {
            return Err(Self::failure("file handle missing after open".to_owned()));
        };

        let written = async {
            file.write_all(&line).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = written {
            // Reopen on the next attempt instead of reusing a broken handle.
            *guard = None;
            return Err(Self::failure(format!("write failed: {e}")));
        }
        Ok(())
    }
}

impl std::fmt::Debug for FileAuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileAuditSink")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::audit::{AuditAction, ResourceType};

    #[tokio::test]
    async fn appends_one_json_line_per_event() {
        let dir = std::env::temp_dir().join(format!("vaultline-audit-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("audit.jsonl");
        let sink = FileAuditSink::new(&path);

        let org = Uuid::new_v4();
        for action in [AuditAction::SecretCreate, AuditAction::SecretRead] {
            let event = AuditEvent::new(org, Uuid::nil(), action, ResourceType::Secret, Uuid::new_v4(), "/K")
                .with_metadata(serde_json::json!({ "version": 1 }));
            sink.log(&event).await.unwrap();
        }

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["action"], "secret.read");
        assert_eq!(lines[0]["metadata"]["version"], 1);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn unwritable_path_is_a_backend_failure() {
        let sink = FileAuditSink::new("/nonexistent-dir/for/vaultline/audit.jsonl");
        let event = AuditEvent::new(
            Uuid::nil(),
            Uuid::nil(),
            AuditAction::SecretRead,
            ResourceType::Secret,
            Uuid::nil(),
            "/K",
        );
        assert!(matches!(
            sink.log(&event).await,
            Err(AuditError::BackendFailure { .. })
        ));
    }
}
