//! Vaultline server entry point.
//!
//! Loads configuration (a bad master key aborts startup with a non-zero
//! exit), bootstraps storage, the audit worker, and the secrets service,
//! then runs until a shutdown signal. On shutdown the service is dropped
//! and the audit worker is given time to flush its queue.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use vaultline_core::audit::{AuditDispatcher, AuditSink};
use vaultline_core::audit_file::FileAuditSink;
use vaultline_core::service::SecretsService;
use vaultline_storage::{MemoryBackend, StorageBackend};

use vaultline_server::config::{ServerConfig, StorageBackendType};
use vaultline_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env().context("invalid configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(storage = ?config.storage_backend, "Vaultline starting");

    let (state, audit_worker) = build_app_state(&config)?;
    info!("secrets service ready");

    shutdown_signal().await;

    drop(state);
    if let Some(worker) = audit_worker {
        info!("flushing audit queue");
        if tokio::time::timeout(Duration::from_secs(10), worker).await.is_err() {
            warn!("audit queue not drained before shutdown timeout");
        }
    }

    info!("Vaultline stopped");
    Ok(())
}

/// Build the shared application state and the audit worker handle, if any.
fn build_app_state(config: &ServerConfig) -> anyhow::Result<(Arc<AppState>, Option<JoinHandle<()>>)> {
    let storage: Arc<dyn StorageBackend> = match &config.storage_backend {
        StorageBackendType::Memory => {
            info!("using in-memory storage (data will not persist)");
            Arc::new(MemoryBackend::new())
        }
        #[cfg(feature = "rocksdb-backend")]
        StorageBackendType::RocksDb { path } => {
            info!(path = %path, "using RocksDB storage");
            Arc::new(
                vaultline_storage::RocksDbBackend::open(path)
                    .context("failed to open RocksDB storage")?,
            )
        }
        #[cfg(not(feature = "rocksdb-backend"))]
        StorageBackendType::RocksDb { .. } => {
            anyhow::bail!("RocksDB backend requested but feature 'rocksdb-backend' is not enabled");
        }
    };

    let (audit, audit_worker) = match &config.audit_file_path {
        Some(path) => {
            let sink: Arc<dyn AuditSink> = Arc::new(FileAuditSink::new(path));
            info!(path = %path.display(), "file audit sink registered");
            let (dispatcher, worker) = AuditDispatcher::spawn(vec![sink], config.audit_delivery);
            (dispatcher, Some(worker))
        }
        None => {
            warn!("no audit sink configured; audit events are discarded");
            (AuditDispatcher::disabled(), None)
        }
    };

    let secrets = SecretsService::new(
        Arc::clone(&config.master_key),
        storage,
        config.blind_index,
        audit,
    )
    .context("failed to initialize secrets service")?;

    Ok((
        Arc::new(AppState {
            secrets: Arc::new(secrets),
        }),
        audit_worker,
    ))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received");
}
