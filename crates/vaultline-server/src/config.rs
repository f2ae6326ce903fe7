//! Server configuration for Vaultline.
//!
//! Loaded from `VAULTLINE_*` environment variables. Unlike optional tuning
//! knobs, the master key has no default: a missing or malformed key is a
//! [`ConfigError`] and the server refuses to start.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use vaultline_core::audit::DeliveryPolicy;
use vaultline_core::blind_index::BlindIndexParams;
use vaultline_core::error::ConfigError;
use vaultline_core::keys::{MASTER_KEY_SETTING, MasterKey};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Root of the key hierarchy. Redacted from `Debug`.
    pub master_key: Arc<MasterKey>,
    /// Storage backend type.
    pub storage_backend: StorageBackendType,
    /// Log level filter (e.g., `info`, `debug`, `warn`).
    pub log_level: String,
    /// Path to the JSON-lines audit file, if file audit is enabled.
    pub audit_file_path: Option<PathBuf>,
    /// Argon2id cost for blind index derivation.
    pub blind_index: BlindIndexParams,
    /// Retry policy for audit delivery.
    pub audit_delivery: DeliveryPolicy,
}

/// Supported storage backend types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackendType {
    /// In-memory (development only, data lost on restart).
    Memory,
    /// `RocksDB` persistent storage.
    RocksDb { path: String },
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// - `VAULTLINE_MASTER_KEY` (required): 64 hex chars or base64 of 32 bytes
    /// - `VAULTLINE_STORAGE`: `memory` or `rocksdb` (default: `memory`)
    /// - `VAULTLINE_STORAGE_PATH`: path for `rocksdb` (default: `./data`)
    /// - `VAULTLINE_LOG_LEVEL`: log filter (default: `info`)
    /// - `VAULTLINE_AUDIT_FILE`: audit log path (optional)
    /// - `VAULTLINE_BLIND_INDEX_MEMORY_KIB`, `VAULTLINE_BLIND_INDEX_ITERATIONS`,
    ///   `VAULTLINE_BLIND_INDEX_PARALLELISM`: Argon2id cost (default: 19456 / 2 / 1)
    /// - `VAULTLINE_AUDIT_MAX_ATTEMPTS`: delivery attempts per sink (default: 5)
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the master key is missing or malformed, or
    /// any other setting is present but unparseable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let master_key = lookup(MASTER_KEY_SETTING).ok_or_else(|| ConfigError::Missing {
            name: MASTER_KEY_SETTING.to_owned(),
        })?;
        let master_key = Arc::new(MasterKey::from_encoded(&master_key)?);

        let storage_path = lookup("VAULTLINE_STORAGE_PATH").unwrap_or_else(|| "./data".to_owned());
        let storage_backend = match lookup("VAULTLINE_STORAGE")
            .unwrap_or_else(|| "memory".to_owned())
            .to_lowercase()
            .as_str()
        {
            "memory" => StorageBackendType::Memory,
            "rocksdb" => StorageBackendType::RocksDb { path: storage_path },
            other => {
                return Err(ConfigError::Invalid {
                    name: "VAULTLINE_STORAGE".to_owned(),
                    reason: format!("unknown backend '{other}', expected 'memory' or 'rocksdb'"),
                });
            }
        };

        let log_level = lookup("VAULTLINE_LOG_LEVEL").unwrap_or_else(|| "info".to_owned());
        let audit_file_path = lookup("VAULTLINE_AUDIT_FILE")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);

        let defaults = BlindIndexParams::default();
        let blind_index = BlindIndexParams {
            memory_kib: parse_or(&lookup, "VAULTLINE_BLIND_INDEX_MEMORY_KIB", defaults.memory_kib)?,
            iterations: parse_or(&lookup, "VAULTLINE_BLIND_INDEX_ITERATIONS", defaults.iterations)?,
            parallelism: parse_or(&lookup, "VAULTLINE_BLIND_INDEX_PARALLELISM", defaults.parallelism)?,
        };

        let max_attempts = parse_or(
            &lookup,
            "VAULTLINE_AUDIT_MAX_ATTEMPTS",
            DeliveryPolicy::default().max_attempts,
        )?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "VAULTLINE_AUDIT_MAX_ATTEMPTS".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        let audit_delivery = DeliveryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
        };

        Ok(Self {
            master_key,
            storage_backend,
            log_level,
            audit_file_path,
            blind_index,
            audit_delivery,
        })
    }
}

fn parse_or(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: u32) -> Result<u32, ConfigError> {
    lookup(name).map_or(Ok(default), |raw| {
        raw.trim().parse().map_err(|e| ConfigError::Invalid {
            name: name.to_owned(),
            reason: format!("expected an unsigned integer: {e}"),
        })
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        ServerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    fn key() -> String {
        "0f".repeat(32)
    }

    #[test]
    fn defaults_apply_with_only_master_key() {
        let config = load(&[(MASTER_KEY_SETTING, &key())]).unwrap();
        assert_eq!(config.storage_backend, StorageBackendType::Memory);
        assert_eq!(config.log_level, "info");
        assert!(config.audit_file_path.is_none());
        assert_eq!(config.blind_index, BlindIndexParams::default());
        assert_eq!(config.audit_delivery.max_attempts, 5);
    }

    #[test]
    fn missing_master_key_is_fatal() {
        assert!(matches!(load(&[]), Err(ConfigError::Missing { .. })));
    }

    #[test]
    fn short_master_key_is_fatal() {
        let result = load(&[(MASTER_KEY_SETTING, &"0f".repeat(16))]);
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn rocksdb_uses_storage_path() {
        let config = load(&[
            (MASTER_KEY_SETTING, &key()),
            ("VAULTLINE_STORAGE", "RocksDB"),
            ("VAULTLINE_STORAGE_PATH", "/var/lib/vaultline"),
        ])
        .unwrap();
        assert_eq!(
            config.storage_backend,
            StorageBackendType::RocksDb {
                path: "/var/lib/vaultline".to_owned()
            }
        );
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let result = load(&[(MASTER_KEY_SETTING, &key()), ("VAULTLINE_STORAGE", "postgres")]);
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn tuning_values_are_parsed() {
        let config = load(&[
            (MASTER_KEY_SETTING, &key()),
            ("VAULTLINE_BLIND_INDEX_MEMORY_KIB", "65536"),
            ("VAULTLINE_BLIND_INDEX_ITERATIONS", "3"),
            ("VAULTLINE_AUDIT_MAX_ATTEMPTS", "10"),
            ("VAULTLINE_AUDIT_FILE", "/tmp/audit.jsonl"),
        ])
        .unwrap();
        assert_eq!(config.blind_index.memory_kib, 65_536);
        assert_eq!(config.blind_index.iterations, 3);
        assert_eq!(config.audit_delivery.max_attempts, 10);
        assert_eq!(config.audit_file_path, Some(PathBuf::from("/tmp/audit.jsonl")));
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let result = load(&[
            (MASTER_KEY_SETTING, &key()),
            ("VAULTLINE_BLIND_INDEX_ITERATIONS", "two"),
        ]);
        assert!(matches!(result, Err(ConfigError::Invalid { name, .. }) if name == "VAULTLINE_BLIND_INDEX_ITERATIONS"));
    }

    #[test]
    fn debug_output_hides_master_key() {
        let config = load(&[(MASTER_KEY_SETTING, &key())]).unwrap();
        assert!(!format!("{config:?}").contains(&key()));
    }
}
