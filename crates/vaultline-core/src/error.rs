//! Error types for `vaultline-core`.
//!
//! Each error variant carries enough context to diagnose the problem without
//! a debugger. No variant ever carries plaintext secret values or key bytes,
//! only identifiers, lengths, and operation descriptions.

use uuid::Uuid;
use vaultline_storage::StorageError;

/// Errors from the authenticated-encryption primitive.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// AES-256-GCM encryption failed.
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },

    /// Tag verification failed: wrong key, corrupted ciphertext, or tampered tag.
    #[error("authentication failed: ciphertext or tag did not verify")]
    Authentication,

    /// An `iv:authTag:ciphertext` envelope or a raw field had the wrong shape.
    #[error("malformed envelope: {reason}")]
    MalformedEnvelope { reason: String },

    /// Decrypted key material had the wrong length.
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// HKDF key derivation failed.
    #[error("key derivation failed for context '{context}': {reason}")]
    KeyDerivation { context: String, reason: String },
}

/// Errors from the organization key hierarchy.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// The wrapped KEK could not be unwrapped with the master key.
    #[error("failed to unwrap organization KEK: {0}")]
    Unwrap(#[source] CryptoError),

    /// A freshly generated key could not be wrapped.
    #[error("failed to wrap key: {0}")]
    Wrap(#[source] CryptoError),

    /// A DEK could not be moved from the old KEK to the new one.
    #[error("failed to re-wrap DEK of version {version_id}: {reason}")]
    Rewrap { version_id: Uuid, reason: String },

    /// The KEK version counter cannot advance any further.
    #[error("KEK version {current} cannot be incremented")]
    VersionOverflow { current: u32 },

    /// Subkey derivation from the master key failed.
    #[error("master key derivation failed: {0}")]
    Derivation(#[source] CryptoError),
}

/// Errors from per-secret encryption and decryption.
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    /// The value could not be encrypted or its DEK could not be wrapped.
    #[error("secret encryption failed: {reason}")]
    Encryption { reason: String },

    /// The DEK did not unwrap or the value did not verify.
    #[error("secret decryption failed: {reason}")]
    Decryption { reason: String },

    /// The stored bundle names an algorithm this build does not implement.
    #[error("unsupported algorithm '{algorithm}'")]
    UnsupportedAlgorithm { algorithm: String },
}

/// Errors from blind index derivation.
#[derive(Debug, thiserror::Error)]
pub enum BlindIndexError {
    /// The Argon2 cost parameters are not usable.
    #[error("invalid blind index parameters: {reason}")]
    InvalidParams { reason: String },

    /// The Argon2 derivation itself failed (e.g. salt too short).
    #[error("blind index derivation failed: {reason}")]
    Derivation { reason: String },
}

/// Configuration errors. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required setting was not provided.
    #[error("missing required setting '{name}'")]
    Missing { name: String },

    /// A setting was provided but could not be used.
    #[error("invalid setting '{name}': {reason}")]
    Invalid { name: String, reason: String },
}

/// Errors from the secret version store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An active secret already occupies `(environment, path, key)`.
    #[error("active secret already exists at environment {environment_id}, path '{path}', key '{key}'")]
    Conflict {
        environment_id: Uuid,
        path: String,
        key: String,
    },

    /// A record that must exist was not found.
    #[error("{what} not found")]
    NotFound { what: String },

    /// The organization's blind-index salt is already registered to another organization.
    #[error("blind index salt collides with an existing organization")]
    SaltCollision,

    /// A stored record could not be (de)serialized.
    #[error("corrupt record at '{key}': {reason}")]
    Corrupt { key: String, reason: String },

    /// The underlying storage backend returned an error.
    #[error("store backend error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors from audit sinks.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// A specific audit sink failed to accept an event.
    #[error("audit sink '{name}' failed: {reason}")]
    BackendFailure { name: String, reason: String },

    /// Serialization of the audit event failed.
    #[error("audit serialization failed: {reason}")]
    Serialization { reason: String },
}

/// Errors returned by [`SecretsService`](crate::service::SecretsService).
#[derive(Debug, thiserror::Error)]
pub enum SecretsError {
    /// An active secret already exists at the requested tuple.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The secret, version, or organization does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The organization KEK failed to unwrap under the master key.
    #[error("key unwrap failed: {0}")]
    KeyUnwrap(String),

    /// A secret value failed verification.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Missing or malformed configuration.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// The request itself is invalid.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The persistence layer failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// An internal invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for SecretsError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { .. } => Self::Conflict(err.to_string()),
            StoreError::NotFound { what } => Self::NotFound(what),
            StoreError::SaltCollision | StoreError::Corrupt { .. } => {
                Self::Internal(err.to_string())
            }
            StoreError::Storage(e) => Self::Storage(e.to_string()),
        }
    }
}

impl From<KeyError> for SecretsError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::Unwrap(_) => Self::KeyUnwrap(err.to_string()),
            KeyError::Rewrap { .. } => Self::Decryption(err.to_string()),
            KeyError::Wrap(_) | KeyError::VersionOverflow { .. } | KeyError::Derivation(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<CipherError> for SecretsError {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::Decryption { .. } | CipherError::UnsupportedAlgorithm { .. } => {
                Self::Decryption(err.to_string())
            }
            CipherError::Encryption { .. } => Self::Internal(err.to_string()),
        }
    }
}

impl From<BlindIndexError> for SecretsError {
    fn from(err: BlindIndexError) -> Self {
        Self::Internal(err.to_string())
    }
}
