//! Organization key hierarchy.
//!
//! The master key is immutable process-wide configuration. It wraps one KEK
//! per organization; each KEK wraps the DEKs of that organization's secret
//! versions. This module generates, unwraps, and rotates KEKs.
//!
//! # Security model
//!
//! - The master key is never persisted and never rotated at runtime.
//! - A raw KEK only exists inside an [`EncryptionKey`] owned by the calling
//!   operation; it is zeroized when that operation returns, whether it
//!   succeeded or failed.
//! - Unwrap failures fail closed with [`KeyError::Unwrap`]; there is no
//!   plaintext fallback.
//! - Rotation is computed entirely in memory and returned as one
//!   [`KekRotation`]. A single failing DEK aborts the whole rotation and
//!   nothing partial is returned.

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::cipher;
use crate::crypto::{self, EncryptionKey, KEY_LEN, WrappedKey};
use crate::error::{ConfigError, KeyError};

/// HKDF context for the blind-index pepper.
const BLIND_INDEX_INFO: &[u8] = b"vaultline-blind-index-v1";

/// Name of the setting the master key is provisioned from.
pub const MASTER_KEY_SETTING: &str = "VAULTLINE_MASTER_KEY";

/// The root of the key hierarchy.
///
/// Not `Clone`; share it as `Arc<MasterKey>`. Zeroized on drop.
pub struct MasterKey(EncryptionKey);

impl MasterKey {
    /// Construct a master key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(EncryptionKey::from_bytes(bytes))
    }

    /// Parse a provisioned master key: 64 hex characters or the standard
    /// base64 encoding of 32 bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] for an empty value and
    /// [`ConfigError::Invalid`] if the value does not decode to exactly
    /// 32 bytes. The error never echoes the value.
    pub fn from_encoded(value: &str) -> Result<Self, ConfigError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(ConfigError::Missing {
                name: MASTER_KEY_SETTING.to_owned(),
            });
        }

        let decoded = if value.len() == KEY_LEN * 2 && value.bytes().all(|b| b.is_ascii_hexdigit())
        {
            hex::decode(value).map(Zeroizing::new).ok()
        } else {
            BASE64.decode(value).map(Zeroizing::new).ok()
        };

        let Some(bytes) = decoded else {
            return Err(ConfigError::Invalid {
                name: MASTER_KEY_SETTING.to_owned(),
                reason: "expected 64 hex characters or base64".to_owned(),
            });
        };

        EncryptionKey::from_slice(&bytes)
            .map(Self)
            .map_err(|_| ConfigError::Invalid {
                name: MASTER_KEY_SETTING.to_owned(),
                reason: format!("must decode to {KEY_LEN} bytes, got {}", bytes.len()),
            })
    }

    fn key(&self) -> &EncryptionKey {
        &self.0
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A freshly generated organization KEK and its persisted (wrapped) form.
#[derive(Debug)]
pub struct GeneratedKek {
    /// Raw KEK. Zeroized when dropped.
    pub kek: EncryptionKey,
    /// The KEK wrapped under the master key. This is what gets persisted.
    pub encrypted_kek: WrappedKey,
}

/// One wrapped DEK, identified by the secret version that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DekEntry {
    pub version_id: Uuid,
    pub encrypted_dek: WrappedKey,
}

/// The complete result of a KEK rotation, ready to be committed atomically.
#[derive(Debug)]
pub struct KekRotation {
    pub new_encrypted_kek: WrappedKey,
    pub updated_deks: Vec<DekEntry>,
    pub new_version: u32,
}

/// Generates, unwraps, and rotates organization KEKs under the master key.
#[derive(Clone)]
pub struct KeyHierarchy {
    master: Arc<MasterKey>,
}

impl KeyHierarchy {
    #[must_use]
    pub fn new(master: Arc<MasterKey>) -> Self {
        Self { master }
    }

    /// Generate a new random KEK and wrap it under the master key.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Wrap`] if wrapping fails.
    pub fn generate_org_kek(&self) -> Result<GeneratedKek, KeyError> {
        let kek = EncryptionKey::generate();
        let encrypted_kek = crypto::wrap_key(self.master.key(), &kek).map_err(KeyError::Wrap)?;
        Ok(GeneratedKek { kek, encrypted_kek })
    }

    /// Unwrap an organization KEK with the master key.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Unwrap`] if the envelope is corrupt or was wrapped
    /// under a different master key.
    pub fn decrypt_org_kek(&self, encrypted_kek: &WrappedKey) -> Result<EncryptionKey, KeyError> {
        crypto::unwrap_key(self.master.key(), encrypted_kek).map_err(KeyError::Unwrap)
    }

    /// Replace an organization KEK and re-wrap every DEK in `deks` under it.
    ///
    /// Only DEK wraps change; no secret payload is decrypted. Both the old
    /// and the new raw KEK are wiped before this returns.
    ///
    /// # Errors
    ///
    /// - [`KeyError::Unwrap`] if the old KEK does not unwrap.
    /// - [`KeyError::Rewrap`] if any DEK does not unwrap under the old KEK;
    ///   the whole rotation is abandoned.
    /// - [`KeyError::VersionOverflow`] if `current_version` is `u32::MAX`.
    pub fn rotate_org_kek(
        &self,
        old_encrypted_kek: &WrappedKey,
        current_version: u32,
        deks: &[DekEntry],
    ) -> Result<KekRotation, KeyError> {
        let new_version = current_version
            .checked_add(1)
            .ok_or(KeyError::VersionOverflow {
                current: current_version,
            })?;

        let old_kek = self.decrypt_org_kek(old_encrypted_kek)?;
        let GeneratedKek {
            kek: new_kek,
            encrypted_kek: new_encrypted_kek,
        } = self.generate_org_kek()?;

        let updated_deks = deks
            .iter()
            .map(|entry| {
                cipher::rewrap_dek(&entry.encrypted_dek, &old_kek, &new_kek)
                    .map(|encrypted_dek| DekEntry {
                        version_id: entry.version_id,
                        encrypted_dek,
                    })
                    .map_err(|e| KeyError::Rewrap {
                        version_id: entry.version_id,
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(KekRotation {
            new_encrypted_kek,
            updated_deks,
            new_version,
        })
    }

    /// Derive the secret key mixed into every blind index.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Derivation`] if HKDF expansion fails.
    pub fn blind_index_pepper(&self) -> Result<EncryptionKey, KeyError> {
        crypto::derive_key(self.master.key(), None, BLIND_INDEX_INFO).map_err(KeyError::Derivation)
    }
}

impl fmt::Debug for KeyHierarchy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyHierarchy")
            .field("master", &self.master)
            .finish()
    }
}
