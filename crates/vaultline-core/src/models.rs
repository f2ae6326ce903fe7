//! Persisted records.
//!
//! Organizations, secrets, and secret versions as they are stored by
//! [`SecretStore`](crate::store::SecretStore). All IDs are UUIDs. Values
//! only ever appear here as ciphertext; keys only ever appear wrapped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cipher::EncryptedBundle;
use crate::crypto::{Sealed, WrappedKey};
use crate::error::CipherError;

// ── Organizations ────────────────────────────────────────────────────

/// An organization (tenant) and its wrapped KEK.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    /// KEK wrapped under the master key.
    pub encrypted_kek: WrappedKey,
    /// Strictly increasing; bumped by every rotation.
    pub kek_version: u32,
    /// Hex-encoded blind-index salt, unique across organizations.
    pub blind_index_salt: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub kek_rotated_at: Option<DateTime<Utc>>,
}

// ── Secrets ──────────────────────────────────────────────────────────

/// Lifecycle state of a secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretState {
    Active,
    SoftDeleted,
}

/// A secret's identity, metadata, and pointer to its current version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secret {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub project_id: Uuid,
    pub environment_id: Uuid,
    pub path: String,
    pub key: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub blind_index: String,
    pub current_version: u32,
    pub current_version_id: Uuid,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Secret {
    #[must_use]
    pub fn state(&self) -> SecretState {
        if self.deleted_at.is_some() {
            SecretState::SoftDeleted
        } else {
            SecretState::Active
        }
    }

    /// Whether `version` is the row `current_version_id` points at.
    #[must_use]
    pub fn points_at(&self, version: &SecretVersion) -> bool {
        version.secret_id == self.id
            && version.id == self.current_version_id
            && version.version == self.current_version
    }
}

/// One immutable version of a secret value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretVersion {
    pub id: Uuid,
    pub secret_id: Uuid,
    pub version: u32,
    /// Hex-encoded value ciphertext.
    pub encrypted_value: String,
    /// Hex-encoded 16-byte IV.
    pub iv: String,
    /// Hex-encoded 16-byte authentication tag.
    pub auth_tag: String,
    /// DEK wrapped under the organization KEK.
    pub encrypted_dek: WrappedKey,
    pub algorithm: String,
    /// Version of the KEK that wraps `encrypted_dek`.
    pub kek_version: u32,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    /// Set when this version was produced by rolling back to an older one.
    #[serde(default)]
    pub rolled_back_from: Option<u32>,
}

impl SecretVersion {
    /// Build a new version record from a freshly encrypted bundle.
    #[must_use]
    pub fn from_bundle(secret_id: Uuid, version: u32, bundle: EncryptedBundle, created_by: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            secret_id,
            version,
            encrypted_value: hex::encode(&bundle.ciphertext),
            iv: hex::encode(bundle.iv),
            auth_tag: hex::encode(bundle.auth_tag),
            encrypted_dek: bundle.encrypted_dek,
            algorithm: bundle.algorithm,
            kek_version: bundle.key_version,
            created_by,
            created_at: Utc::now(),
            rolled_back_from: None,
        }
    }

    /// Copy this version's ciphertext and wrap verbatim into a new version.
    #[must_use]
    pub fn duplicate_as(&self, version: u32, created_by: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            version,
            created_by,
            created_at: Utc::now(),
            rolled_back_from: Some(self.version),
            ..self.clone()
        }
    }

    /// Decode the stored fields back into a decryptable bundle.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::Decryption`] if a field is not valid hex or
    /// has the wrong length.
    pub fn bundle(&self) -> Result<EncryptedBundle, CipherError> {
        let decode = |field: &str, name: &str| {
            hex::decode(field).map_err(|e| CipherError::Decryption {
                reason: format!("stored {name} is not valid hex: {e}"),
            })
        };
        let sealed = Sealed::from_parts(
            &decode(&self.iv, "iv")?,
            decode(&self.encrypted_value, "value")?,
            &decode(&self.auth_tag, "auth tag")?,
        )
        .map_err(|e| CipherError::Decryption {
            reason: e.to_string(),
        })?;

        Ok(EncryptedBundle {
            ciphertext: sealed.ciphertext,
            iv: sealed.iv,
            auth_tag: sealed.auth_tag,
            encrypted_dek: self.encrypted_dek.clone(),
            algorithm: self.algorithm.clone(),
            key_version: self.kek_version,
        })
    }
}
