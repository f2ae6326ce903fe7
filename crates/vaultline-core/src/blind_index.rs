//! Blind index for secret-name lookup without decryption.
//!
//! A blind index token is `Argon2id(name, salt = org salt, secret = pepper)`,
//! hex encoded. The pepper is derived from the master key, so a stolen
//! database alone cannot be used to brute-force names offline, and the
//! per-organization salt keeps equal names in different tenants from
//! producing equal tokens.

use aes_gcm::aead::OsRng;
use aes_gcm::aead::rand_core::RngCore;
use argon2::{Algorithm, Argon2, Params, Version};
use tracing::warn;

use crate::crypto::EncryptionKey;
use crate::error::BlindIndexError;

/// Length of a per-organization salt (bytes).
pub const SALT_LEN: usize = 16;

/// Length of a derived token before hex encoding (bytes).
pub const TOKEN_LEN: usize = 32;

const RECOMMENDED_MEMORY_KIB: u32 = 19_456;
const RECOMMENDED_ITERATIONS: u32 = 2;

/// Argon2id cost parameters for blind index derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlindIndexParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for BlindIndexParams {
    fn default() -> Self {
        Self {
            memory_kib: RECOMMENDED_MEMORY_KIB,
            iterations: RECOMMENDED_ITERATIONS,
            parallelism: 1,
        }
    }
}

impl BlindIndexParams {
    /// Check the parameters and build the Argon2 parameter set.
    ///
    /// Values below the recommended production cost are accepted with a
    /// warning; values Argon2 itself rejects are an error.
    ///
    /// # Errors
    ///
    /// Returns [`BlindIndexError::InvalidParams`] if Argon2 rejects the
    /// combination (e.g. zero iterations, memory below `8 * parallelism`).
    pub fn validate(&self) -> Result<Params, BlindIndexError> {
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(TOKEN_LEN),
        )
        .map_err(|e| BlindIndexError::InvalidParams {
            reason: e.to_string(),
        })?;

        if self.memory_kib < RECOMMENDED_MEMORY_KIB {
            warn!(
                memory_kib = self.memory_kib,
                recommended = RECOMMENDED_MEMORY_KIB,
                "blind index memory cost below recommended production value"
            );
        }
        if self.iterations < RECOMMENDED_ITERATIONS {
            warn!(
                iterations = self.iterations,
                recommended = RECOMMENDED_ITERATIONS,
                "blind index iterations below recommended production value"
            );
        }
        Ok(params)
    }
}

/// Generate a random per-organization salt.
#[must_use]
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Derives deterministic, non-invertible name tokens.
pub struct BlindIndexer {
    pepper: EncryptionKey,
    params: Params,
}

impl BlindIndexer {
    /// # Errors
    ///
    /// Returns [`BlindIndexError::InvalidParams`] if `params` do not validate.
    pub fn new(pepper: EncryptionKey, params: BlindIndexParams) -> Result<Self, BlindIndexError> {
        Ok(Self {
            pepper,
            params: params.validate()?,
        })
    }

    /// Derive the blind index token for `name` within one organization.
    ///
    /// CPU- and memory-hard; call from a blocking context.
    ///
    /// # Errors
    ///
    /// Returns [`BlindIndexError::Derivation`] if Argon2 fails (e.g. the
    /// salt is shorter than 8 bytes).
    pub fn create_blind_index(&self, name: &str, org_salt: &[u8]) -> Result<String, BlindIndexError> {
        let argon2 = Argon2::new_with_secret(
            self.pepper.as_bytes(),
            Algorithm::Argon2id,
            Version::V0x13,
            self.params.clone(),
        )
        .map_err(|e| BlindIndexError::Derivation {
            reason: e.to_string(),
        })?;

        let mut token = [0u8; TOKEN_LEN];
        argon2
            .hash_password_into(name.as_bytes(), org_salt, &mut token)
            .map_err(|e| BlindIndexError::Derivation {
                reason: e.to_string(),
            })?;
        Ok(hex::encode(token))
    }
}

impl std::fmt::Debug for BlindIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlindIndexer")
            .field("pepper", &"[REDACTED]")
            .field("memory_kib", &self.params.m_cost())
            .field("iterations", &self.params.t_cost())
            .finish_non_exhaustive()
    }
}
