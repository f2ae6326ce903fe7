//! Authenticated-encryption primitive for Vaultline.
//!
//! Every wrap and every value encryption in the key hierarchy goes through
//! [`encrypt`] / [`decrypt`]: AES-256-GCM with a 16-byte IV and a detached
//! 16-byte tag. Key material lives in [`EncryptionKey`], which is zeroized on
//! drop and redacted in `Debug`.
//!
//! # Security model
//!
//! - Every encryption draws a fresh IV from `OsRng`; an IV is never reused
//!   under one key.
//! - Decryption verifies the tag before releasing any plaintext. On failure
//!   the caller gets [`CryptoError::Authentication`] and nothing else.
//! - Wrapped keys are persisted as `iv:authTag:ciphertext`, each field hex
//!   encoded on its own ([`WrappedKey`]).

use std::fmt;

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{AeadInPlace, KeyInit, OsRng};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Key, Nonce, Tag};
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;

/// Key length for AES-256 (bytes).
pub const KEY_LEN: usize = 32;

/// IV length (bytes).
pub const IV_LEN: usize = 16;

/// Authentication tag length (bytes).
pub const TAG_LEN: usize = 16;

/// AES-256-GCM with a 128-bit nonce.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// A 256-bit key that is zeroized on drop.
///
/// Used for the master key, organization KEKs, and DEKs alike. Deliberately
/// not `Clone`: a key has exactly one owner and is wiped when that owner
/// goes out of scope, on success and error paths alike.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    /// Create a key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Copy a key out of a slice.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] unless `bytes` is exactly
    /// 32 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_LEN,
                actual: bytes.len(),
            });
        }
        let mut key = Self([0u8; KEY_LEN]);
        key.0.copy_from_slice(bytes);
        Ok(key)
    }

    /// Generate a new random key using the OS CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut key = Self([0u8; KEY_LEN]);
        OsRng.fill_bytes(&mut key.0);
        key
    }

    /// Borrow the raw key bytes.
    ///
    /// The caller must not log or persist these bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Output of one [`encrypt`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub iv: [u8; IV_LEN],
    pub ciphertext: Vec<u8>,
    pub auth_tag: [u8; TAG_LEN],
}

impl Sealed {
    /// Reassemble a sealed value from separately stored fields.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::MalformedEnvelope`] if the IV or tag has the
    /// wrong length.
    pub fn from_parts(iv: &[u8], ciphertext: Vec<u8>, auth_tag: &[u8]) -> Result<Self, CryptoError> {
        let iv: [u8; IV_LEN] = iv.try_into().map_err(|_| CryptoError::MalformedEnvelope {
            reason: format!("iv must be {IV_LEN} bytes, got {}", iv.len()),
        })?;
        let auth_tag: [u8; TAG_LEN] =
            auth_tag
                .try_into()
                .map_err(|_| CryptoError::MalformedEnvelope {
                    reason: format!("auth tag must be {TAG_LEN} bytes, got {}", auth_tag.len()),
                })?;
        Ok(Self {
            iv,
            ciphertext,
            auth_tag,
        })
    }
}

/// A key wrapped under another key, in `iv:authTag:ciphertext` hex form.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WrappedKey(String);

impl WrappedKey {
    /// Encode a sealed key.
    #[must_use]
    pub fn from_sealed(sealed: &Sealed) -> Self {
        Self(format!(
            "{}:{}:{}",
            hex::encode(sealed.iv),
            hex::encode(sealed.auth_tag),
            hex::encode(&sealed.ciphertext)
        ))
    }

    /// Accept an already-encoded value (e.g. read back from a record).
    #[must_use]
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// Decode into its three fields.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::MalformedEnvelope`] if there are not exactly
    /// three fields, a field is not hex, or the IV/tag length is wrong.
    pub fn to_sealed(&self) -> Result<Sealed, CryptoError> {
        let mut parts = self.0.split(':');
        let (Some(iv), Some(tag), Some(ct), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(CryptoError::MalformedEnvelope {
                reason: "expected iv:authTag:ciphertext".to_owned(),
            });
        };
        let decode = |field: &str, name: &str| {
            hex::decode(field).map_err(|e| CryptoError::MalformedEnvelope {
                reason: format!("{name} is not valid hex: {e}"),
            })
        };
        Sealed::from_parts(&decode(iv, "iv")?, decode(ct, "ciphertext")?, &decode(tag, "auth tag")?)
    }

    /// The encoded string, as persisted.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for WrappedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WrappedKey").field(&self.0).finish()
    }
}

impl fmt::Display for WrappedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn cipher_for(key: &EncryptionKey) -> Aes256Gcm16 {
    Aes256Gcm16::new(Key::<Aes256Gcm16>::from_slice(key.as_bytes()))
}

/// Encrypt plaintext under `key` with a fresh random IV.
///
/// # Errors
///
/// Returns [`CryptoError::Encryption`] if the AEAD operation fails.
pub fn encrypt(key: &EncryptionKey, plaintext: &[u8]) -> Result<Sealed, CryptoError> {
    let cipher = cipher_for(key);
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    // Holds plaintext (possibly a raw key) until encryption succeeds.
    let mut buffer = Zeroizing::new(plaintext.to_vec());
    let tag = cipher
        .encrypt_in_place_detached(Nonce::<U16>::from_slice(&iv), b"", &mut *buffer)
        .map_err(|e| CryptoError::Encryption {
            reason: e.to_string(),
        })?;

    let mut auth_tag = [0u8; TAG_LEN];
    auth_tag.copy_from_slice(&tag);
    Ok(Sealed {
        iv,
        ciphertext: std::mem::take(&mut *buffer),
        auth_tag,
    })
}

/// Decrypt a value produced by [`encrypt`].
///
/// The returned buffer is wiped when dropped.
///
/// # Errors
///
/// Returns [`CryptoError::Authentication`] if the tag does not verify
/// (wrong key, corrupted ciphertext, or tampered tag).
pub fn decrypt(key: &EncryptionKey, sealed: &Sealed) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let cipher = cipher_for(key);
    let mut buffer = Zeroizing::new(sealed.ciphertext.clone());
    cipher
        .decrypt_in_place_detached(
            Nonce::<U16>::from_slice(&sealed.iv),
            b"",
            &mut buffer[..],
            Tag::from_slice(&sealed.auth_tag),
        )
        .map_err(|_| CryptoError::Authentication)?;
    Ok(buffer)
}

/// Wrap `key` under `wrapping_key`.
///
/// # Errors
///
/// Returns [`CryptoError::Encryption`] if the AEAD operation fails.
pub fn wrap_key(wrapping_key: &EncryptionKey, key: &EncryptionKey) -> Result<WrappedKey, CryptoError> {
    let sealed = encrypt(wrapping_key, key.as_bytes())?;
    Ok(WrappedKey::from_sealed(&sealed))
}

/// Unwrap a key produced by [`wrap_key`].
///
/// # Errors
///
/// - [`CryptoError::MalformedEnvelope`] if the encoding is broken.
/// - [`CryptoError::Authentication`] if the wrapping key is wrong or the
///   envelope was tampered with.
/// - [`CryptoError::InvalidKeyLength`] if the plaintext is not a 32-byte key.
pub fn unwrap_key(wrapping_key: &EncryptionKey, wrapped: &WrappedKey) -> Result<EncryptionKey, CryptoError> {
    let sealed = wrapped.to_sealed()?;
    let raw = decrypt(wrapping_key, &sealed)?;
    EncryptionKey::from_slice(&raw)
}

/// Derive a purpose-bound subkey from a root key using HKDF-SHA256.
///
/// The `info` string must be unique per purpose (e.g. `b"vaultline-blind-index-v1"`).
///
/// # Errors
///
/// Returns [`CryptoError::KeyDerivation`] if HKDF expansion fails (only
/// possible if output length exceeds 255 * hash length).
pub fn derive_key(
    root_key: &EncryptionKey,
    salt: Option<&[u8]>,
    info: &[u8],
) -> Result<EncryptionKey, CryptoError> {
    let hk = Hkdf::<Sha256>::new(salt, root_key.as_bytes());
    let mut derived = EncryptionKey::from_bytes([0u8; KEY_LEN]);
    hk.expand(info, &mut derived.0)
        .map_err(|e| CryptoError::KeyDerivation {
            context: String::from_utf8_lossy(info).into_owned(),
            reason: e.to_string(),
        })?;
    Ok(derived)
}
