//! Per-secret envelope encryption.
//!
//! Each secret version gets its own DEK. The DEK encrypts the value, the
//! organization KEK wraps the DEK, and the raw DEK is wiped before the call
//! returns. Rotation only ever touches the wrap ([`rewrap_dek`]), never the
//! value ciphertext.

use crate::crypto::{self, EncryptionKey, IV_LEN, Sealed, TAG_LEN, WrappedKey};
use crate::error::CipherError;

/// Identifier persisted with every version encrypted by this module.
pub const ALGORITHM: &str = "aes-256-gcm";

/// Everything needed to decrypt one secret version, given its org KEK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedBundle {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_LEN],
    pub auth_tag: [u8; TAG_LEN],
    pub encrypted_dek: WrappedKey,
    pub algorithm: String,
    /// Version of the KEK that wraps `encrypted_dek`.
    pub key_version: u32,
}

/// Encrypt `plaintext` under a fresh DEK wrapped by `org_kek`.
///
/// # Errors
///
/// Returns [`CipherError::Encryption`] if the value cannot be encrypted or
/// the DEK cannot be wrapped.
pub fn encrypt_secret(
    plaintext: &str,
    org_kek: &EncryptionKey,
    kek_version: u32,
) -> Result<EncryptedBundle, CipherError> {
    let dek = EncryptionKey::generate();

    let sealed = crypto::encrypt(&dek, plaintext.as_bytes()).map_err(|e| CipherError::Encryption {
        reason: e.to_string(),
    })?;
    let encrypted_dek = crypto::wrap_key(org_kek, &dek).map_err(|e| CipherError::Encryption {
        reason: format!("dek wrap: {e}"),
    })?;

    Ok(EncryptedBundle {
        ciphertext: sealed.ciphertext,
        iv: sealed.iv,
        auth_tag: sealed.auth_tag,
        encrypted_dek,
        algorithm: ALGORITHM.to_owned(),
        key_version: kek_version,
    })
}

/// Unwrap the bundle's DEK with `org_kek` and decrypt the value.
///
/// # Errors
///
/// - [`CipherError::UnsupportedAlgorithm`] for an unknown algorithm id.
/// - [`CipherError::Decryption`] if the DEK does not unwrap, the value does
///   not verify, or the plaintext is not UTF-8.
pub fn decrypt_secret(bundle: &EncryptedBundle, org_kek: &EncryptionKey) -> Result<String, CipherError> {
    if bundle.algorithm != ALGORITHM {
        return Err(CipherError::UnsupportedAlgorithm {
            algorithm: bundle.algorithm.clone(),
        });
    }

    let dek = crypto::unwrap_key(org_kek, &bundle.encrypted_dek).map_err(|e| {
        CipherError::Decryption {
            reason: format!("dek unwrap: {e}"),
        }
    })?;

    let sealed = Sealed {
        iv: bundle.iv,
        ciphertext: bundle.ciphertext.clone(),
        auth_tag: bundle.auth_tag,
    };
    let plaintext = crypto::decrypt(&dek, &sealed).map_err(|e| CipherError::Decryption {
        reason: e.to_string(),
    })?;

    std::str::from_utf8(&plaintext)
        .map(str::to_owned)
        .map_err(|_| CipherError::Decryption {
            reason: "value is not valid UTF-8".to_owned(),
        })
}

/// Move one wrapped DEK from `old_kek` to `new_kek`.
///
/// # Errors
///
/// Returns [`CipherError::Decryption`] if the DEK does not unwrap under
/// `old_kek`, or [`CipherError::Encryption`] if re-wrapping fails.
pub fn rewrap_dek(
    encrypted_dek: &WrappedKey,
    old_kek: &EncryptionKey,
    new_kek: &EncryptionKey,
) -> Result<WrappedKey, CipherError> {
    let dek = crypto::unwrap_key(old_kek, encrypted_dek).map_err(|e| CipherError::Decryption {
        reason: format!("dek unwrap: {e}"),
    })?;
    crypto::wrap_key(new_kek, &dek).map_err(|e| CipherError::Encryption {
        reason: format!("dek wrap: {e}"),
    })
}
