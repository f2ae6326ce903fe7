//! Core library for Vaultline.
//!
//! Implements the envelope-encryption key hierarchy that protects every
//! secret value:
//!
//! ```text
//! master key (process memory only)
//!   └── organization KEK (stored wrapped under the master key)
//!         └── DEK, one per secret version (stored wrapped under the KEK)
//!               └── secret value (AES-256-GCM ciphertext)
//! ```
//!
//! On top of the hierarchy sit the append-only secret version store, the
//! blind index used for name lookup without decryption, the asynchronous
//! audit dispatcher, and [`service::SecretsService`], which composes them
//! into the create/read/update/list/delete/rollback/rotate operations.
//! Storage is reached only through `vaultline-storage`'s backend trait.

pub mod audit;
pub mod audit_file;
pub mod blind_index;
pub mod cipher;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod models;
pub mod requests;
pub mod service;
pub mod store;
