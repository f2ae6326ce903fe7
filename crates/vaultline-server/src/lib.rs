//! Vaultline server host.
//!
//! Loads configuration, initializes logging, opens the storage backend, and
//! starts the audit worker, then holds a ready [`SecretsService`] for the
//! in-process HTTP layer to call.
//!
//! [`SecretsService`]: vaultline_core::service::SecretsService

pub mod config;
pub mod state;
