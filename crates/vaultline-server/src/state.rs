//! Shared application state for the Vaultline server.
//!
//! A single [`AppState`] is constructed at startup and shared with the
//! request layer via `Arc`.

use std::sync::Arc;

use vaultline_core::service::SecretsService;

/// Shared application state passed to every request handler.
#[derive(Debug)]
pub struct AppState {
    /// Every secret and organization operation.
    pub secrets: Arc<SecretsService>,
}
