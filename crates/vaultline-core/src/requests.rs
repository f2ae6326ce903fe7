//! Typed requests and responses for [`SecretsService`](crate::service::SecretsService).
//!
//! Every operation takes one request struct whose required fields are plain
//! fields and whose optional fields are `Option`s, and returns one response
//! type. Anything carrying a plaintext value redacts it from `Debug`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SecretsError;
use crate::models::{Organization, Secret, SecretState, SecretVersion};

/// Longest accepted secret key, in characters.
pub const MAX_KEY_LEN: usize = 256;
/// Longest accepted secret path, in characters.
pub const MAX_PATH_LEN: usize = 1024;
/// Largest accepted secret value, in bytes.
pub const MAX_VALUE_BYTES: usize = 1024 * 1024;
pub const DEFAULT_PAGE_LIMIT: usize = 50;
pub const MAX_PAGE_LIMIT: usize = 500;

const REDACTED: &str = "[REDACTED]";

fn invalid(reason: impl Into<String>) -> SecretsError {
    SecretsError::InvalidRequest(reason.into())
}

fn validate_path(path: &str) -> Result<(), SecretsError> {
    if !path.starts_with('/') {
        return Err(invalid("path must start with '/'"));
    }
    if path.chars().count() > MAX_PATH_LEN {
        return Err(invalid(format!("path exceeds {MAX_PATH_LEN} characters")));
    }
    Ok(())
}

fn validate_key(key: &str) -> Result<(), SecretsError> {
    let len = key.chars().count();
    if len == 0 || len > MAX_KEY_LEN {
        return Err(invalid(format!("key must be 1 to {MAX_KEY_LEN} characters")));
    }
    Ok(())
}

fn validate_value(value: &str) -> Result<(), SecretsError> {
    if value.len() > MAX_VALUE_BYTES {
        return Err(invalid(format!("value exceeds {MAX_VALUE_BYTES} bytes")));
    }
    Ok(())
}

// ── Addressing ───────────────────────────────────────────────────────

/// Addresses the active secret at `(environment, path, key)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretLocator {
    pub organization_id: Uuid,
    pub environment_id: Uuid,
    pub path: String,
    pub key: String,
}

impl SecretLocator {
    /// # Errors
    ///
    /// Returns [`SecretsError::InvalidRequest`] for a malformed path or key.
    pub fn validate(&self) -> Result<(), SecretsError> {
        validate_path(&self.path)?;
        validate_key(&self.key)
    }

    /// `path` and `key` joined for display in logs and audit events.
    #[must_use]
    pub fn display_name(&self) -> String {
        display_name(&self.path, &self.key)
    }
}

pub(crate) fn display_name(path: &str, key: &str) -> String {
    if path.ends_with('/') {
        format!("{path}{key}")
    } else {
        format!("{path}/{key}")
    }
}

// ── Organizations ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrganizationRequest {
    pub name: String,
    pub actor_id: Uuid,
}

impl CreateOrganizationRequest {
    /// # Errors
    ///
    /// Returns [`SecretsError::InvalidRequest`] for a blank name.
    pub fn validate(&self) -> Result<(), SecretsError> {
        if self.name.trim().is_empty() {
            return Err(invalid("organization name must not be empty"));
        }
        Ok(())
    }
}

/// Organization as returned to callers; no key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrganizationSummary {
    pub id: Uuid,
    pub name: String,
    pub kek_version: u32,
    pub created_at: DateTime<Utc>,
    pub kek_rotated_at: Option<DateTime<Utc>>,
}

impl From<&Organization> for OrganizationSummary {
    fn from(org: &Organization) -> Self {
        Self {
            id: org.id,
            name: org.name.clone(),
            kek_version: org.kek_version,
            created_at: org.created_at,
            kek_rotated_at: org.kek_rotated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotateKekRequest {
    pub organization_id: Uuid,
    pub actor_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RotationSummary {
    pub organization_id: Uuid,
    pub previous_version: u32,
    pub new_version: u32,
    /// Number of version DEKs re-wrapped.
    pub rewrapped: usize,
    pub rotated_at: DateTime<Utc>,
}

// ── Secrets: writes ──────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct CreateSecretRequest {
    pub organization_id: Uuid,
    pub project_id: Uuid,
    pub environment_id: Uuid,
    pub path: String,
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub actor_id: Uuid,
}

impl CreateSecretRequest {
    /// # Errors
    ///
    /// Returns [`SecretsError::InvalidRequest`] for a malformed path, key,
    /// or oversized value.
    pub fn validate(&self) -> Result<(), SecretsError> {
        validate_path(&self.path)?;
        validate_key(&self.key)?;
        validate_value(&self.value)
    }
}

impl fmt::Debug for CreateSecretRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateSecretRequest")
            .field("organization_id", &self.organization_id)
            .field("environment_id", &self.environment_id)
            .field("path", &self.path)
            .field("key", &self.key)
            .field("value", &REDACTED)
            .finish_non_exhaustive()
    }
}

/// Change a secret's value, metadata, or both.
///
/// A value change appends a version; a metadata-only change does not.
#[derive(Clone, Serialize, Deserialize)]
pub struct UpdateSecretRequest {
    pub locator: SecretLocator,
    #[serde(default)]
    pub value: Option<String>,
    /// `Some(None)` clears the description.
    #[serde(default)]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    pub actor_id: Uuid,
}

impl UpdateSecretRequest {
    /// # Errors
    ///
    /// Returns [`SecretsError::InvalidRequest`] if the locator is malformed,
    /// the value is oversized, or nothing would change.
    pub fn validate(&self) -> Result<(), SecretsError> {
        self.locator.validate()?;
        if let Some(value) = &self.value {
            validate_value(value)?;
        }
        if self.value.is_none() && self.description.is_none() && self.tags.is_none() {
            return Err(invalid("update changes nothing"));
        }
        Ok(())
    }
}

impl fmt::Debug for UpdateSecretRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateSecretRequest")
            .field("locator", &self.locator)
            .field("value", &self.value.as_ref().map(|_| REDACTED))
            .field("description", &self.description)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackSecretRequest {
    pub locator: SecretLocator,
    pub target_version: u32,
    pub actor_id: Uuid,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    /// Hide the secret and free its tuple; keep every version.
    #[default]
    Soft,
    /// Remove the secret and its whole version chain.
    Permanent,
}

/// Which secret a delete applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteTarget {
    /// The active secret at a tuple.
    Active(SecretLocator),
    /// A secret by id, in any state. Needed to purge a soft-deleted secret.
    ById { organization_id: Uuid, secret_id: Uuid },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteSecretRequest {
    pub target: DeleteTarget,
    #[serde(default)]
    pub mode: DeleteMode,
    pub actor_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    pub secret_id: Uuid,
    pub mode: DeleteMode,
    /// Versions removed; zero for a soft delete.
    pub versions_removed: usize,
}

// ── Secrets: reads ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetSecretRequest {
    pub locator: SecretLocator,
    pub actor_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetSecretVersionRequest {
    pub locator: SecretLocator,
    pub version: u32,
    pub actor_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListVersionsRequest {
    pub locator: SecretLocator,
}

/// Filters for [`ListSecretsRequest`]; all present filters must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretFilter {
    #[serde(default)]
    pub path_prefix: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    /// Case-sensitive substring of the key.
    #[serde(default)]
    pub name_contains: Option<String>,
}

impl SecretFilter {
    #[must_use]
    pub fn matches(&self, secret: &Secret) -> bool {
        self.path_prefix
            .as_deref()
            .is_none_or(|prefix| secret.path.starts_with(prefix))
            && self
                .tag
                .as_deref()
                .is_none_or(|tag| secret.tags.iter().any(|t| t == tag))
            && self
                .name_contains
                .as_deref()
                .is_none_or(|needle| secret.key.contains(needle))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListSecretsRequest {
    pub organization_id: Uuid,
    pub environment_id: Uuid,
    #[serde(default)]
    pub filter: SecretFilter,
    #[serde(default)]
    pub page: PageRequest,
    #[serde(default)]
    pub include_values: bool,
    pub actor_id: Uuid,
}

impl ListSecretsRequest {
    /// # Errors
    ///
    /// Returns [`SecretsError::InvalidRequest`] for a page limit outside
    /// `1..=MAX_PAGE_LIMIT`.
    pub fn validate(&self) -> Result<(), SecretsError> {
        if self.page.limit == 0 || self.page.limit > MAX_PAGE_LIMIT {
            return Err(invalid(format!("page limit must be 1 to {MAX_PAGE_LIMIT}")));
        }
        Ok(())
    }
}

/// Exact-name lookup through the blind index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindByNameRequest {
    pub organization_id: Uuid,
    pub environment_id: Uuid,
    pub key: String,
}

impl FindByNameRequest {
    /// # Errors
    ///
    /// Returns [`SecretsError::InvalidRequest`] for a malformed key.
    pub fn validate(&self) -> Result<(), SecretsError> {
        validate_key(&self.key)
    }
}

// ── Responses ────────────────────────────────────────────────────────

/// A secret without its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretMetadata {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub project_id: Uuid,
    pub environment_id: Uuid,
    pub path: String,
    pub key: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub state: SecretState,
    pub current_version: u32,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Secret> for SecretMetadata {
    fn from(secret: &Secret) -> Self {
        Self {
            id: secret.id,
            organization_id: secret.organization_id,
            project_id: secret.project_id,
            environment_id: secret.environment_id,
            path: secret.path.clone(),
            key: secret.key.clone(),
            description: secret.description.clone(),
            tags: secret.tags.clone(),
            state: secret.state(),
            current_version: secret.current_version,
            created_by: secret.created_by,
            created_at: secret.created_at,
            updated_at: secret.updated_at,
        }
    }
}

/// A decrypted secret version.
#[derive(Clone, Serialize)]
pub struct SecretWithValue {
    pub metadata: SecretMetadata,
    pub value: String,
    /// The version that was decrypted.
    pub version: u32,
    /// KEK version that wrapped the decrypted version's DEK.
    pub kek_version: u32,
}

impl fmt::Debug for SecretWithValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretWithValue")
            .field("metadata", &self.metadata)
            .field("value", &REDACTED)
            .field("version", &self.version)
            .field("kek_version", &self.kek_version)
            .finish()
    }
}

#[derive(Clone, Serialize)]
pub struct ListedSecret {
    pub metadata: SecretMetadata,
    /// Present only when values were requested.
    pub value: Option<String>,
}

impl fmt::Debug for ListedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListedSecret")
            .field("metadata", &self.metadata)
            .field("value", &self.value.as_ref().map(|_| REDACTED))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SecretPage {
    pub items: Vec<ListedSecret>,
    /// Matching secrets across all pages.
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

/// Version metadata; never includes ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionSummary {
    pub id: Uuid,
    pub version: u32,
    pub kek_version: u32,
    pub algorithm: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub rolled_back_from: Option<u32>,
    pub is_current: bool,
}

impl VersionSummary {
    #[must_use]
    pub fn of(version: &SecretVersion, secret: &Secret) -> Self {
        Self {
            id: version.id,
            version: version.version,
            kek_version: version.kek_version,
            algorithm: version.algorithm.clone(),
            created_by: version.created_by,
            created_at: version.created_at,
            rolled_back_from: version.rolled_back_from,
            is_current: secret.points_at(version),
        }
    }
}
