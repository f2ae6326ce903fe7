//! Secrets service.
//!
//! [`SecretsService`] is the single entry point an outer layer calls. It
//! composes the key hierarchy, per-secret cipher, blind indexer, version
//! store, and audit dispatcher into the secret lifecycle:
//!
//! ```text
//! ACTIVE ──delete(soft)──> SOFT_DELETED ──delete(permanent)──> PURGED
//!   │                                                             ^
//!   └──────────────────────delete(permanent)──────────────────────┘
//! ```
//!
//! Every operation unwraps the organization KEK for its own duration only;
//! there is no key cache. Every mutation commits through one store
//! transaction, and its audit event is emitted only after the commit.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vaultline_storage::StorageBackend;

use crate::audit::{AuditAction, AuditDispatcher, AuditEvent, ResourceType};
use crate::blind_index::{self, BlindIndexParams, BlindIndexer};
use crate::cipher;
use crate::crypto::EncryptionKey;
use crate::error::{SecretsError, StoreError};
use crate::keys::{DekEntry, GeneratedKek, KeyHierarchy, MasterKey};
use crate::models::{Organization, Secret, SecretVersion};
use crate::requests::{
    CreateOrganizationRequest, CreateSecretRequest, DeleteMode, DeleteOutcome, DeleteSecretRequest,
    DeleteTarget, FindByNameRequest, GetSecretRequest, GetSecretVersionRequest, ListSecretsRequest,
    ListVersionsRequest, ListedSecret, OrganizationSummary, RollbackSecretRequest, RotateKekRequest,
    RotationSummary, SecretLocator, SecretMetadata, SecretPage, SecretWithValue, UpdateSecretRequest,
    VersionSummary, display_name,
};
use crate::store::SecretStore;

/// Fresh salts to try before giving up on a salt collision.
const SALT_ATTEMPTS: u32 = 3;

/// Orchestrates every secret operation. Share it as `Arc<SecretsService>`.
pub struct SecretsService {
    keys: KeyHierarchy,
    indexer: Arc<BlindIndexer>,
    store: SecretStore,
    audit: AuditDispatcher,
}

impl SecretsService {
    /// # Errors
    ///
    /// Returns [`SecretsError::Internal`] if the blind-index pepper cannot be
    /// derived or `blind_index` is rejected by Argon2.
    pub fn new(
        master: Arc<MasterKey>,
        backend: Arc<dyn StorageBackend>,
        blind_index: BlindIndexParams,
        audit: AuditDispatcher,
    ) -> Result<Self, SecretsError> {
        let keys = KeyHierarchy::new(master);
        let indexer = BlindIndexer::new(keys.blind_index_pepper()?, blind_index)?;
        Ok(Self {
            keys,
            indexer: Arc::new(indexer),
            store: SecretStore::new(backend),
            audit,
        })
    }

    // ── Organizations ────────────────────────────────────────────────

    /// Create an organization with a fresh KEK (version 1) and a unique
    /// blind-index salt.
    ///
    /// # Errors
    ///
    /// Returns [`SecretsError::InvalidRequest`] for a blank name, or a
    /// storage/internal error if persisting fails.
    pub async fn create_organization(
        &self,
        request: CreateOrganizationRequest,
    ) -> Result<OrganizationSummary, SecretsError> {
        request.validate()?;

        let GeneratedKek { kek, encrypted_kek } = self.keys.generate_org_kek()?;
        drop(kek);

        let now = Utc::now();
        let mut org = Organization {
            id: Uuid::new_v4(),
            name: request.name,
            encrypted_kek,
            kek_version: 1,
            blind_index_salt: hex::encode(blind_index::generate_salt()),
            created_at: now,
            updated_at: now,
            kek_rotated_at: None,
        };

        let mut txn = self.store.begin().await;
        let mut attempt = 1;
        loop {
            match txn.insert_organization(&org).await {
                Ok(()) => break,
                Err(StoreError::SaltCollision) if attempt < SALT_ATTEMPTS => {
                    warn!(attempt, "blind index salt collision; regenerating");
                    org.blind_index_salt = hex::encode(blind_index::generate_salt());
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
        txn.commit().await?;

        info!(organization_id = %org.id, "organization created");
        self.audit.emit(AuditEvent::new(
            org.id,
            request.actor_id,
            AuditAction::OrganizationCreate,
            ResourceType::Organization,
            org.id,
            org.name.clone(),
        ));
        Ok(OrganizationSummary::from(&org))
    }

    /// Replace the organization KEK and re-wrap the DEK of every version of
    /// every secret in the organization, soft-deleted secrets included.
    ///
    /// Runs under the store's write lock from the first read to the commit,
    /// so no version can be written under the old KEK in between. Any
    /// failure leaves the organization on its previous KEK.
    ///
    /// # Errors
    ///
    /// - [`SecretsError::NotFound`] if the organization does not exist.
    /// - [`SecretsError::KeyUnwrap`] if the current KEK does not unwrap.
    /// - [`SecretsError::Decryption`] if any DEK does not unwrap under it.
    pub async fn rotate_org_kek(&self, request: RotateKekRequest) -> Result<RotationSummary, SecretsError> {
        let mut txn = self.store.begin().await;
        let mut org = txn.organization(request.organization_id).await?;

        let mut versions = Vec::new();
        for secret in txn.organization_secrets(org.id).await? {
            versions.extend(txn.versions(secret.id).await?);
        }
        let deks: Vec<DekEntry> = versions
            .iter()
            .map(|v| DekEntry {
                version_id: v.id,
                encrypted_dek: v.encrypted_dek.clone(),
            })
            .collect();

        let rotation = self
            .keys
            .rotate_org_kek(&org.encrypted_kek, org.kek_version, &deks)?;

        let rewrapped = rotation.updated_deks.len();
        for (mut version, entry) in versions.into_iter().zip(rotation.updated_deks) {
            if version.id != entry.version_id {
                return Err(SecretsError::Internal(
                    "rotation returned DEKs out of order".to_owned(),
                ));
            }
            version.encrypted_dek = entry.encrypted_dek;
            version.kek_version = rotation.new_version;
            txn.put_version(&version)?;
        }

        let previous_version = org.kek_version;
        let now = Utc::now();
        org.encrypted_kek = rotation.new_encrypted_kek;
        org.kek_version = rotation.new_version;
        org.kek_rotated_at = Some(now);
        org.updated_at = now;
        txn.put_organization(&org)?;
        txn.commit().await?;

        info!(
            organization_id = %org.id,
            previous_version,
            new_version = org.kek_version,
            rewrapped,
            "organization KEK rotated"
        );
        self.audit.emit(
            AuditEvent::new(
                org.id,
                request.actor_id,
                AuditAction::KekRotate,
                ResourceType::Organization,
                org.id,
                org.name.clone(),
            )
            .with_metadata(json!({
                "previous_version": previous_version,
                "new_version": org.kek_version,
                "rewrapped": rewrapped,
            })),
        );

        Ok(RotationSummary {
            organization_id: org.id,
            previous_version,
            new_version: org.kek_version,
            rewrapped,
            rotated_at: now,
        })
    }

    // ── Secret writes ────────────────────────────────────────────────

    /// Create a secret with version 1.
    ///
    /// # Errors
    ///
    /// - [`SecretsError::InvalidRequest`] for a malformed path, key, or value.
    /// - [`SecretsError::NotFound`] if the organization does not exist.
    /// - [`SecretsError::Conflict`] if an active secret occupies the tuple.
    pub async fn create_secret(&self, request: CreateSecretRequest) -> Result<SecretMetadata, SecretsError> {
        request.validate()?;

        let salt = self
            .store
            .reader()
            .await
            .organization(request.organization_id)
            .await?
            .blind_index_salt;
        let blind_index = self.blind_index(&request.key, &salt).await?;

        let mut txn = self.store.begin().await;
        let org = txn.organization(request.organization_id).await?;
        let bundle = {
            let kek = self.keys.decrypt_org_kek(&org.encrypted_kek)?;
            cipher::encrypt_secret(&request.value, &kek, org.kek_version)?
        };

        let now = Utc::now();
        let secret_id = Uuid::new_v4();
        let version = SecretVersion::from_bundle(secret_id, 1, bundle, request.actor_id);
        let secret = Secret {
            id: secret_id,
            organization_id: org.id,
            project_id: request.project_id,
            environment_id: request.environment_id,
            path: request.path,
            key: request.key,
            description: request.description,
            tags: request.tags,
            blind_index,
            current_version: 1,
            current_version_id: version.id,
            created_by: request.actor_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        txn.insert_secret(&secret, &version).await?;
        txn.commit().await?;

        debug!(secret_id = %secret.id, "secret created");
        self.audit_secret(&secret, request.actor_id, AuditAction::SecretCreate, json!({ "version": 1 }));
        Ok(SecretMetadata::from(&secret))
    }

    /// Change a secret's value, metadata, or both. A value change appends
    /// version `current_version + 1`; a metadata-only change appends nothing.
    ///
    /// # Errors
    ///
    /// - [`SecretsError::InvalidRequest`] if the request changes nothing.
    /// - [`SecretsError::NotFound`] if no active secret is at the tuple.
    pub async fn update_secret(&self, request: UpdateSecretRequest) -> Result<SecretMetadata, SecretsError> {
        request.validate()?;
        let locator = &request.locator;

        let mut txn = self.store.begin().await;
        let mut secret = require_active(
            txn.find_active(locator.environment_id, &locator.path, &locator.key)
                .await?,
            locator,
        )?;

        let value_changed = request.value.is_some();
        if let Some(value) = &request.value {
            let org = txn.organization(secret.organization_id).await?;
            let next = next_version(&secret)?;
            let bundle = {
                let kek = self.keys.decrypt_org_kek(&org.encrypted_kek)?;
                cipher::encrypt_secret(value, &kek, org.kek_version)?
            };
            let version = SecretVersion::from_bundle(secret.id, next, bundle, request.actor_id);
            txn.put_version(&version)?;
            secret.current_version = next;
            secret.current_version_id = version.id;
        }
        if let Some(description) = request.description {
            secret.description = description;
        }
        if let Some(tags) = request.tags {
            secret.tags = tags;
        }
        secret.updated_at = Utc::now();
        txn.put_secret(&secret)?;
        txn.commit().await?;

        debug!(
            secret_id = %secret.id,
            version = secret.current_version,
            value_changed,
            "secret updated"
        );
        self.audit_secret(
            &secret,
            request.actor_id,
            AuditAction::SecretUpdate,
            json!({ "version": secret.current_version, "value_changed": value_changed }),
        );
        Ok(SecretMetadata::from(&secret))
    }

    /// Append a copy of version `target_version` as `current_version + 1`.
    ///
    /// The ciphertext, IV, tag, and wrapped DEK are copied verbatim; nothing
    /// is decrypted and history is never edited.
    ///
    /// # Errors
    ///
    /// Returns [`SecretsError::NotFound`] if no active secret is at the tuple
    /// or the target version does not exist.
    pub async fn rollback_secret(&self, request: RollbackSecretRequest) -> Result<SecretMetadata, SecretsError> {
        let locator = &request.locator;
        locator.validate()?;

        let mut txn = self.store.begin().await;
        let mut secret = require_active(
            txn.find_active(locator.environment_id, &locator.path, &locator.key)
                .await?,
            locator,
        )?;
        let target = txn
            .version(secret.id, request.target_version)
            .await?
            .ok_or_else(|| {
                SecretsError::NotFound(format!(
                    "version {} of {}",
                    request.target_version,
                    locator.display_name()
                ))
            })?;

        let org = txn.organization(secret.organization_id).await?;
        if target.kek_version != org.kek_version {
            return Err(SecretsError::Internal(format!(
                "version {} is wrapped under KEK version {}, organization is on {}",
                target.version, target.kek_version, org.kek_version
            )));
        }

        let next = next_version(&secret)?;
        let copy = target.duplicate_as(next, request.actor_id);
        txn.put_version(&copy)?;
        secret.current_version = next;
        secret.current_version_id = copy.id;
        secret.updated_at = Utc::now();
        txn.put_secret(&secret)?;
        txn.commit().await?;

        debug!(secret_id = %secret.id, from = target.version, version = next, "secret rolled back");
        self.audit_secret(
            &secret,
            request.actor_id,
            AuditAction::SecretRollback,
            json!({ "from_version": target.version, "version": next }),
        );
        Ok(SecretMetadata::from(&secret))
    }

    /// Soft-delete (default) or permanently delete a secret.
    ///
    /// # Errors
    ///
    /// Returns [`SecretsError::NotFound`] if the target does not exist, or a
    /// soft delete targets an already soft-deleted secret.
    pub async fn delete_secret(&self, request: DeleteSecretRequest) -> Result<DeleteOutcome, SecretsError> {
        let mut txn = self.store.begin().await;
        let mut secret = match &request.target {
            DeleteTarget::Active(locator) => {
                locator.validate()?;
                require_active(
                    txn.find_active(locator.environment_id, &locator.path, &locator.key)
                        .await?,
                    locator,
                )?
            }
            DeleteTarget::ById {
                organization_id,
                secret_id,
            } => txn
                .secret(*secret_id)
                .await?
                .filter(|s| s.organization_id == *organization_id)
                .ok_or_else(|| SecretsError::NotFound(format!("secret {secret_id}")))?,
        };

        let outcome = match request.mode {
            DeleteMode::Soft => {
                if secret.deleted_at.is_some() {
                    return Err(SecretsError::NotFound(format!(
                        "active secret {}",
                        secret.id
                    )));
                }
                let now = Utc::now();
                secret.deleted_at = Some(now);
                secret.updated_at = now;
                txn.soft_delete(&secret)?;
                txn.commit().await?;
                DeleteOutcome {
                    secret_id: secret.id,
                    mode: DeleteMode::Soft,
                    versions_removed: 0,
                }
            }
            DeleteMode::Permanent => {
                let removed = txn.purge(&secret).await?;
                txn.commit().await?;
                DeleteOutcome {
                    secret_id: secret.id,
                    mode: DeleteMode::Permanent,
                    versions_removed: removed,
                }
            }
        };

        info!(secret_id = %secret.id, mode = ?outcome.mode, "secret deleted");
        let action = match outcome.mode {
            DeleteMode::Soft => AuditAction::SecretDelete,
            DeleteMode::Permanent => AuditAction::SecretPurge,
        };
        self.audit_secret(
            &secret,
            request.actor_id,
            action,
            json!({ "versions_removed": outcome.versions_removed }),
        );
        Ok(outcome)
    }

    // ── Secret reads ─────────────────────────────────────────────────

    /// Decrypt the current version of the active secret at a tuple.
    ///
    /// # Errors
    ///
    /// - [`SecretsError::NotFound`] if no active secret is at the tuple.
    /// - [`SecretsError::KeyUnwrap`] / [`SecretsError::Decryption`] if the
    ///   KEK or the value fails verification.
    pub async fn get_secret(&self, request: GetSecretRequest) -> Result<SecretWithValue, SecretsError> {
        let locator = &request.locator;
        locator.validate()?;

        let (org, secret, version) = {
            let reader = self.store.reader().await;
            let secret = require_active(
                reader
                    .find_active(locator.environment_id, &locator.path, &locator.key)
                    .await?,
                locator,
            )?;
            let version = reader
                .version(secret.id, secret.current_version)
                .await?
                .filter(|v| secret.points_at(v))
                .ok_or_else(|| {
                    SecretsError::Internal(format!(
                        "secret {} points at a missing version {}",
                        secret.id, secret.current_version
                    ))
                })?;
            (reader.organization(secret.organization_id).await?, secret, version)
        };

        let value = {
            let kek = self.keys.decrypt_org_kek(&org.encrypted_kek)?;
            open(&kek, &version)?
        };

        self.audit_secret(
            &secret,
            request.actor_id,
            AuditAction::SecretRead,
            json!({ "version": version.version }),
        );
        Ok(SecretWithValue {
            metadata: SecretMetadata::from(&secret),
            value,
            version: version.version,
            kek_version: version.kek_version,
        })
    }

    /// Decrypt a specific historical version of the active secret at a tuple.
    ///
    /// # Errors
    ///
    /// Returns [`SecretsError::NotFound`] if the secret or version is absent,
    /// and decryption errors as for [`get_secret`](Self::get_secret).
    pub async fn get_secret_version(
        &self,
        request: GetSecretVersionRequest,
    ) -> Result<SecretWithValue, SecretsError> {
        let locator = &request.locator;
        locator.validate()?;

        let (org, secret, version) = {
            let reader = self.store.reader().await;
            let secret = require_active(
                reader
                    .find_active(locator.environment_id, &locator.path, &locator.key)
                    .await?,
                locator,
            )?;
            let version = reader
                .version(secret.id, request.version)
                .await?
                .ok_or_else(|| {
                    SecretsError::NotFound(format!(
                        "version {} of {}",
                        request.version,
                        locator.display_name()
                    ))
                })?;
            (reader.organization(secret.organization_id).await?, secret, version)
        };

        let value = {
            let kek = self.keys.decrypt_org_kek(&org.encrypted_kek)?;
            open(&kek, &version)?
        };

        self.audit_secret(
            &secret,
            request.actor_id,
            AuditAction::SecretReadVersion,
            json!({ "version": version.version }),
        );
        Ok(SecretWithValue {
            metadata: SecretMetadata::from(&secret),
            value,
            version: version.version,
            kek_version: version.kek_version,
        })
    }

    /// Version history of the active secret at a tuple, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`SecretsError::NotFound`] if no active secret is at the tuple.
    pub async fn list_versions(&self, request: ListVersionsRequest) -> Result<Vec<VersionSummary>, SecretsError> {
        let locator = &request.locator;
        locator.validate()?;

        let reader = self.store.reader().await;
        let secret = require_active(
            reader
                .find_active(locator.environment_id, &locator.path, &locator.key)
                .await?,
            locator,
        )?;
        Ok(reader
            .versions(secret.id)
            .await?
            .iter()
            .map(|v| VersionSummary::of(v, &secret))
            .collect())
    }

    /// One page of the environment's active secrets, ordered by path then
    /// key. With `include_values`, the organization KEK is unwrapped once
    /// for the whole page.
    ///
    /// # Errors
    ///
    /// Returns [`SecretsError::InvalidRequest`] for a bad page size,
    /// [`SecretsError::NotFound`] for an unknown organization, and
    /// decryption errors if any value on the page fails verification.
    pub async fn list_secrets(&self, request: ListSecretsRequest) -> Result<SecretPage, SecretsError> {
        request.validate()?;

        let reader = self.store.reader().await;
        let org = reader.organization(request.organization_id).await?;
        let mut matching: Vec<Secret> = reader
            .environment_secrets(request.environment_id)
            .await?
            .into_iter()
            .filter(|s| s.organization_id == org.id && request.filter.matches(s))
            .collect();
        matching.sort_by(|a, b| (&a.path, &a.key).cmp(&(&b.path, &b.key)));

        let total = matching.len();
        let page: Vec<Secret> = matching
            .into_iter()
            .skip(request.page.offset)
            .take(request.page.limit)
            .collect();

        let items = if request.include_values && !page.is_empty() {
            let mut versions = Vec::with_capacity(page.len());
            for secret in &page {
                let version = reader
                    .version(secret.id, secret.current_version)
                    .await?
                    .ok_or_else(|| {
                        SecretsError::Internal(format!(
                            "secret {} points at a missing version {}",
                            secret.id, secret.current_version
                        ))
                    })?;
                versions.push(version);
            }
            drop(reader);

            let kek = self.keys.decrypt_org_kek(&org.encrypted_kek)?;
            let items = page
                .iter()
                .zip(&versions)
                .map(|(secret, version)| {
                    Ok(ListedSecret {
                        metadata: SecretMetadata::from(secret),
                        value: Some(open(&kek, version)?),
                    })
                })
                .collect::<Result<Vec<_>, SecretsError>>()?;
            drop(kek);

            self.audit.emit(
                AuditEvent::new(
                    org.id,
                    request.actor_id,
                    AuditAction::SecretList,
                    ResourceType::Secret,
                    request.environment_id,
                    "environment",
                )
                .with_metadata(json!({
                    "secret_ids": page.iter().map(|s| s.id).collect::<Vec<_>>(),
                })),
            );
            items
        } else {
            page.iter()
                .map(|secret| ListedSecret {
                    metadata: SecretMetadata::from(secret),
                    value: None,
                })
                .collect()
        };

        Ok(SecretPage {
            items,
            total,
            offset: request.page.offset,
            limit: request.page.limit,
        })
    }

    /// Active secrets of an environment whose key equals `request.key`,
    /// found through the blind index without reading any names.
    ///
    /// # Errors
    ///
    /// Returns [`SecretsError::NotFound`] for an unknown organization.
    pub async fn find_by_name(&self, request: FindByNameRequest) -> Result<Vec<SecretMetadata>, SecretsError> {
        request.validate()?;

        let salt = self
            .store
            .reader()
            .await
            .organization(request.organization_id)
            .await?
            .blind_index_salt;
        let token = self.blind_index(&request.key, &salt).await?;

        let mut found: Vec<SecretMetadata> = self
            .store
            .reader()
            .await
            .blind_matches(request.environment_id, &token)
            .await?
            .iter()
            .filter(|s| s.organization_id == request.organization_id)
            .map(SecretMetadata::from)
            .collect();
        found.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(found)
    }

    // ── Helpers ──────────────────────────────────────────────────────

    /// Argon2 is memory-hard; run it on the blocking pool.
    async fn blind_index(&self, name: &str, salt_hex: &str) -> Result<String, SecretsError> {
        let salt = hex::decode(salt_hex)
            .map_err(|e| SecretsError::Internal(format!("stored blind index salt is not hex: {e}")))?;
        let indexer = Arc::clone(&self.indexer);
        let name = name.to_owned();
        let token = tokio::task::spawn_blocking(move || indexer.create_blind_index(&name, &salt))
            .await
            .map_err(|e| SecretsError::Internal(format!("blind index task failed: {e}")))??;
        Ok(token)
    }

    fn audit_secret(&self, secret: &Secret, actor_id: Uuid, action: AuditAction, metadata: serde_json::Value) {
        self.audit.emit(
            AuditEvent::new(
                secret.organization_id,
                actor_id,
                action,
                ResourceType::Secret,
                secret.id,
                display_name(&secret.path, &secret.key),
            )
            .with_metadata(metadata),
        );
    }
}

impl std::fmt::Debug for SecretsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretsService")
            .field("keys", &self.keys)
            .field("indexer", &self.indexer)
            .finish_non_exhaustive()
    }
}

/// Accept `found` only if it belongs to the locator's organization.
fn require_active(found: Option<Secret>, locator: &SecretLocator) -> Result<Secret, SecretsError> {
    found
        .filter(|s| s.organization_id == locator.organization_id)
        .ok_or_else(|| SecretsError::NotFound(format!("secret {}", locator.display_name())))
}

fn next_version(secret: &Secret) -> Result<u32, SecretsError> {
    secret
        .current_version
        .checked_add(1)
        .ok_or_else(|| SecretsError::Internal(format!("secret {} has no version numbers left", secret.id)))
}

fn open(kek: &EncryptionKey, version: &SecretVersion) -> Result<String, SecretsError> {
    Ok(cipher::decrypt_secret(&version.bundle()?, kek)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    use vaultline_storage::{BatchOp, MemoryBackend, StorageError};

    use super::*;
    use crate::crypto;
    use crate::requests::{PageRequest, SecretFilter};

    const ACTOR: Uuid = Uuid::nil();

    fn cheap_params() -> BlindIndexParams {
        BlindIndexParams {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }

    fn service_on(backend: Arc<dyn StorageBackend>, master: u8) -> SecretsService {
        SecretsService::new(
            Arc::new(MasterKey::from_bytes([master; 32])),
            backend,
            cheap_params(),
            AuditDispatcher::disabled(),
        )
        .unwrap()
    }

    fn service() -> SecretsService {
        service_on(Arc::new(MemoryBackend::new()), 7)
    }

    async fn org(svc: &SecretsService) -> Uuid {
        svc.create_organization(CreateOrganizationRequest {
            name: "acme".to_owned(),
            actor_id: ACTOR,
        })
        .await
        .unwrap()
        .id
    }

    fn create(org: Uuid, env: Uuid, path: &str, key: &str, value: &str) -> CreateSecretRequest {
        CreateSecretRequest {
            organization_id: org,
            project_id: Uuid::nil(),
            environment_id: env,
            path: path.to_owned(),
            key: key.to_owned(),
            value: value.to_owned(),
            description: None,
            tags: Vec::new(),
            actor_id: ACTOR,
        }
    }

    fn locator(org: Uuid, env: Uuid, path: &str, key: &str) -> SecretLocator {
        SecretLocator {
            organization_id: org,
            environment_id: env,
            path: path.to_owned(),
            key: key.to_owned(),
        }
    }

    async fn read(svc: &SecretsService, locator: SecretLocator) -> Result<SecretWithValue, SecretsError> {
        svc.get_secret(GetSecretRequest {
            locator,
            actor_id: ACTOR,
        })
        .await
    }

    fn set_value(locator: SecretLocator, value: &str) -> UpdateSecretRequest {
        UpdateSecretRequest {
            locator,
            value: Some(value.to_owned()),
            description: None,
            tags: None,
            actor_id: ACTOR,
        }
    }

    #[tokio::test]
    async fn concurrent_creates_for_one_tuple_yield_one_conflict() {
        let svc = Arc::new(service());
        let org = org(&svc).await;
        let env = Uuid::new_v4();

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let svc = Arc::clone(&svc);
                tokio::spawn(async move {
                    svc.create_secret(create(org, env, "/", "DB_PASSWORD", &format!("v{i}")))
                        .await
                })
            })
            .collect();

        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap());
        }
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(SecretsError::Conflict(_))))
                .count(),
            7
        );
    }

    #[tokio::test]
    async fn concurrent_updates_produce_gap_free_versions() {
        let svc = Arc::new(service());
        let org = org(&svc).await;
        let env = Uuid::new_v4();
        svc.create_secret(create(org, env, "/", "COUNTER", "0")).await.unwrap();

        let n = 16;
        let tasks: Vec<_> = (1..=n)
            .map(|i| {
                let svc = Arc::clone(&svc);
                let loc = locator(org, env, "/", "COUNTER");
                tokio::spawn(async move { svc.update_secret(set_value(loc, &i.to_string())).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let versions = svc
            .list_versions(ListVersionsRequest {
                locator: locator(org, env, "/", "COUNTER"),
            })
            .await
            .unwrap();
        let numbers: BTreeSet<u32> = versions.iter().map(|v| v.version).collect();
        assert_eq!(numbers, (1..=n + 1).collect());
        assert_eq!(versions.iter().filter(|v| v.is_current).count(), 1);

        let current = read(&svc, locator(org, env, "/", "COUNTER")).await.unwrap();
        assert_eq!(current.version, n + 1);
    }

    #[tokio::test]
    async fn metadata_only_update_appends_no_version() {
        let svc = service();
        let org = org(&svc).await;
        let env = Uuid::new_v4();
        svc.create_secret(create(org, env, "/", "K", "v1")).await.unwrap();

        let updated = svc
            .update_secret(UpdateSecretRequest {
                locator: locator(org, env, "/", "K"),
                value: None,
                description: Some(Some("primary db".to_owned())),
                tags: Some(vec!["db".to_owned()]),
                actor_id: ACTOR,
            })
            .await
            .unwrap();
        assert_eq!(updated.current_version, 1);
        assert_eq!(updated.description.as_deref(), Some("primary db"));
        assert_eq!(read(&svc, locator(org, env, "/", "K")).await.unwrap().value, "v1");
    }

    #[tokio::test]
    async fn historical_versions_stay_readable() {
        let svc = service();
        let org = org(&svc).await;
        let env = Uuid::new_v4();
        svc.create_secret(create(org, env, "/", "K", "one")).await.unwrap();
        svc.update_secret(set_value(locator(org, env, "/", "K"), "two"))
            .await
            .unwrap();

        let v1 = svc
            .get_secret_version(GetSecretVersionRequest {
                locator: locator(org, env, "/", "K"),
                version: 1,
                actor_id: ACTOR,
            })
            .await
            .unwrap();
        assert_eq!(v1.value, "one");

        let missing = svc
            .get_secret_version(GetSecretVersionRequest {
                locator: locator(org, env, "/", "K"),
                version: 9,
                actor_id: ACTOR,
            })
            .await;
        assert!(matches!(missing, Err(SecretsError::NotFound(_))));
    }

    #[tokio::test]
    async fn rollback_to_missing_version_is_not_found() {
        let svc = service();
        let org = org(&svc).await;
        let env = Uuid::new_v4();
        svc.create_secret(create(org, env, "/", "K", "v1")).await.unwrap();
        let result = svc
            .rollback_secret(RollbackSecretRequest {
                locator: locator(org, env, "/", "K"),
                target_version: 5,
                actor_id: ACTOR,
            })
            .await;
        assert!(matches!(result, Err(SecretsError::NotFound(_))));
    }

    #[tokio::test]
    async fn rotation_covers_soft_deleted_secrets() {
        let svc = service();
        let org = org(&svc).await;
        let env = Uuid::new_v4();
        svc.create_secret(create(org, env, "/", "OLD", "retired")).await.unwrap();
        let deleted = svc
            .delete_secret(DeleteSecretRequest {
                target: DeleteTarget::Active(locator(org, env, "/", "OLD")),
                mode: DeleteMode::Soft,
                actor_id: ACTOR,
            })
            .await
            .unwrap();
        svc.create_secret(create(org, env, "/", "LIVE", "current")).await.unwrap();

        let summary = svc
            .rotate_org_kek(RotateKekRequest {
                organization_id: org,
                actor_id: ACTOR,
            })
            .await
            .unwrap();
        assert_eq!((summary.previous_version, summary.new_version), (1, 2));
        assert_eq!(summary.rewrapped, 2);

        // The soft-deleted secret's history was moved too; purging still works
        // and the live secret decrypts under the new KEK.
        let purged = svc
            .delete_secret(DeleteSecretRequest {
                target: DeleteTarget::ById {
                    organization_id: org,
                    secret_id: deleted.secret_id,
                },
                mode: DeleteMode::Permanent,
                actor_id: ACTOR,
            })
            .await
            .unwrap();
        assert_eq!(purged.versions_removed, 1);

        let live = read(&svc, locator(org, env, "/", "LIVE")).await.unwrap();
        assert_eq!(live.value, "current");
        assert_eq!(live.kek_version, 2);
    }

    #[tokio::test]
    async fn foreign_master_key_fails_closed() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let svc = service_on(Arc::clone(&backend), 7);
        let org = org(&svc).await;
        let env = Uuid::new_v4();
        svc.create_secret(create(org, env, "/", "K", "v")).await.unwrap();

        let intruder = service_on(backend, 8);
        let result = read(&intruder, locator(org, env, "/", "K")).await;
        assert!(matches!(result, Err(SecretsError::KeyUnwrap(_))));

        let rotation = intruder
            .rotate_org_kek(RotateKekRequest {
                organization_id: org,
                actor_id: ACTOR,
            })
            .await;
        assert!(matches!(rotation, Err(SecretsError::KeyUnwrap(_))));
        assert_eq!(read(&svc, locator(org, env, "/", "K")).await.unwrap().kek_version, 1);
    }

    /// Memory backend whose batches can be made to fail.
    #[derive(Default)]
    struct FlakyBackend {
        inner: MemoryBackend,
        fail_batches: AtomicBool,
    }

    #[async_trait::async_trait]
    impl StorageBackend for FlakyBackend {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
            self.inner.get(key).await
        }

        async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
            self.inner.list(prefix).await
        }

        async fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), StorageError> {
            if self.fail_batches.load(Ordering::SeqCst) {
                return Err(StorageError::Transaction {
                    ops: ops.len(),
                    reason: "disk unavailable".to_owned(),
                });
            }
            self.inner.write_batch(ops).await
        }
    }

    fn rotate(org: Uuid) -> RotateKekRequest {
        RotateKekRequest {
            organization_id: org,
            actor_id: ACTOR,
        }
    }

    #[tokio::test]
    async fn rotation_failing_midway_changes_nothing() {
        let backend = Arc::new(MemoryBackend::new());
        let svc = service_on(backend.clone(), 7);
        let org = org(&svc).await;
        let env = Uuid::new_v4();
        let a = svc.create_secret(create(org, env, "/", "A", "alpha")).await.unwrap().id;
        let b = svc.create_secret(create(org, env, "/", "B", "bravo")).await.unwrap().id;

        // Rotation walks secrets in id order; break the DEK of the later one
        // so the earlier one has already been re-wrapped when it fails.
        let (first, last) = if a < b { ((a, "A"), b) } else { ((b, "B"), a) };
        let last_key = format!("versions/{last}/{:010}", 1);
        let mut broken: SecretVersion =
            serde_json::from_slice(&backend.get(&last_key).await.unwrap().unwrap()).unwrap();
        broken.encrypted_dek =
            crypto::wrap_key(&EncryptionKey::generate(), &EncryptionKey::generate()).unwrap();
        backend
            .write_batch(vec![BatchOp::put(last_key, serde_json::to_vec(&broken).unwrap())])
            .await
            .unwrap();
        let first_key = format!("versions/{}/{:010}", first.0, 1);
        let before = backend.get(&first_key).await.unwrap();

        let result = svc.rotate_org_kek(rotate(org)).await;
        assert!(matches!(result, Err(SecretsError::Decryption(_))));

        assert_eq!(backend.get(&first_key).await.unwrap(), before);
        let intact = read(&svc, locator(org, env, "/", first.1)).await.unwrap();
        assert_eq!(intact.kek_version, 1);
        assert_eq!(intact.value, if first.1 == "A" { "alpha" } else { "bravo" });
    }

    #[tokio::test]
    async fn rotation_whose_commit_fails_keeps_old_kek() {
        let backend = Arc::new(FlakyBackend::default());
        let svc = service_on(backend.clone(), 7);
        let org = org(&svc).await;
        let env = Uuid::new_v4();
        svc.create_secret(create(org, env, "/", "K", "v1")).await.unwrap();
        svc.update_secret(set_value(locator(org, env, "/", "K"), "v2")).await.unwrap();

        backend.fail_batches.store(true, Ordering::SeqCst);
        let result = svc.rotate_org_kek(rotate(org)).await;
        assert!(matches!(result, Err(SecretsError::Storage(_))));
        backend.fail_batches.store(false, Ordering::SeqCst);

        let current = read(&svc, locator(org, env, "/", "K")).await.unwrap();
        assert_eq!((current.value.as_str(), current.kek_version), ("v2", 1));
        let old = svc
            .get_secret_version(GetSecretVersionRequest {
                locator: locator(org, env, "/", "K"),
                version: 1,
                actor_id: ACTOR,
            })
            .await
            .unwrap();
        assert_eq!(old.value, "v1");

        // The next rotation starts from the same KEK version.
        assert_eq!(svc.rotate_org_kek(rotate(org)).await.unwrap().new_version, 2);
    }

    #[tokio::test]
    async fn organizations_cannot_see_each_other() {
        let svc = service();
        let a = org(&svc).await;
        let b = org(&svc).await;
        let env = Uuid::new_v4();
        svc.create_secret(create(a, env, "/", "K", "a-only")).await.unwrap();

        assert!(matches!(
            read(&svc, locator(b, env, "/", "K")).await,
            Err(SecretsError::NotFound(_))
        ));
        let found = svc
            .find_by_name(FindByNameRequest {
                organization_id: b,
                environment_id: env,
                key: "K".to_owned(),
            })
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn list_filters_and_pages() {
        let svc = service();
        let org = org(&svc).await;
        let env = Uuid::new_v4();
        for (path, key, tag) in [
            ("/api", "TOKEN", "api"),
            ("/api", "DB_URL", "db"),
            ("/db", "DB_PASSWORD", "db"),
            ("/db", "DB_USER", "db"),
        ] {
            let mut request = create(org, env, path, key, &format!("{path}/{key}"));
            request.tags = vec![tag.to_owned()];
            svc.create_secret(request).await.unwrap();
        }

        let list = |filter: SecretFilter, page: PageRequest, include_values: bool| ListSecretsRequest {
            organization_id: org,
            environment_id: env,
            filter,
            page,
            include_values,
            actor_id: ACTOR,
        };

        let by_tag = svc
            .list_secrets(list(
                SecretFilter {
                    tag: Some("db".to_owned()),
                    ..SecretFilter::default()
                },
                PageRequest::default(),
                false,
            ))
            .await
            .unwrap();
        assert_eq!(by_tag.total, 3);
        assert!(by_tag.items.iter().all(|i| i.value.is_none()));

        let db_prefix = svc
            .list_secrets(list(
                SecretFilter {
                    path_prefix: Some("/db".to_owned()),
                    name_contains: Some("PASS".to_owned()),
                    ..SecretFilter::default()
                },
                PageRequest::default(),
                true,
            ))
            .await
            .unwrap();
        assert_eq!(db_prefix.total, 1);
        assert_eq!(db_prefix.items[0].value.as_deref(), Some("/db/DB_PASSWORD"));

        let second_page = svc
            .list_secrets(list(
                SecretFilter::default(),
                PageRequest { offset: 2, limit: 2 },
                true,
            ))
            .await
            .unwrap();
        assert_eq!(second_page.total, 4);
        let keys: Vec<_> = second_page.items.iter().map(|i| i.metadata.key.as_str()).collect();
        assert_eq!(keys, ["DB_PASSWORD", "DB_USER"]);
    }

    #[tokio::test]
    async fn find_by_name_uses_blind_index() {
        let svc = service();
        let org = org(&svc).await;
        let env = Uuid::new_v4();
        svc.create_secret(create(org, env, "/a", "SHARED", "1")).await.unwrap();
        svc.create_secret(create(org, env, "/b", "SHARED", "2")).await.unwrap();
        svc.create_secret(create(org, env, "/a", "OTHER", "3")).await.unwrap();

        let found = svc
            .find_by_name(FindByNameRequest {
                organization_id: org,
                environment_id: env,
                key: "SHARED".to_owned(),
            })
            .await
            .unwrap();
        let paths: Vec<_> = found.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(paths, ["/a", "/b"]);

        svc.delete_secret(DeleteSecretRequest {
            target: DeleteTarget::Active(locator(org, env, "/a", "SHARED")),
            mode: DeleteMode::Soft,
            actor_id: ACTOR,
        })
        .await
        .unwrap();
        let found = svc
            .find_by_name(FindByNameRequest {
                organization_id: org,
                environment_id: env,
                key: "SHARED".to_owned(),
            })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn second_soft_delete_is_not_found() {
        let svc = service();
        let org = org(&svc).await;
        let env = Uuid::new_v4();
        let created = svc.create_secret(create(org, env, "/", "K", "v")).await.unwrap();
        let by_id = || DeleteSecretRequest {
            target: DeleteTarget::ById {
                organization_id: org,
                secret_id: created.id,
            },
            mode: DeleteMode::Soft,
            actor_id: ACTOR,
        };
        svc.delete_secret(by_id()).await.unwrap();
        assert!(matches!(
            svc.delete_secret(by_id()).await,
            Err(SecretsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected_before_any_work() {
        let svc = service();
        let org = org(&svc).await;
        let result = svc
            .create_secret(create(org, Uuid::new_v4(), "no-slash", "K", "v"))
            .await;
        assert!(matches!(result, Err(SecretsError::InvalidRequest(_))));

        let unknown_org = svc
            .create_secret(create(Uuid::new_v4(), Uuid::new_v4(), "/", "K", "v"))
            .await;
        assert!(matches!(unknown_org, Err(SecretsError::NotFound(_))));
    }
}
