//! Secret version store.
//!
//! Persists organizations, secrets, and their append-only version chains on
//! top of a [`StorageBackend`], and provides the transactional guarantees the
//! service relies on:
//!
//! - [`SecretStore::begin`] opens a write transaction. It holds the store's
//!   write lock, reads committed state overlaid with its own staged
//!   mutations, stages every mutation, and applies
//!   them in one atomic [`StorageBackend::write_batch`] on
//!   [`StoreTxn::commit`]. Dropping a transaction without committing
//!   discards everything it staged.
//! - [`SecretStore::reader`] opens a read snapshot. Readers run concurrently
//!   with each other but never observe a half-applied transaction, so a
//!   version and the organization KEK that wraps it are always read from the
//!   same side of a rotation.
//!
//! # Layout
//!
//! ```text
//! orgs/{org}                              Organization
//! org-salts/{salt}                        org id (salt registry)
//! secrets/{secret}                        Secret
//! active/{env}/{hex(path)}/{hex(key)}     secret id, active secrets only
//! env-secrets/{env}/{secret}              listing index
//! org-secrets/{org}/{secret}              rotation index
//! blind/{env}/{token}/{secret}            blind index, active secrets only
//! versions/{secret}/{version:010}         SecretVersion
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;
use uuid::Uuid;
use vaultline_storage::{BatchOp, StorageBackend};

use crate::error::StoreError;
use crate::models::{Organization, Secret, SecretVersion};

fn org_key(org_id: Uuid) -> String {
    format!("orgs/{org_id}")
}

fn salt_key(salt: &str) -> String {
    format!("org-salts/{salt}")
}

fn secret_key(secret_id: Uuid) -> String {
    format!("secrets/{secret_id}")
}

fn active_key(environment_id: Uuid, path: &str, key: &str) -> String {
    format!(
        "active/{environment_id}/{}/{}",
        hex::encode(path),
        hex::encode(key)
    )
}

fn env_index_key(environment_id: Uuid, secret_id: Uuid) -> String {
    format!("env-secrets/{environment_id}/{secret_id}")
}

fn org_index_key(organization_id: Uuid, secret_id: Uuid) -> String {
    format!("org-secrets/{organization_id}/{secret_id}")
}

fn blind_key(environment_id: Uuid, token: &str, secret_id: Uuid) -> String {
    format!("blind/{environment_id}/{token}/{secret_id}")
}

fn versions_prefix(secret_id: Uuid) -> String {
    format!("versions/{secret_id}/")
}

fn version_key(secret_id: Uuid, version: u32) -> String {
    format!("versions/{secret_id}/{version:010}")
}

/// Parse the trailing `/{uuid}` segment of an index key.
fn trailing_id(key: &str) -> Result<Uuid, StoreError> {
    let segment = key.rsplit('/').next().unwrap_or_default();
    Uuid::parse_str(segment).map_err(|e| StoreError::Corrupt {
        key: key.to_owned(),
        reason: format!("index key does not end in an id: {e}"),
    })
}

fn encode<T: Serialize>(key: &str, record: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(record).map_err(|e| StoreError::Corrupt {
        key: key.to_owned(),
        reason: e.to_string(),
    })
}

/// Transactional persistence for organizations, secrets, and versions.
pub struct SecretStore {
    backend: Arc<dyn StorageBackend>,
    lock: RwLock<()>,
}

impl SecretStore {
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            lock: RwLock::new(()),
        }
    }

    /// Open a consistent read snapshot.
    pub async fn reader(&self) -> StoreReader<'_> {
        StoreReader {
            store: self,
            _guard: self.lock.read().await,
        }
    }

    /// Open a write transaction. Only one is open at a time.
    pub async fn begin(&self) -> StoreTxn<'_> {
        StoreTxn {
            store: self,
            _guard: self.lock.write().await,
            ops: Vec::new(),
        }
    }

    /// Read `key`, letting the latest staged operation on it win.
    async fn get(&self, staged: &[BatchOp], key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match staged.iter().rev().find(|op| op.key() == key) {
            Some(BatchOp::Put { value, .. }) => Ok(Some(value.clone())),
            Some(BatchOp::Delete { .. }) => Ok(None),
            None => Ok(self.backend.get(key).await?),
        }
    }

    /// List keys under `prefix`, with staged puts added and staged deletes removed.
    async fn list(&self, staged: &[BatchOp], prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys: BTreeSet<String> = self.backend.list(prefix).await?.into_iter().collect();
        for op in staged.iter().filter(|op| op.key().starts_with(prefix)) {
            match op {
                BatchOp::Put { key, .. } => keys.insert(key.clone()),
                BatchOp::Delete { key } => keys.remove(key),
            };
        }
        Ok(keys.into_iter().collect())
    }

    async fn load<T: DeserializeOwned>(&self, staged: &[BatchOp], key: &str) -> Result<Option<T>, StoreError> {
        let Some(bytes) = self.get(staged, key).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                key: key.to_owned(),
                reason: e.to_string(),
            })
    }

    async fn load_id(&self, staged: &[BatchOp], key: &str) -> Result<Option<Uuid>, StoreError> {
        let Some(bytes) = self.get(staged, key).await? else {
            return Ok(None);
        };
        let text = String::from_utf8_lossy(&bytes);
        Uuid::parse_str(&text)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                key: key.to_owned(),
                reason: e.to_string(),
            })
    }

    async fn organization(&self, staged: &[BatchOp], organization_id: Uuid) -> Result<Organization, StoreError> {
        self.load(staged, &org_key(organization_id))
            .await?
            .ok_or_else(|| StoreError::NotFound {
                what: format!("organization {organization_id}"),
            })
    }

    async fn secret(&self, staged: &[BatchOp], secret_id: Uuid) -> Result<Option<Secret>, StoreError> {
        self.load(staged, &secret_key(secret_id)).await
    }

    async fn find_active(
        &self,
        staged: &[BatchOp],
        environment_id: Uuid,
        path: &str,
        key: &str,
    ) -> Result<Option<Secret>, StoreError> {
        let tuple = active_key(environment_id, path, key);
        let Some(secret_id) = self.load_id(staged, &tuple).await? else {
            return Ok(None);
        };
        Ok(self
            .secret(staged, secret_id)
            .await?
            .filter(|s| s.deleted_at.is_none()))
    }

    async fn version(
        &self,
        staged: &[BatchOp],
        secret_id: Uuid,
        version: u32,
    ) -> Result<Option<SecretVersion>, StoreError> {
        self.load(staged, &version_key(secret_id, version)).await
    }

    async fn versions(&self, staged: &[BatchOp], secret_id: Uuid) -> Result<Vec<SecretVersion>, StoreError> {
        let mut versions = Vec::new();
        for key in self.list(staged, &versions_prefix(secret_id)).await? {
            if let Some(version) = self.load(staged, &key).await? {
                versions.push(version);
            }
        }
        Ok(versions)
    }

    async fn secrets_under(&self, staged: &[BatchOp], prefix: &str) -> Result<Vec<Secret>, StoreError> {
        let mut secrets = Vec::new();
        for key in self.list(staged, prefix).await? {
            if let Some(secret) = self.secret(staged, trailing_id(&key)?).await? {
                secrets.push(secret);
            }
        }
        Ok(secrets)
    }

    async fn environment_secrets(&self, environment_id: Uuid) -> Result<Vec<Secret>, StoreError> {
        let mut secrets = self
            .secrets_under(&[], &format!("env-secrets/{environment_id}/"))
            .await?;
        secrets.retain(|s| s.deleted_at.is_none());
        Ok(secrets)
    }

    async fn blind_matches(&self, environment_id: Uuid, token: &str) -> Result<Vec<Secret>, StoreError> {
        let mut secrets = self
            .secrets_under(&[], &format!("blind/{environment_id}/{token}/"))
            .await?;
        secrets.retain(|s| s.deleted_at.is_none());
        Ok(secrets)
    }

    async fn organization_secrets(
        &self,
        staged: &[BatchOp],
        organization_id: Uuid,
    ) -> Result<Vec<Secret>, StoreError> {
        self.secrets_under(staged, &format!("org-secrets/{organization_id}/"))
            .await
    }
}

impl std::fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretStore").finish_non_exhaustive()
    }
}

/// A consistent read snapshot of the store.
pub struct StoreReader<'a> {
    store: &'a SecretStore,
    _guard: RwLockReadGuard<'a, ()>,
}

impl StoreReader<'_> {
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the organization does not exist.
    pub async fn organization(&self, organization_id: Uuid) -> Result<Organization, StoreError> {
        self.store.organization(&[], organization_id).await
    }

    /// The active secret at `(environment, path, key)`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails or a record is corrupt.
    pub async fn find_active(
        &self,
        environment_id: Uuid,
        path: &str,
        key: &str,
    ) -> Result<Option<Secret>, StoreError> {
        self.store.find_active(&[], environment_id, path, key).await
    }

    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails or a record is corrupt.
    pub async fn version(&self, secret_id: Uuid, version: u32) -> Result<Option<SecretVersion>, StoreError> {
        self.store.version(&[], secret_id, version).await
    }

    /// All versions of a secret, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails or a record is corrupt.
    pub async fn versions(&self, secret_id: Uuid) -> Result<Vec<SecretVersion>, StoreError> {
        self.store.versions(&[], secret_id).await
    }

    /// Active secrets of an environment.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails or a record is corrupt.
    pub async fn environment_secrets(&self, environment_id: Uuid) -> Result<Vec<Secret>, StoreError> {
        self.store.environment_secrets(environment_id).await
    }

    /// Active secrets of an environment whose blind index equals `token`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails or a record is corrupt.
    pub async fn blind_matches(&self, environment_id: Uuid, token: &str) -> Result<Vec<Secret>, StoreError> {
        self.store.blind_matches(environment_id, token).await
    }
}

/// A write transaction. See the [module docs](self).
///
/// Reads through a transaction see its own staged writes: a tuple released
/// by a staged soft delete is free for an insert in the same transaction.
pub struct StoreTxn<'a> {
    store: &'a SecretStore,
    _guard: RwLockWriteGuard<'a, ()>,
    ops: Vec<BatchOp>,
}

impl StoreTxn<'_> {
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the organization does not exist.
    pub async fn organization(&self, organization_id: Uuid) -> Result<Organization, StoreError> {
        self.store.organization(&self.ops, organization_id).await
    }

    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails or a record is corrupt.
    pub async fn secret(&self, secret_id: Uuid) -> Result<Option<Secret>, StoreError> {
        self.store.secret(&self.ops, secret_id).await
    }

    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails or a record is corrupt.
    pub async fn find_active(
        &self,
        environment_id: Uuid,
        path: &str,
        key: &str,
    ) -> Result<Option<Secret>, StoreError> {
        self.store.find_active(&self.ops, environment_id, path, key).await
    }

    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails or a record is corrupt.
    pub async fn version(&self, secret_id: Uuid, version: u32) -> Result<Option<SecretVersion>, StoreError> {
        self.store.version(&self.ops, secret_id, version).await
    }

    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails or a record is corrupt.
    pub async fn versions(&self, secret_id: Uuid) -> Result<Vec<SecretVersion>, StoreError> {
        self.store.versions(&self.ops, secret_id).await
    }

    /// Every secret of an organization, soft-deleted ones included.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails or a record is corrupt.
    pub async fn organization_secrets(&self, organization_id: Uuid) -> Result<Vec<Secret>, StoreError> {
        self.store.organization_secrets(&self.ops, organization_id).await
    }

    /// Stage a new organization and register its blind-index salt.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SaltCollision`] if the salt already belongs to
    /// another organization.
    pub async fn insert_organization(&mut self, org: &Organization) -> Result<(), StoreError> {
        let salt = salt_key(&org.blind_index_salt);
        if self.store.get(&self.ops, &salt).await?.is_some() {
            return Err(StoreError::SaltCollision);
        }
        self.ops.push(BatchOp::put(salt, org.id.to_string()));
        self.put_organization(org)
    }

    /// Stage an updated organization record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] if the record cannot be serialized.
    pub fn put_organization(&mut self, org: &Organization) -> Result<(), StoreError> {
        let key = org_key(org.id);
        let value = encode(&key, org)?;
        self.ops.push(BatchOp::put(key, value));
        Ok(())
    }

    /// Stage a new secret, its indexes, and its first version.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if an active secret already occupies
    /// the secret's `(environment, path, key)`.
    pub async fn insert_secret(&mut self, secret: &Secret, first: &SecretVersion) -> Result<(), StoreError> {
        if self
            .find_active(secret.environment_id, &secret.path, &secret.key)
            .await?
            .is_some()
        {
            return Err(StoreError::Conflict {
                environment_id: secret.environment_id,
                path: secret.path.clone(),
                key: secret.key.clone(),
            });
        }

        let id = secret.id.to_string();
        self.ops.extend([
            BatchOp::put(
                active_key(secret.environment_id, &secret.path, &secret.key),
                id.clone(),
            ),
            BatchOp::put(env_index_key(secret.environment_id, secret.id), id.clone()),
            BatchOp::put(org_index_key(secret.organization_id, secret.id), id.clone()),
            BatchOp::put(
                blind_key(secret.environment_id, &secret.blind_index, secret.id),
                id,
            ),
        ]);
        self.put_secret(secret)?;
        self.put_version(first)
    }

    /// Stage an updated secret record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] if the record cannot be serialized.
    pub fn put_secret(&mut self, secret: &Secret) -> Result<(), StoreError> {
        let key = secret_key(secret.id);
        let value = encode(&key, secret)?;
        self.ops.push(BatchOp::put(key, value));
        Ok(())
    }

    /// Stage a version record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] if the record cannot be serialized.
    pub fn put_version(&mut self, version: &SecretVersion) -> Result<(), StoreError> {
        let key = version_key(version.secret_id, version.version);
        let value = encode(&key, version)?;
        self.ops.push(BatchOp::put(key, value));
        Ok(())
    }

    /// Stage a soft delete. `secret` must already carry its `deleted_at`.
    /// The tuple and blind-index entries are released; versions are kept.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] if the record cannot be serialized.
    pub fn soft_delete(&mut self, secret: &Secret) -> Result<(), StoreError> {
        self.ops.extend([
            BatchOp::delete(active_key(secret.environment_id, &secret.path, &secret.key)),
            BatchOp::delete(blind_key(secret.environment_id, &secret.blind_index, secret.id)),
        ]);
        self.put_secret(secret)
    }

    /// Stage the irreversible removal of a secret and its whole version
    /// chain. Returns the number of versions removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails or a record is corrupt.
    pub async fn purge(&mut self, secret: &Secret) -> Result<usize, StoreError> {
        let tuple = active_key(secret.environment_id, &secret.path, &secret.key);
        // The tuple may already belong to a newer secret.
        if self.store.load_id(&self.ops, &tuple).await? == Some(secret.id) {
            self.ops.push(BatchOp::delete(tuple));
        }

        let version_keys = self.store.list(&self.ops, &versions_prefix(secret.id)).await?;
        let removed = version_keys.len();
        self.ops
            .extend(version_keys.into_iter().map(BatchOp::delete));
        self.ops.extend([
            BatchOp::delete(blind_key(secret.environment_id, &secret.blind_index, secret.id)),
            BatchOp::delete(env_index_key(secret.environment_id, secret.id)),
            BatchOp::delete(org_index_key(secret.organization_id, secret.id)),
            BatchOp::delete(secret_key(secret.id)),
        ]);
        Ok(removed)
    }

    /// Apply every staged operation atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Storage`] if the batch fails; nothing from it
    /// is visible in that case.
    pub async fn commit(self) -> Result<(), StoreError> {
        let count = self.ops.len();
        if count == 0 {
            return Ok(());
        }
        self.store.backend.write_batch(self.ops).await?;
        debug!(ops = count, "store transaction committed");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use vaultline_storage::MemoryBackend;

    use super::*;
    use crate::crypto::WrappedKey;

    fn store() -> SecretStore {
        SecretStore::new(Arc::new(MemoryBackend::new()))
    }

    fn org(salt: &str) -> Organization {
        Organization {
            id: Uuid::new_v4(),
            name: "acme".to_owned(),
            encrypted_kek: WrappedKey::from_encoded("00:00:00"),
            kek_version: 1,
            blind_index_salt: salt.to_owned(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            kek_rotated_at: None,
        }
    }

    fn secret(org_id: Uuid, env: Uuid, key: &str) -> (Secret, SecretVersion) {
        let id = Uuid::new_v4();
        let version = SecretVersion {
            id: Uuid::new_v4(),
            secret_id: id,
            version: 1,
            encrypted_value: "00".to_owned(),
            iv: "00".repeat(16),
            auth_tag: "00".repeat(16),
            encrypted_dek: WrappedKey::from_encoded("00:00:00"),
            algorithm: "aes-256-gcm".to_owned(),
            kek_version: 1,
            created_by: Uuid::nil(),
            created_at: Utc::now(),
            rolled_back_from: None,
        };
        let secret = Secret {
            id,
            organization_id: org_id,
            project_id: Uuid::new_v4(),
            environment_id: env,
            path: "/".to_owned(),
            key: key.to_owned(),
            description: None,
            tags: Vec::new(),
            blind_index: format!("token-{key}"),
            current_version: 1,
            current_version_id: version.id,
            created_by: Uuid::nil(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        };
        (secret, version)
    }

    #[tokio::test]
    async fn uncommitted_transaction_leaves_no_trace() {
        let store = store();
        let o = org("aa");
        {
            let mut txn = store.begin().await;
            txn.insert_organization(&o).await.unwrap();
        }
        let err = store.reader().await.organization(o.id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn duplicate_salt_is_rejected() {
        let store = store();
        let mut txn = store.begin().await;
        txn.insert_organization(&org("aa")).await.unwrap();
        txn.commit().await.unwrap();

        let mut txn = store.begin().await;
        let err = txn.insert_organization(&org("aa")).await.unwrap_err();
        assert!(matches!(err, StoreError::SaltCollision));
    }

    #[tokio::test]
    async fn active_tuple_conflicts_until_soft_deleted() {
        let store = store();
        let env = Uuid::new_v4();
        let (first, v1) = secret(Uuid::new_v4(), env, "DB_PASSWORD");

        let mut txn = store.begin().await;
        txn.insert_secret(&first, &v1).await.unwrap();
        txn.commit().await.unwrap();

        let (second, v2) = secret(first.organization_id, env, "DB_PASSWORD");
        let mut txn = store.begin().await;
        let err = txn.insert_secret(&second, &v2).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        drop(txn);

        let mut deleted = first.clone();
        deleted.deleted_at = Some(Utc::now());
        let mut txn = store.begin().await;
        txn.soft_delete(&deleted).unwrap();
        assert!(txn.find_active(env, "/", "DB_PASSWORD").await.unwrap().is_none());
        txn.insert_secret(&second, &v2).await.unwrap();
        let staged = txn.find_active(env, "/", "DB_PASSWORD").await.unwrap().unwrap();
        assert_eq!(staged.id, second.id);
        assert_eq!(txn.versions(second.id).await.unwrap().len(), 1);
        txn.commit().await.unwrap();

        let reader = store.reader().await;
        let found = reader.find_active(env, "/", "DB_PASSWORD").await.unwrap().unwrap();
        assert_eq!(found.id, second.id);
        assert_eq!(reader.versions(first.id).await.unwrap().len(), 1);
        let matches = reader.blind_matches(env, &first.blind_index).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, second.id);
    }

    #[tokio::test]
    async fn salt_staged_in_same_transaction_collides() {
        let store = store();
        let mut txn = store.begin().await;
        txn.insert_organization(&org("bb")).await.unwrap();
        let err = txn.insert_organization(&org("bb")).await.unwrap_err();
        assert!(matches!(err, StoreError::SaltCollision));
    }

    #[tokio::test]
    async fn purge_after_staged_version_removes_it_too() {
        let store = store();
        let (s, v1) = secret(Uuid::new_v4(), Uuid::new_v4(), "K");
        let mut txn = store.begin().await;
        txn.insert_secret(&s, &v1).await.unwrap();
        txn.commit().await.unwrap();

        let mut txn = store.begin().await;
        let mut v2 = v1.clone();
        v2.id = Uuid::new_v4();
        v2.version = 2;
        txn.put_version(&v2).unwrap();
        assert_eq!(txn.purge(&s).await.unwrap(), 2);
        txn.commit().await.unwrap();

        assert!(store.reader().await.versions(s.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn purge_of_old_secret_keeps_newer_tuple_owner() {
        let store = store();
        let env = Uuid::new_v4();
        let (old, v_old) = secret(Uuid::new_v4(), env, "API_KEY");
        let mut txn = store.begin().await;
        txn.insert_secret(&old, &v_old).await.unwrap();
        txn.commit().await.unwrap();

        let mut deleted = old.clone();
        deleted.deleted_at = Some(Utc::now());
        let (new, v_new) = secret(old.organization_id, env, "API_KEY");
        let mut txn = store.begin().await;
        txn.soft_delete(&deleted).unwrap();
        txn.commit().await.unwrap();
        let mut txn = store.begin().await;
        txn.insert_secret(&new, &v_new).await.unwrap();
        txn.commit().await.unwrap();

        let mut txn = store.begin().await;
        assert_eq!(txn.purge(&deleted).await.unwrap(), 1);
        txn.commit().await.unwrap();

        let reader = store.reader().await;
        let found = reader.find_active(env, "/", "API_KEY").await.unwrap().unwrap();
        assert_eq!(found.id, new.id);
        assert!(reader.versions(old.id).await.unwrap().is_empty());
        assert_eq!(reader.environment_secrets(env).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn versions_are_listed_in_numeric_order() {
        let store = store();
        let (s, v1) = secret(Uuid::new_v4(), Uuid::new_v4(), "K");
        let mut txn = store.begin().await;
        txn.insert_secret(&s, &v1).await.unwrap();
        for n in 2..=11 {
            let mut v = v1.clone();
            v.id = Uuid::new_v4();
            v.version = n;
            txn.put_version(&v).unwrap();
        }
        txn.commit().await.unwrap();

        let numbers: Vec<u32> = store
            .reader()
            .await
            .versions(s.id)
            .await
            .unwrap()
            .iter()
            .map(|v| v.version)
            .collect();
        assert_eq!(numbers, (1..=11).collect::<Vec<_>>());
    }

    #[test]
    fn active_key_escapes_separators() {
        let env = Uuid::nil();
        assert_ne!(active_key(env, "/a/b", "c"), active_key(env, "/a", "b/c"));
    }
}
