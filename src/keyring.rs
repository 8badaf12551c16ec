//! Key-level operations on one keyring.
//!
//! A [`Keyring`] wraps a [`KeyStore`] and adds what callers work with:
//! queries by address, key id and fingerprint, batch import with per-key
//! outcomes, default key selection, key generation and the change log that
//! lets replicas of the keyring converge.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::attributes::AttributeCache;
use crate::error::{Error, ImportError, Result};
use crate::internal::normalize_fingerprint;
use crate::key::create_key;
use crate::keystore::{AddResult, AddedKey, Backend, KeyChange, KeyStore};
use crate::sync::{ChangeType, KeyringSync};
use crate::types::{
    GenerateKeyParams, GeneratedKey, ImportOutcome, ImportRequest, ImportStatus, KeyData,
    KeyEntry, KeyKind, KeyringId,
};

/// Publishes public keys on a key server.
#[async_trait]
pub trait KeyUploader: Send + Sync {
    /// Upload an armored public key.
    async fn upload(&self, armored: &str, primary_email: Option<&str>) -> Result<()>;
}

/// A named collection of keys plus its default key and sync state.
pub struct Keyring {
    id: KeyringId,
    store: Box<dyn KeyStore>,
    attributes: Arc<AttributeCache>,
    sync: KeyringSync,
    uploader: Option<Arc<dyn KeyUploader>>,
}

impl Keyring {
    /// Keyring over `store`; call [`Keyring::load`] before use.
    pub fn new(
        id: impl Into<KeyringId>,
        store: Box<dyn KeyStore>,
        attributes: Arc<AttributeCache>,
    ) -> Self {
        let id = id.into();
        let sync = KeyringSync::new(id.clone(), attributes.clone());
        Self {
            id,
            store,
            attributes,
            sync,
            uploader: None,
        }
    }

    /// Key server used by [`Keyring::generate_key`] uploads.
    pub fn with_uploader(mut self, uploader: Arc<dyn KeyUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    /// Load keys and sync state.
    pub async fn load(&mut self) -> Result<()> {
        let keys = self.store.load().await?;
        self.sync.init().await;
        debug!(keyring = %self.id, count = keys.len(), "keyring loaded");
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn backend(&self) -> Backend {
        self.store.backend()
    }

    pub fn sync(&self) -> &KeyringSync {
        &self.sync
    }

    pub fn sync_mut(&mut self) -> &mut KeyringSync {
        &mut self.sync
    }

    pub(crate) fn store(&self) -> &dyn KeyStore {
        self.store.as_ref()
    }

    /// All keys, public and private halves.
    pub fn get_keys(&self) -> &[KeyEntry] {
        self.store.keys()
    }

    pub fn get_public_keys(&self) -> Vec<&KeyEntry> {
        self.keys_of(KeyKind::Public)
    }

    pub fn get_private_keys(&self) -> Vec<&KeyEntry> {
        self.keys_of(KeyKind::Private)
    }

    /// Summary of every key, with the default key flagged.
    pub async fn get_key_data(&self) -> Result<Vec<KeyData>> {
        let default = self.get_default_key_fpr().await?;
        Ok(self
            .get_keys()
            .iter()
            .map(|k| {
                let primary = k.primary_user_id();
                KeyData {
                    fingerprint: k.fingerprint.clone(),
                    kind: k.kind,
                    name: primary.map(|u| u.name.clone()).unwrap_or_default(),
                    email: primary.and_then(|u| u.email.clone()),
                    is_default: k.kind == KeyKind::Private
                        && default.as_deref() == Some(k.fingerprint.as_str()),
                    valid: k.valid,
                    creation_time: k.creation_time,
                }
            })
            .collect())
    }

    /// Find a key half by fingerprint.
    ///
    /// Without `kind` the public half is preferred.
    pub fn get_key_by_fingerprint(&self, fingerprint: &str, kind: Option<KeyKind>) -> Option<&KeyEntry> {
        let fingerprint = normalize_fingerprint(fingerprint);
        let find = |kind: KeyKind| {
            self.get_keys()
                .iter()
                .find(|k| k.kind == kind && k.fingerprint == fingerprint)
        };
        match kind {
            Some(kind) => find(kind),
            None => find(KeyKind::Public).or_else(|| find(KeyKind::Private)),
        }
    }

    /// Keys whose primary key or a subkey has `key_id`.
    pub fn get_keys_by_key_id(&self, key_id: &str) -> Vec<&KeyEntry> {
        let key_id = normalize_fingerprint(key_id);
        self.get_keys()
            .iter()
            .filter(|k| k.has_key_id(&key_id))
            .collect()
    }

    /// Keys per email address.
    ///
    /// Addresses compare case-insensitively. Each fingerprint appears once
    /// per address, as its public half when the keyring has one. An address
    /// without keys maps to `None`.
    pub fn get_key_by_address(&self, addresses: &[&str]) -> HashMap<String, Option<Vec<KeyEntry>>> {
        addresses
            .iter()
            .map(|address| {
                let wanted = address.trim().to_lowercase();
                let mut seen = HashSet::new();
                let mut matches: Vec<KeyEntry> = Vec::new();
                for kind in [KeyKind::Public, KeyKind::Private] {
                    for key in self.keys_of(kind) {
                        if key.emails().any(|e| e == wanted) && seen.insert(key.fingerprint.clone()) {
                            matches.push(key.clone());
                        }
                    }
                }
                (address.to_string(), (!matches.is_empty()).then_some(matches))
            })
            .collect()
    }

    /// Whether one of `fingerprints` has a private key here.
    ///
    /// An empty list asks whether the keyring has any private key.
    pub fn has_private_key(&self, fingerprints: &[&str]) -> bool {
        if fingerprints.is_empty() {
            return !self.get_private_keys().is_empty();
        }
        fingerprints
            .iter()
            .any(|f| self.get_key_by_fingerprint(f, Some(KeyKind::Private)).is_some())
    }

    /// Import a batch of armored keys.
    ///
    /// Every key found in the batch gets one outcome. Malformed keys are
    /// reported as errors and do not stop the batch; identical re-imports
    /// are reported as warnings. A private key imported while the keyring
    /// has no default becomes the default.
    ///
    /// # Errors
    /// [`Error::AgentAborted`] when the GnuPG agent could not read the input.
    pub async fn import_keys(&mut self, requests: &[ImportRequest]) -> Result<Vec<ImportOutcome>> {
        let mut outcomes = Vec::new();
        for request in requests {
            let before = self.fingerprints();
            let results = match self.store.add(&request.armored, request.kind).await {
                Ok(results) => results,
                Err(Error::AgentAborted) => return Err(Error::AgentAborted),
                Err(e) => {
                    warn!(keyring = %self.id, error = %e, "key import failed");
                    outcomes.push(ImportOutcome {
                        status: ImportStatus::Error,
                        fingerprint: None,
                        message: e.to_string(),
                    });
                    continue;
                }
            };
            for result in results {
                outcomes.push(self.record_import(result, &before).await?);
            }
        }
        Ok(outcomes)
    }

    async fn record_import(&mut self, result: AddResult, before: &HashSet<String>) -> Result<ImportOutcome> {
        let AddedKey { entry, change } = match result {
            Ok(added) => added,
            Err(ImportError::AlreadyExists(fingerprint)) => {
                return Ok(ImportOutcome {
                    status: ImportStatus::Warning,
                    message: format!("Key {} already exists", fingerprint),
                    fingerprint: Some(fingerprint),
                })
            }
            Err(e) => {
                let fingerprint = match &e {
                    ImportError::Rejected(f) => Some(f.clone()),
                    _ => None,
                };
                return Ok(ImportOutcome {
                    status: ImportStatus::Error,
                    fingerprint,
                    message: e.to_string(),
                });
            }
        };

        let fingerprint = entry.fingerprint.clone();
        let message = match change {
            KeyChange::Unchanged => {
                return Ok(ImportOutcome {
                    status: ImportStatus::Warning,
                    message: format!("Key {} already exists", fingerprint),
                    fingerprint: Some(fingerprint),
                })
            }
            KeyChange::Inserted => format!("Key {} imported", fingerprint),
            KeyChange::Updated => format!("Key {} updated", fingerprint),
        };

        self.log_change(&fingerprint, before.contains(&fingerprint)).await?;
        if entry.kind == KeyKind::Private
            && self.backend() == Backend::Local
            && self.pinned_default().await.is_none()
        {
            self.pin_default(Some(fingerprint.clone())).await?;
        }
        info!(keyring = %self.id, fingerprint = %fingerprint, kind = %entry.kind, "key imported");

        Ok(ImportOutcome {
            status: ImportStatus::Success,
            fingerprint: Some(fingerprint),
            message,
        })
    }

    /// Remove one half of a key.
    ///
    /// Removing the default private key clears the pinned default.
    pub async fn remove_key(&mut self, fingerprint: &str, kind: KeyKind) -> Result<()> {
        let fingerprint = normalize_fingerprint(fingerprint);
        let was_present = self.fingerprints().contains(&fingerprint);
        if !self.store.remove(&fingerprint, kind).await? {
            return Err(Error::KeyNotFound(fingerprint));
        }

        if kind == KeyKind::Private {
            let pinned = self.attributes.get(&self.id).await.default_key_fingerprint;
            if pinned.as_deref() == Some(fingerprint.as_str()) {
                self.pin_default(None).await?;
            }
        }
        self.log_change(&fingerprint, was_present).await?;
        info!(keyring = %self.id, fingerprint = %fingerprint, %kind, "key removed");
        Ok(())
    }

    /// Fingerprint of the default private key.
    ///
    /// The pinned default if it still names a valid private key, else the
    /// newest valid private key. The fallback is not persisted.
    pub async fn get_default_key_fpr(&self) -> Result<Option<String>> {
        if self.backend() == Backend::GnuPg {
            return self.store.backend_default_key().await;
        }
        if let Some(pinned) = self.pinned_default().await {
            return Ok(Some(pinned));
        }
        Ok(self
            .get_private_keys()
            .into_iter()
            .filter(|k| k.valid)
            .max_by_key(|k| k.creation_time)
            .map(|k| k.fingerprint.clone()))
    }

    /// The default private key.
    ///
    /// # Errors
    /// [`Error::NoDefaultKey`] when the keyring has no usable private key.
    pub async fn get_default_key(&self) -> Result<KeyEntry> {
        self.get_default_key_fpr()
            .await?
            .and_then(|f| self.get_key_by_fingerprint(&f, Some(KeyKind::Private)).cloned())
            .ok_or_else(|| Error::NoDefaultKey(self.id.clone()))
    }

    /// Pin the default private key.
    pub async fn set_default_key(&mut self, fingerprint: &str) -> Result<()> {
        if self.backend() == Backend::GnuPg {
            return Err(Error::Unsupported(
                "the GnuPG keyring uses the agent's default key".to_string(),
            ));
        }
        let fingerprint = normalize_fingerprint(fingerprint);
        if self
            .get_key_by_fingerprint(&fingerprint, Some(KeyKind::Private))
            .is_none()
        {
            return Err(Error::KeyNotFound(fingerprint));
        }
        self.pin_default(Some(fingerprint)).await
    }

    /// Generate a key pair and import its private half.
    ///
    /// With `upload_to_key_server` set, the public key is uploaded after it
    /// was stored; an upload failure is returned as the error of this call
    /// while the key stays in the keyring.
    pub async fn generate_key(&mut self, params: &GenerateKeyParams) -> Result<GeneratedKey> {
        if self.backend() == Backend::GnuPg {
            return Err(Error::Unsupported(
                "keys cannot be generated in the GnuPG keyring".to_string(),
            ));
        }

        let key_params = params.clone();
        let key = tokio::task::spawn_blocking(move || create_key(&key_params))
            .await
            .map_err(|e| Error::Crypto(e.to_string()))??;

        let outcomes = self
            .import_keys(&[ImportRequest::private(key.private_key.clone())])
            .await?;
        if let Some(failed) = outcomes.iter().find(|o| o.status == ImportStatus::Error) {
            return Err(Error::Crypto(failed.message.clone()));
        }

        if params.upload_to_key_server {
            let uploader = self.uploader.as_ref().ok_or_else(|| {
                Error::Unsupported("no key server configured for upload".to_string())
            })?;
            let primary_email = params
                .user_ids
                .first()
                .and_then(|uid| crate::types::UserIdentity::from_uid(uid, true).email);
            uploader
                .upload(&key.public_key, primary_email.as_deref())
                .await?;
            info!(fingerprint = %key.fingerprint, "public key uploaded");
        }
        Ok(key)
    }

    /// Add a public key received from a replica, without logging a change.
    pub(crate) async fn import_synced(&mut self, armored: &str) -> Result<Vec<AddResult>> {
        self.store.add(armored, KeyKind::Public).await
    }

    /// Drop a public key deleted on a replica, without logging a change.
    pub(crate) async fn remove_synced(&mut self, fingerprint: &str) -> Result<bool> {
        self.store.remove(fingerprint, KeyKind::Public).await
    }

    fn keys_of(&self, kind: KeyKind) -> Vec<&KeyEntry> {
        self.get_keys().iter().filter(|k| k.kind == kind).collect()
    }

    fn fingerprints(&self) -> HashSet<String> {
        self.get_keys().iter().map(|k| k.fingerprint.clone()).collect()
    }

    async fn pinned_default(&self) -> Option<String> {
        let pinned = self.attributes.get(&self.id).await.default_key_fingerprint?;
        self.get_key_by_fingerprint(&pinned, Some(KeyKind::Private))
            .filter(|k| k.valid)
            .map(|k| k.fingerprint.clone())
    }

    async fn pin_default(&self, fingerprint: Option<String>) -> Result<()> {
        debug!(keyring = %self.id, default = ?fingerprint, "default key changed");
        self.attributes
            .update(&self.id, move |a| a.default_key_fingerprint = fingerprint)
            .await?;
        Ok(())
    }

    /// Log a mutation of `fingerprint` by comparing presence before and after.
    async fn log_change(&mut self, fingerprint: &str, was_present: bool) -> Result<()> {
        let present = self.fingerprints().contains(fingerprint);
        let change_type = match (was_present, present) {
            (false, true) => ChangeType::Insert,
            (true, true) => ChangeType::Update,
            (_, false) => ChangeType::Delete,
        };
        self.sync.add(fingerprint, change_type).await
    }
}
