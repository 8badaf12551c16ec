//! Keystore backed by the GnuPG agent.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{AddResult, AddedKey, Backend, KeyChange, KeyStore};
use crate::error::{Error, ImportError, Result};
use crate::gnupg::GpgAgent;
use crate::internal::normalize_fingerprint;
use crate::parse::parse_keys;
use crate::types::{KeyEntry, KeyKind};

/// Keystore whose keys live in GnuPG.
///
/// Private entries carry the public armor: secret material never leaves
/// the agent, and private-key operations are delegated to it.
pub struct GpgKeyStore {
    agent: Arc<dyn GpgAgent>,
    keys: Vec<KeyEntry>,
}

impl GpgKeyStore {
    /// Keystore over `agent`; call [`KeyStore::load`] before use.
    pub fn new(agent: Arc<dyn GpgAgent>) -> Self {
        Self {
            agent,
            keys: Vec::new(),
        }
    }

    fn find(&self, fingerprint: &str, kind: KeyKind) -> Option<&KeyEntry> {
        self.keys
            .iter()
            .find(|k| k.kind == kind && k.fingerprint == fingerprint)
    }
}

#[async_trait]
impl KeyStore for GpgKeyStore {
    fn backend(&self) -> Backend {
        Backend::GnuPg
    }

    async fn load(&mut self) -> Result<Vec<KeyEntry>> {
        let exported = self.agent.get_keys_armored().await?;
        let secret: HashSet<String> = exported
            .secret_fingerprints
            .iter()
            .map(|f| normalize_fingerprint(f))
            .collect();

        let mut keys = Vec::new();
        if !exported.armored.trim().is_empty() {
            for parsed in parse_keys(&exported.armored, KeyKind::Public)? {
                match parsed {
                    Ok(entry) => {
                        if secret.contains(&entry.fingerprint) {
                            let mut private = entry.clone();
                            private.kind = KeyKind::Private;
                            keys.push(private);
                        }
                        keys.push(entry);
                    }
                    Err(e) => warn!(error = %e, "skipping unreadable key exported by agent"),
                }
            }
        }

        debug!(count = keys.len(), "loaded keys from GnuPG agent");
        self.keys = keys;
        Ok(self.keys.clone())
    }

    async fn store(&mut self, _keys: Vec<KeyEntry>) -> Result<()> {
        Err(Error::Unsupported(
            "GnuPG keyring is managed by the agent".to_string(),
        ))
    }

    async fn add(&mut self, armored: &str, kind: KeyKind) -> Result<Vec<AddResult>> {
        let result = self.agent.import_keys(armored).await?;
        if result.is_aborted() {
            return Err(Error::AgentAborted);
        }

        let previous: Vec<KeyEntry> = self.keys.clone();
        self.load().await?;

        let mut results = Vec::with_capacity(result.keys.len());
        for imported in &result.keys {
            let fingerprint = normalize_fingerprint(&imported.key.fingerprint);
            let change = match imported.status.as_str() {
                "newkey" | "new" => KeyChange::Inserted,
                "change" | "changed" => KeyChange::Updated,
                "nochange" | "unchanged" => KeyChange::Unchanged,
                other => {
                    warn!(fingerprint = %fingerprint, status = %other, "agent rejected key");
                    results.push(Err(ImportError::Rejected(fingerprint)));
                    continue;
                }
            };

            // Prefer the half that was asked for, fall back to the public one
            let entry = self
                .find(&fingerprint, kind)
                .or_else(|| self.find(&fingerprint, KeyKind::Public))
                .cloned();
            match entry {
                Some(entry) => {
                    let change = match change {
                        KeyChange::Inserted if previous.contains(&entry) => KeyChange::Unchanged,
                        other => other,
                    };
                    results.push(Ok(AddedKey { entry, change }));
                }
                None => results.push(Err(ImportError::Rejected(fingerprint))),
            }
        }
        Ok(results)
    }

    async fn remove(&mut self, _fingerprint: &str, _kind: KeyKind) -> Result<bool> {
        Err(Error::Unsupported(
            "keys cannot be removed from the GnuPG keyring".to_string(),
        ))
    }

    fn keys(&self) -> &[KeyEntry] {
        &self.keys
    }

    async fn backend_default_key(&self) -> Result<Option<String>> {
        Ok(self
            .agent
            .get_default_key()
            .await?
            .map(|f| normalize_fingerprint(&f)))
    }

    fn agent(&self) -> Option<Arc<dyn GpgAgent>> {
        Some(self.agent.clone())
    }
}
