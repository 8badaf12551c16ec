//! Keystore persisted to a [`Storage`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::{AddResult, AddedKey, Backend, KeyChange, KeyStore};
use crate::error::{ImportError, Result};
use crate::parse::{parse_key, parse_keys};
use crate::storage::{private_keys_key, public_keys_key, Storage};
use crate::types::{KeyEntry, KeyKind};

/// Keystore that keeps parsed keys in memory and writes the full set of
/// armored keys back to storage after every mutation.
pub struct LocalKeyStore {
    keyring_id: String,
    storage: Arc<dyn Storage>,
    keys: Vec<KeyEntry>,
}

impl LocalKeyStore {
    /// Keystore for `keyring_id`; call [`KeyStore::load`] before use.
    pub fn new(keyring_id: impl Into<String>, storage: Arc<dyn Storage>) -> Self {
        Self {
            keyring_id: keyring_id.into(),
            storage,
            keys: Vec::new(),
        }
    }

    /// Remove every record of this keyring from storage.
    pub async fn clear(&mut self) -> Result<()> {
        self.storage.remove(&public_keys_key(&self.keyring_id)).await?;
        self.storage.remove(&private_keys_key(&self.keyring_id)).await?;
        self.keys.clear();
        Ok(())
    }

    async fn load_kind(&self, kind: KeyKind) -> Result<Vec<KeyEntry>> {
        let key = self.storage_key(kind);
        let armored: Vec<String> = match self.storage.get(&key).await? {
            Some(value) => serde_json::from_value(value)?,
            None => Vec::new(),
        };

        let mut entries = Vec::with_capacity(armored.len());
        for text in armored {
            match parse_key(&text, kind) {
                Ok(mut entry) => {
                    // Keep the stored text verbatim
                    entry.armored = text;
                    entries.push(entry);
                }
                Err(e) => warn!(
                    keyring = %self.keyring_id,
                    %kind,
                    error = %e,
                    "skipping unreadable stored key"
                ),
            }
        }
        Ok(entries)
    }

    async fn persist(&self) -> Result<()> {
        for kind in [KeyKind::Public, KeyKind::Private] {
            let armored: Vec<&str> = self
                .keys
                .iter()
                .filter(|k| k.kind == kind)
                .map(|k| k.armored.as_str())
                .collect();
            self.storage
                .set(&self.storage_key(kind), Value::from(armored))
                .await?;
        }
        debug!(keyring = %self.keyring_id, count = self.keys.len(), "persisted keys");
        Ok(())
    }

    fn storage_key(&self, kind: KeyKind) -> String {
        match kind {
            KeyKind::Public => public_keys_key(&self.keyring_id),
            KeyKind::Private => private_keys_key(&self.keyring_id),
        }
    }

    fn position(&self, fingerprint: &str, kind: KeyKind) -> Option<usize> {
        self.keys
            .iter()
            .position(|k| k.kind == kind && k.fingerprint == fingerprint)
    }
}

#[async_trait]
impl KeyStore for LocalKeyStore {
    fn backend(&self) -> Backend {
        Backend::Local
    }

    async fn load(&mut self) -> Result<Vec<KeyEntry>> {
        let mut keys = self.load_kind(KeyKind::Public).await?;
        keys.extend(self.load_kind(KeyKind::Private).await?);
        self.keys = keys;
        Ok(self.keys.clone())
    }

    async fn store(&mut self, keys: Vec<KeyEntry>) -> Result<()> {
        self.keys = keys;
        self.persist().await
    }

    async fn add(&mut self, armored: &str, kind: KeyKind) -> Result<Vec<AddResult>> {
        let parsed = match parse_keys(armored, kind) {
            Ok(parsed) if !parsed.is_empty() => parsed,
            Ok(_) => {
                return Ok(vec![Err(ImportError::Malformed(
                    "no key found in armored text".to_string(),
                ))])
            }
            Err(e) => return Ok(vec![Err(ImportError::Malformed(e.to_string()))]),
        };

        let mut results = Vec::with_capacity(parsed.len());
        let mut dirty = false;

        for key in parsed {
            let entry = match key {
                Ok(entry) => entry,
                Err(e) => {
                    results.push(Err(ImportError::Malformed(e.to_string())));
                    continue;
                }
            };

            let change = match self.position(&entry.fingerprint, kind) {
                Some(i) if self.keys[i].armored == entry.armored => KeyChange::Unchanged,
                Some(i) => {
                    self.keys[i] = entry.clone();
                    KeyChange::Updated
                }
                None => {
                    self.keys.push(entry.clone());
                    KeyChange::Inserted
                }
            };
            dirty |= change != KeyChange::Unchanged;
            results.push(Ok(AddedKey { entry, change }));
        }

        if dirty {
            self.persist().await?;
        }
        Ok(results)
    }

    async fn remove(&mut self, fingerprint: &str, kind: KeyKind) -> Result<bool> {
        match self.position(fingerprint, kind) {
            Some(i) => {
                self.keys.remove(i);
                self.persist().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn keys(&self) -> &[KeyEntry] {
        &self.keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[tokio::test]
    async fn test_add_garbage_reports_malformed() {
        let mut store = LocalKeyStore::new("test", Arc::new(MemoryStorage::new()));
        store.load().await.unwrap();

        let results = store.add("garbage", KeyKind::Public).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(ImportError::Malformed(_))));
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_store_replaces_persisted_set() {
        use crate::key::create_key;
        use crate::types::GenerateKeyParams;

        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut store = LocalKeyStore::new("test", storage.clone());
        store.load().await.unwrap();

        let mut entries = Vec::new();
        for uid in ["A <a@example.com>", "B <b@example.com>"] {
            let key = create_key(&GenerateKeyParams::new(uid, "pw")).unwrap();
            entries.push(parse_key(&key.public_key, KeyKind::Public).unwrap());
            entries.push(parse_key(&key.private_key, KeyKind::Private).unwrap());
        }
        store.store(entries.clone()).await.unwrap();

        let mut reopened = LocalKeyStore::new("test", storage.clone());
        let loaded = reopened.load().await.unwrap();
        let fingerprints = |keys: &[KeyEntry], kind: KeyKind| {
            let mut f: Vec<String> = keys
                .iter()
                .filter(|k| k.kind == kind)
                .map(|k| k.fingerprint.clone())
                .collect();
            f.sort();
            f
        };
        for kind in [KeyKind::Public, KeyKind::Private] {
            assert_eq!(fingerprints(&loaded, kind), fingerprints(&entries, kind));
        }

        // Storing a smaller set drops the rest
        reopened.store(entries[..2].to_vec()).await.unwrap();
        let mut again = LocalKeyStore::new("test", storage);
        assert_eq!(again.load().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_load_skips_unreadable_records() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set(&public_keys_key("test"), serde_json::json!(["not a key"]))
            .await
            .unwrap();

        let mut store = LocalKeyStore::new("test", storage);
        assert!(store.load().await.unwrap().is_empty());
    }
}
