//! Per-keyring attributes and their cache.
//!
//! Attributes (default key, sync state) are small records read on almost
//! every keyring call, so they are served from an in-memory cache:
//!
//! - the cache is rebuilt from storage by [`AttributeCache::init`]
//! - every write goes to storage first; the cache is updated only once
//!   the write succeeded, under the same lock

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Result;
use crate::storage::{attributes_key, keyring_id_from_attributes_key, Storage, KEYRING_PREFIX};
use crate::sync::SyncData;

/// Metadata of one keyring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyringAttributes {
    /// Pinned default private key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_key_fingerprint: Option<String>,
    /// Change-log synchronization state, present once sync was activated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_data: Option<SyncData>,
}

/// Write-through cache of all keyring attributes.
pub struct AttributeCache {
    storage: Arc<dyn Storage>,
    cache: RwLock<HashMap<String, KeyringAttributes>>,
}

impl AttributeCache {
    /// Empty cache over `storage`; call [`AttributeCache::init`] before use.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild the cache from storage.
    pub async fn init(&self) -> Result<()> {
        let mut cache = self.cache.write().await;
        cache.clear();
        for key in self.storage.keys_with_prefix(KEYRING_PREFIX).await? {
            let Some(id) = keyring_id_from_attributes_key(&key) else {
                continue;
            };
            if let Some(value) = self.storage.get(&key).await? {
                cache.insert(id.to_string(), serde_json::from_value(value)?);
            }
        }
        debug!(keyrings = cache.len(), "attribute cache rebuilt");
        Ok(())
    }

    /// Whether attributes exist for `keyring_id`.
    pub async fn contains(&self, keyring_id: &str) -> bool {
        self.cache.read().await.contains_key(keyring_id)
    }

    /// Attributes of `keyring_id`, defaults when none are stored.
    pub async fn get(&self, keyring_id: &str) -> KeyringAttributes {
        self.cache
            .read()
            .await
            .get(keyring_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Ids of all keyrings with attributes, sorted.
    pub async fn keyring_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.cache.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Snapshot of every keyring's attributes.
    pub async fn all(&self) -> HashMap<String, KeyringAttributes> {
        self.cache.read().await.clone()
    }

    /// Replace the attributes of `keyring_id`.
    pub async fn set(&self, keyring_id: &str, attributes: KeyringAttributes) -> Result<()> {
        let mut cache = self.cache.write().await;
        self.storage
            .set(&attributes_key(keyring_id), serde_json::to_value(&attributes)?)
            .await?;
        cache.insert(keyring_id.to_string(), attributes);
        Ok(())
    }

    /// Read-modify-write the attributes of `keyring_id`.
    pub async fn update<F>(&self, keyring_id: &str, f: F) -> Result<KeyringAttributes>
    where
        F: FnOnce(&mut KeyringAttributes) + Send,
    {
        let mut cache = self.cache.write().await;
        let mut attributes = cache.get(keyring_id).cloned().unwrap_or_default();
        f(&mut attributes);
        self.storage
            .set(&attributes_key(keyring_id), serde_json::to_value(&attributes)?)
            .await?;
        cache.insert(keyring_id.to_string(), attributes.clone());
        Ok(attributes)
    }

    /// Drop the attributes of `keyring_id`.
    pub async fn remove(&self, keyring_id: &str) -> Result<()> {
        let mut cache = self.cache.write().await;
        self.storage.remove(&attributes_key(keyring_id)).await?;
        cache.remove(keyring_id);
        Ok(())
    }
}
