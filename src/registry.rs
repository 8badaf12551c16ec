//! Registry of all keyrings of an installation.
//!
//! The registry is an ordinary value constructed once at startup and
//! passed to whoever needs keyrings. Keyrings are loaded lazily on first
//! access and handed out as [`KeyringHandle`]s: mutating calls take the
//! write lock, which serializes read-modify-write cycles on one keyring.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::attributes::{AttributeCache, KeyringAttributes};
use crate::error::{Error, Result};
use crate::config::Config;
use crate::gnupg::{GpgAgent, NativeMessagingAgent};
use crate::keyring::{KeyUploader, Keyring};
use crate::keystore::{GpgKeyStore, KeyStore, LocalKeyStore};
use crate::storage::Storage;
use crate::types::{KeyringId, GNUPG_KEYRING_ID, MAIN_KEYRING_ID};

/// Shared handle to a loaded keyring.
pub type KeyringHandle = Arc<RwLock<Keyring>>;

/// Owns the attribute cache and the loaded keyrings.
pub struct KeyringRegistry {
    storage: Arc<dyn Storage>,
    attributes: Arc<AttributeCache>,
    agent: Option<Arc<dyn GpgAgent>>,
    uploader: Option<Arc<dyn KeyUploader>>,
    keyrings: Mutex<HashMap<KeyringId, KeyringHandle>>,
}

impl KeyringRegistry {
    /// Registry over `storage`; call [`KeyringRegistry::init`] before use.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            attributes: Arc::new(AttributeCache::new(storage.clone())),
            storage,
            agent: None,
            uploader: None,
            keyrings: Mutex::new(HashMap::new()),
        }
    }

    /// Registry wired from `config`.
    ///
    /// The GnuPG keyring is enabled when `gnupg.native_host` is set. With
    /// the `network` feature, generated keys are uploaded to `lookup.mks_url`.
    pub fn from_config(storage: Arc<dyn Storage>, config: &Config) -> Result<Self> {
        config.validate()?;
        let mut registry = Self::new(storage);
        if let Some(agent) = NativeMessagingAgent::from_config(&config.gnupg) {
            registry = registry.with_agent(Arc::new(agent));
        }
        #[cfg(feature = "network")]
        if !config.lookup.mks_url.is_empty() {
            let client = reqwest::Client::builder()
                .timeout(config.lookup.request_timeout)
                .build()?;
            let uploader = crate::lookup::KeyServerClient::with_client(&config.lookup.mks_url, client)?;
            registry = registry.with_uploader(Arc::new(uploader));
        }
        Ok(registry)
    }

    /// Enable the GnuPG keyring.
    pub fn with_agent(mut self, agent: Arc<dyn GpgAgent>) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Key server for uploads of generated keys.
    pub fn with_uploader(mut self, uploader: Arc<dyn KeyUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    /// Rebuild the attribute cache and make sure the main keyring exists.
    pub async fn init(&self) -> Result<()> {
        self.keyrings.lock().await.clear();
        self.attributes.init().await?;
        if !self.attributes.contains(MAIN_KEYRING_ID).await {
            self.attributes
                .set(MAIN_KEYRING_ID, KeyringAttributes::default())
                .await?;
            info!("main keyring created");
        }
        Ok(())
    }

    pub fn attributes(&self) -> &Arc<AttributeCache> {
        &self.attributes
    }

    /// Create an empty keyring.
    pub async fn create_keyring(&self, id: &str) -> Result<KeyringHandle> {
        let mut keyrings = self.keyrings.lock().await;
        if self.exists(id).await {
            return Err(Error::KeyringExists(id.to_string()));
        }
        if id == GNUPG_KEYRING_ID {
            return Err(Error::Unsupported(
                "the GnuPG keyring is provided by the agent".to_string(),
            ));
        }
        self.attributes
            .set(id, KeyringAttributes::default())
            .await?;
        let handle = self.open(id).await?;
        keyrings.insert(id.to_string(), handle.clone());
        info!(keyring = %id, "keyring created");
        Ok(handle)
    }

    /// Keyring by id, loading it on first access.
    pub async fn get_keyring(&self, id: &str) -> Result<KeyringHandle> {
        let mut keyrings = self.keyrings.lock().await;
        if let Some(handle) = keyrings.get(id) {
            return Ok(handle.clone());
        }
        if !self.exists(id).await {
            return Err(Error::KeyringNotFound(id.to_string()));
        }
        let handle = self.open(id).await?;
        keyrings.insert(id.to_string(), handle.clone());
        Ok(handle)
    }

    /// Delete a keyring with all its keys.
    pub async fn delete_keyring(&self, id: &str) -> Result<()> {
        if id == MAIN_KEYRING_ID || id == GNUPG_KEYRING_ID {
            return Err(Error::InvalidInput(format!("keyring {} cannot be deleted", id)));
        }
        let mut keyrings = self.keyrings.lock().await;
        if !self.attributes.contains(id).await {
            return Err(Error::KeyringNotFound(id.to_string()));
        }
        LocalKeyStore::new(id, self.storage.clone()).clear().await?;
        self.attributes.remove(id).await?;
        keyrings.remove(id);
        info!(keyring = %id, "keyring deleted");
        Ok(())
    }

    /// Ids of all keyrings, the GnuPG keyring included when enabled.
    pub async fn keyring_ids(&self) -> Vec<KeyringId> {
        let mut ids = self.attributes.keyring_ids().await;
        if self.agent.is_some() && !ids.iter().any(|id| id == GNUPG_KEYRING_ID) {
            ids.push(GNUPG_KEYRING_ID.to_string());
        }
        ids
    }

    /// Attributes of every keyring.
    pub async fn get_all_keyring_attributes(&self) -> HashMap<KeyringId, KeyringAttributes> {
        self.attributes.all().await
    }

    /// First keyring holding a private key for one of `fingerprints`.
    ///
    /// `preferred` is searched first. An empty list matches any keyring
    /// with a private key. Keyrings that fail to open are skipped.
    pub async fn get_keyring_with_private_key(
        &self,
        fingerprints: &[&str],
        preferred: Option<&str>,
    ) -> Result<Option<KeyringHandle>> {
        let mut ids = self.keyring_ids().await;
        if let Some(preferred) = preferred {
            if let Some(pos) = ids.iter().position(|id| id == preferred) {
                let id = ids.remove(pos);
                ids.insert(0, id);
            }
        }
        for id in ids {
            let handle = match self.get_keyring(&id).await {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(keyring = %id, error = %e, "skipping keyring that failed to open");
                    continue;
                }
            };
            if handle.read().await.has_private_key(fingerprints) {
                return Ok(Some(handle));
            }
        }
        Ok(None)
    }

    async fn exists(&self, id: &str) -> bool {
        (id == GNUPG_KEYRING_ID && self.agent.is_some()) || self.attributes.contains(id).await
    }

    async fn open(&self, id: &str) -> Result<KeyringHandle> {
        let store: Box<dyn KeyStore> = match (&self.agent, id == GNUPG_KEYRING_ID) {
            (Some(agent), true) => Box::new(GpgKeyStore::new(agent.clone())),
            _ => Box::new(LocalKeyStore::new(id, self.storage.clone())),
        };
        let mut keyring = Keyring::new(id, store, self.attributes.clone());
        if let Some(uploader) = &self.uploader {
            keyring = keyring.with_uploader(uploader.clone());
        }
        keyring.load().await?;
        debug!(keyring = %id, "keyring opened");
        Ok(Arc::new(RwLock::new(keyring)))
    }
}
