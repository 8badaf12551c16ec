//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use mailkeys::storage::{MemoryStorage, Storage};
use mailkeys::{
    create_key, GenerateKeyParams, GeneratedKey, KeyringHandle, KeyringRegistry, MAIN_KEYRING_ID,
};

pub const TEST_PASSWORD: &str = "test-password-123";

/// Generate a Curve25519 key for `uid`.
pub fn generate_key(uid: &str) -> GeneratedKey {
    create_key(&GenerateKeyParams::new(uid, TEST_PASSWORD)).unwrap()
}

/// Registry over fresh in-memory storage.
pub async fn memory_registry() -> (KeyringRegistry, Arc<dyn Storage>) {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let registry = KeyringRegistry::new(storage.clone());
    registry.init().await.unwrap();
    (registry, storage)
}

/// The main keyring of a fresh in-memory registry.
pub async fn main_keyring() -> (KeyringRegistry, KeyringHandle) {
    let (registry, _) = memory_registry().await;
    let keyring = registry.get_keyring(MAIN_KEYRING_ID).await.unwrap();
    (registry, keyring)
}
