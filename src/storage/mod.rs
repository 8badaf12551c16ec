//! Key/value persistence behind the keystores.
//!
//! Keyrings persist JSON records under string keys, the same way a
//! browser extension uses its local storage area. Two backends exist:
//!
//! - [`MemoryStorage`]: a process-local map, for tests and ephemeral sessions
//! - [`SqliteStorage`]: a SQLite file (requires the `sqlite` feature)
//!
//! # Layout
//!
//! | Key | Value |
//! |-----|-------|
//! | `keyring.<id>.publicKeys` | JSON array of armored public keys |
//! | `keyring.<id>.privateKeys` | JSON array of armored private keys |
//! | `keyring.<id>.attributes` | keyring attributes object |

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

mod memory;
#[cfg(feature = "sqlite")]
mod schema;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStorage;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

/// Prefix shared by all keyring records.
pub const KEYRING_PREFIX: &str = "keyring.";

/// Storage key of a keyring's armored public keys.
pub fn public_keys_key(keyring_id: &str) -> String {
    format!("{}{}.publicKeys", KEYRING_PREFIX, keyring_id)
}

/// Storage key of a keyring's armored private keys.
pub fn private_keys_key(keyring_id: &str) -> String {
    format!("{}{}.privateKeys", KEYRING_PREFIX, keyring_id)
}

/// Storage key of a keyring's attributes record.
pub fn attributes_key(keyring_id: &str) -> String {
    format!("{}{}.attributes", KEYRING_PREFIX, keyring_id)
}

/// Keyring id encoded in an attributes key, if `key` is one.
pub(crate) fn keyring_id_from_attributes_key(key: &str) -> Option<&str> {
    key.strip_prefix(KEYRING_PREFIX)?.strip_suffix(".attributes")
}

/// Asynchronous JSON key/value store.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read a record.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write (replace) a record.
    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Delete a record; deleting a missing record is not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// All keys starting with `prefix`, sorted.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_keys() {
        assert_eq!(public_keys_key("main"), "keyring.main.publicKeys");
        assert_eq!(private_keys_key("main"), "keyring.main.privateKeys");
        assert_eq!(attributes_key("a|#|b"), "keyring.a|#|b.attributes");
        assert_eq!(keyring_id_from_attributes_key("keyring.a|#|b.attributes"), Some("a|#|b"));
        assert_eq!(keyring_id_from_attributes_key("keyring.a.publicKeys"), None);
    }
}
