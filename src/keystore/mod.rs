//! Raw key material storage for one keyring.
//!
//! A [`KeyStore`] holds the armored public and private keys of a single
//! keyring behind a uniform load/store/add/remove contract. Two backends
//! exist:
//!
//! - [`LocalKeyStore`]: keys parsed in-process and persisted to a
//!   [`Storage`](crate::storage::Storage), the full set rewritten on every
//!   mutation
//! - [`GpgKeyStore`]: keys owned by an external GnuPG agent
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mailkeys::keystore::{KeyStore, LocalKeyStore};
//! use mailkeys::storage::MemoryStorage;
//! use mailkeys::KeyKind;
//!
//! # async fn demo(armored: &str) -> mailkeys::Result<()> {
//! let mut store = LocalKeyStore::new("main", Arc::new(MemoryStorage::new()));
//! store.load().await?;
//! for result in store.add(armored, KeyKind::Public).await? {
//!     println!("{:?}", result.map(|added| added.entry.fingerprint));
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ImportError, Result};
use crate::gnupg::GpgAgent;
use crate::types::{KeyEntry, KeyKind};

mod gpg;
mod local;

pub use gpg::GpgKeyStore;
pub use local::LocalKeyStore;

/// Which backend a keystore uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Keys parsed and stored by this library
    Local,
    /// Keys owned by the GnuPG agent
    GnuPg,
}

/// What adding a key changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyChange {
    /// The key was not present before
    Inserted,
    /// A different copy of the key replaced the stored one
    Updated,
    /// An identical copy was already stored
    Unchanged,
}

/// A key accepted by [`KeyStore::add`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedKey {
    /// The stored entry
    pub entry: KeyEntry,
    /// What changed
    pub change: KeyChange,
}

/// Per-key result of [`KeyStore::add`].
pub type AddResult = std::result::Result<AddedKey, ImportError>;

/// Storage contract for the key material of one keyring.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Backend of this store.
    fn backend(&self) -> Backend;

    /// (Re)load all keys from the backend.
    async fn load(&mut self) -> Result<Vec<KeyEntry>>;

    /// Replace the whole key set and persist it.
    async fn store(&mut self, keys: Vec<KeyEntry>) -> Result<()>;

    /// Add every key of `kind` found in `armored`.
    ///
    /// Malformed keys are reported per item; the call itself fails only
    /// when the backend fails.
    async fn add(&mut self, armored: &str, kind: KeyKind) -> Result<Vec<AddResult>>;

    /// Remove one key half. Returns whether it was present.
    async fn remove(&mut self, fingerprint: &str, kind: KeyKind) -> Result<bool>;

    /// Keys currently loaded.
    fn keys(&self) -> &[KeyEntry];

    /// Default key chosen by the backend itself, if it has that notion.
    async fn backend_default_key(&self) -> Result<Option<String>> {
        Ok(None)
    }

    /// Agent used for private-key operations, for agent-backed stores.
    fn agent(&self) -> Option<Arc<dyn GpgAgent>> {
        None
    }
}
