//! # mailkeys
//!
//! OpenPGP keyring management for webmail encryption, built on
//! [rpgp](https://docs.rs/pgp).
//!
//! This library provides the key-handling core of a mail encryption
//! client:
//!
//! - **Keyrings**: named key collections over local storage or a GnuPG agent
//! - **Synchronization**: change-log merge between replicas of a keyring
//! - **Key Discovery**: Autocrypt, Web Key Directory and key servers, in priority order
//! - **Password Cache**: time-boxed cache of unlocked private keys
//! - **Crypto Operations**: encrypt, decrypt, sign, verify and private key backups
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use mailkeys::*;
//! use mailkeys::storage::MemoryStorage;
//!
//! # async fn demo() -> mailkeys::Result<()> {
//! let registry = KeyringRegistry::new(Arc::new(MemoryStorage::new()));
//! registry.init().await?;
//!
//! let keyring = registry.get_keyring(MAIN_KEYRING_ID).await?;
//! let key = keyring
//!     .write()
//!     .await
//!     .generate_key(&GenerateKeyParams::new("Alice <alice@example.com>", "password"))
//!     .await?;
//!
//! let cache = Arc::new(PasswordCache::new(Config::default().password_cache));
//! let unlock = PassphraseUnlock::new(cache, "password");
//!
//! let keyring = keyring.read().await;
//! let recipients = [Recipient::Email("alice@example.com".to_string())];
//! let ciphertext = encrypt_message(&keyring, "Hello!", &recipients, None, None).await?;
//! let plaintext = decrypt_message(&keyring, &ciphertext, &unlock).await?;
//! assert_eq!(plaintext.text(), "Hello!");
//! # let _ = key;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - `sqlite` (default): SQLite-backed storage (requires `rusqlite`)
//! - `network` (default): WKD and key server discovery, key upload (requires `reqwest`)
//!
//! ## Concurrency
//!
//! Keyrings are shared as `Arc<RwLock<Keyring>>`. Mutating calls need the
//! write lock, so read-modify-write cycles on one keyring never interleave.

// Modules
mod error;
mod internal;
mod types;

mod decrypt;
mod encrypt;
mod key;
mod parse;
mod sign;
mod verify;

pub mod attributes;
pub mod config;
pub mod gnupg;
pub mod keyring;
pub mod keystore;
pub mod lookup;
pub mod operations;
pub mod password_cache;
pub mod registry;
pub mod storage;
pub mod sync;

// Re-export error types
pub use error::{Error, ImportError, Result};

// Re-export all public types
pub use types::{
    CipherSuite, GenerateKeyParams, GeneratedKey, ImportOutcome, ImportRequest, ImportStatus,
    KeyData, KeyEntry, KeyKind, KeyringId, LookupQuery, LookupResult, LookupSource, UserIdentity,
    GNUPG_KEYRING_ID, MAIN_KEYRING_ID,
};

pub use attributes::KeyringAttributes;
pub use config::Config;
pub use encrypt::bytes_encrypted_for;
pub use key::create_key;
pub use keyring::{KeyUploader, Keyring};
pub use lookup::{KeyRegistry, KeySource};
pub use operations::{
    create_private_key_backup, decrypt_file, decrypt_message, encrypt_file, encrypt_message,
    restore_private_key_backup, sign_detached_data, sign_message, verify_detached_signature,
    verify_message, DecryptedMessage, PrivateKeyBackup, Recipient, RestoredBackup,
    VerifiedMessage,
};
pub use parse::{parse_key, parse_keys, public_half};
pub use password_cache::{PassphraseUnlock, PasswordCache, UnlockKey, UnlockedKey};
pub use registry::{KeyringHandle, KeyringRegistry};
pub use sync::{ChangeLog, ChangeLogEntry, ChangeType, SyncController, SyncData};
pub use verify::SignatureInfo;
