//! Time-boxed cache of unlocked private keys.
//!
//! An [`UnlockedKey`] pairs a parsed secret key with the passphrase that
//! opens it. The passphrase is held in [`Zeroizing`] memory and wiped when
//! the last handle to the key is dropped, which happens on eviction or
//! timeout once no operation still uses it.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use pgp::composed::SignedSecretKey;
use pgp::types::Password;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;
use zeroize::Zeroizing;

use crate::config::PasswordCacheConfig;
use crate::error::{Error, Result};
use crate::internal::{fingerprint_to_hex, parse_secret_key};
use crate::sign::check_password;
use crate::types::{KeyEntry, KeyKind};

/// A private key together with the passphrase that unlocks it.
pub struct UnlockedKey {
    secret_key: SignedSecretKey,
    fingerprint: String,
    passphrase: Zeroizing<String>,
}

impl UnlockedKey {
    pub(crate) fn new(secret_key: SignedSecretKey, passphrase: &str) -> Self {
        let fingerprint = fingerprint_to_hex(&secret_key.primary_key);
        Self {
            secret_key,
            fingerprint,
            passphrase: Zeroizing::new(passphrase.to_string()),
        }
    }

    /// Fingerprint of the primary key.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub(crate) fn secret_key(&self) -> &SignedSecretKey {
        &self.secret_key
    }

    pub(crate) fn password(&self) -> Password {
        Password::from(self.passphrase.as_str())
    }

    pub(crate) fn passphrase(&self) -> &str {
        &self.passphrase
    }
}

impl fmt::Debug for UnlockedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnlockedKey")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

/// The unlock primitive: check a passphrase against a private key.
pub trait KeyUnlocker: Send + Sync {
    /// Unlock `key`, or fail with [`Error::WrongPassword`].
    fn unlock(&self, key: &KeyEntry, passphrase: &str) -> Result<UnlockedKey>;
}

/// Unlocks keys with rpgp.
#[derive(Debug, Default, Clone, Copy)]
pub struct PgpUnlocker;

impl KeyUnlocker for PgpUnlocker {
    fn unlock(&self, key: &KeyEntry, passphrase: &str) -> Result<UnlockedKey> {
        let secret_key = parse_secret_key(key.armored.as_bytes())?;
        check_password(&secret_key, passphrase)?;
        Ok(UnlockedKey::new(secret_key, passphrase))
    }
}

/// Caller-supplied way of obtaining an unlocked private key.
///
/// Crypto operations and sync never see passphrases; they ask this
/// callback for the unlocked form of the key they need.
#[async_trait]
pub trait UnlockKey: Send + Sync {
    /// Unlocked form of the private key `key`.
    async fn unlock_key(&self, key: &KeyEntry) -> Result<Arc<UnlockedKey>>;
}

/// [`UnlockKey`] that unlocks through a [`PasswordCache`] with a known passphrase.
pub struct PassphraseUnlock {
    cache: Arc<PasswordCache>,
    passphrase: Zeroizing<String>,
}

impl PassphraseUnlock {
    pub fn new(cache: Arc<PasswordCache>, passphrase: impl Into<String>) -> Self {
        Self {
            cache,
            passphrase: Zeroizing::new(passphrase.into()),
        }
    }
}

#[async_trait]
impl UnlockKey for PassphraseUnlock {
    async fn unlock_key(&self, key: &KeyEntry) -> Result<Arc<UnlockedKey>> {
        self.cache.unlock(key, &self.passphrase).await
    }
}

struct CacheEntry {
    key: Arc<UnlockedKey>,
    expires_at: Instant,
    generation: u64,
    timer: JoinHandle<()>,
}

type Entries = Mutex<HashMap<String, CacheEntry>>;

/// In-memory cache of unlocked keys, keyed by fingerprint.
///
/// Each entry lives for the configured timeout from the moment it was
/// unlocked. Reads never extend it; only [`PasswordCache::evict`] ends it
/// early.
pub struct PasswordCache {
    config: PasswordCacheConfig,
    unlocker: Arc<dyn KeyUnlocker>,
    entries: Arc<Entries>,
    generation: AtomicU64,
}

impl PasswordCache {
    /// Cache using the rpgp unlock primitive.
    pub fn new(config: PasswordCacheConfig) -> Self {
        Self::with_unlocker(config, Arc::new(PgpUnlocker))
    }

    /// Cache using a custom unlock primitive.
    pub fn with_unlocker(config: PasswordCacheConfig, unlocker: Arc<dyn KeyUnlocker>) -> Self {
        Self {
            config,
            unlocker,
            entries: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Unlock a private key.
    ///
    /// A key cached under the same fingerprint is returned as is, without
    /// checking `passphrase` again.
    ///
    /// # Errors
    /// [`Error::WrongPassword`] when `passphrase` does not unlock the key.
    pub async fn unlock(&self, key: &KeyEntry, passphrase: &str) -> Result<Arc<UnlockedKey>> {
        if key.kind != KeyKind::Private {
            return Err(Error::InvalidInput(format!(
                "{} is not a private key",
                key.fingerprint
            )));
        }

        if let Some(cached) = self.get(&key.fingerprint).await {
            debug!(fingerprint = %key.fingerprint, "password cache hit");
            return Ok(cached);
        }

        let unlocker = self.unlocker.clone();
        let entry = key.clone();
        let passphrase = Zeroizing::new(passphrase.to_string());
        let unlocked = tokio::task::spawn_blocking(move || unlocker.unlock(&entry, &passphrase))
            .await
            .map_err(|e| Error::Crypto(e.to_string()))??;
        let unlocked = Arc::new(unlocked);

        if self.config.enabled {
            self.insert(&key.fingerprint, unlocked.clone()).await;
        }
        Ok(unlocked)
    }

    /// The cached unlocked key for `fingerprint`, if it has not expired.
    pub async fn get(&self, fingerprint: &str) -> Option<Arc<UnlockedKey>> {
        let entries = self.entries.lock().await;
        entries
            .get(fingerprint)
            .filter(|e| Instant::now() < e.expires_at)
            .map(|e| e.key.clone())
    }

    /// Whether an unexpired entry exists for `fingerprint`.
    pub async fn is_cached(&self, fingerprint: &str) -> bool {
        self.get(fingerprint).await.is_some()
    }

    /// Drop the cached key for `fingerprint`.
    pub async fn evict(&self, fingerprint: &str) -> bool {
        let removed = self.entries.lock().await.remove(fingerprint);
        match removed {
            Some(entry) => {
                entry.timer.abort();
                debug!(fingerprint = %fingerprint, "evicted unlocked key");
                true
            }
            None => false,
        }
    }

    /// Drop every cached key.
    pub async fn clear(&self) {
        let mut entries = self.entries.lock().await;
        for (_, entry) in entries.drain() {
            entry.timer.abort();
        }
    }

    async fn insert(&self, fingerprint: &str, key: Arc<UnlockedKey>) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let timeout = self.config.timeout;
        let timer = tokio::spawn(expire(
            Arc::downgrade(&self.entries),
            fingerprint.to_string(),
            generation,
            timeout,
        ));

        let entry = CacheEntry {
            key,
            expires_at: Instant::now() + timeout,
            generation,
            timer,
        };
        if let Some(previous) = self
            .entries
            .lock()
            .await
            .insert(fingerprint.to_string(), entry)
        {
            previous.timer.abort();
        }
    }
}

impl Drop for PasswordCache {
    fn drop(&mut self) {
        if let Ok(mut entries) = self.entries.try_lock() {
            for (_, entry) in entries.drain() {
                entry.timer.abort();
            }
        }
    }
}

async fn expire(entries: Weak<Entries>, fingerprint: String, generation: u64, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    let Some(entries) = entries.upgrade() else {
        return;
    };
    let mut entries = entries.lock().await;
    // A later unlock of the same key owns the slot now
    if entries.get(&fingerprint).map(|e| e.generation) == Some(generation) {
        entries.remove(&fingerprint);
        debug!(fingerprint = %fingerprint, "unlocked key expired");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::create_key;
    use crate::parse::parse_key;
    use crate::types::GenerateKeyParams;
    use std::sync::atomic::AtomicUsize;

    struct CountingUnlocker {
        calls: AtomicUsize,
    }

    impl KeyUnlocker for CountingUnlocker {
        fn unlock(&self, key: &KeyEntry, passphrase: &str) -> Result<UnlockedKey> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            PgpUnlocker.unlock(key, passphrase)
        }
    }

    fn private_entry(passphrase: &str) -> KeyEntry {
        let key = create_key(&GenerateKeyParams::new("Cache <cache@example.com>", passphrase)).unwrap();
        parse_key(&key.private_key, KeyKind::Private).unwrap()
    }

    fn cache(timeout: Duration, enabled: bool) -> (PasswordCache, Arc<CountingUnlocker>) {
        let unlocker = Arc::new(CountingUnlocker {
            calls: AtomicUsize::new(0),
        });
        let config = PasswordCacheConfig { enabled, timeout };
        (PasswordCache::with_unlocker(config, unlocker.clone()), unlocker)
    }

    #[tokio::test]
    async fn test_hit_returns_same_key_until_timeout() {
        let entry = private_entry("secret");
        let (cache, unlocker) = cache(Duration::from_secs(60), true);

        let first = cache.unlock(&entry, "secret").await.unwrap();
        let second = cache.unlock(&entry, "secret").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(unlocker.calls.load(Ordering::SeqCst), 1);

        tokio::time::pause();
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!cache.is_cached(&entry.fingerprint).await);
        tokio::time::resume();

        let third = cache.unlock(&entry, "secret").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(unlocker.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_wrong_password_is_not_cached() {
        let entry = private_entry("secret");
        let (cache, _) = cache(Duration::from_secs(60), true);

        let result = cache.unlock(&entry, "wrong").await;
        assert!(matches!(result, Err(Error::WrongPassword)));
        assert!(!cache.is_cached(&entry.fingerprint).await);
    }

    #[tokio::test]
    async fn test_evict_and_disabled_cache() {
        let entry = private_entry("secret");
        let (cache, unlocker) = cache(Duration::from_secs(60), true);
        cache.unlock(&entry, "secret").await.unwrap();
        assert!(cache.evict(&entry.fingerprint).await);
        assert!(!cache.evict(&entry.fingerprint).await);
        cache.unlock(&entry, "secret").await.unwrap();
        assert_eq!(unlocker.calls.load(Ordering::SeqCst), 2);

        let (disabled, unlocker) = cache(Duration::from_secs(60), false);
        disabled.unlock(&entry, "secret").await.unwrap();
        disabled.unlock(&entry, "secret").await.unwrap();
        assert_eq!(unlocker.calls.load(Ordering::SeqCst), 2);
        assert!(!disabled.is_cached(&entry.fingerprint).await);
    }

    #[tokio::test]
    async fn test_public_key_is_rejected() {
        let mut entry = private_entry("secret");
        entry.kind = KeyKind::Public;
        let (cache, _) = cache(Duration::from_secs(60), true);
        assert!(matches!(
            cache.unlock(&entry, "secret").await,
            Err(Error::InvalidInput(_))
        ));
    }
}
