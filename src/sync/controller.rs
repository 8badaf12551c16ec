//! One synchronization round between a keyring and its replicas.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{ChangeLog, ChangeType};
use crate::decrypt::decrypt_with_key;
use crate::encrypt::encrypt_bytes_to_multiple;
use crate::error::{Error, Result};
use crate::keyring::Keyring;
use crate::keystore::{Backend, KeyChange};
use crate::parse::{parse_key, public_half};
use crate::password_cache::UnlockKey;
use crate::types::KeyKind;

/// Time span covered by the entries of a sync message (Unix milliseconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: i64,
    pub end: i64,
}

/// Plaintext of a sync message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage {
    pub change_log: ChangeLog,
    /// Armored public keys of every key present on the sender
    pub keys: Vec<String>,
    pub window: TimeWindow,
}

impl SyncMessage {
    fn new(change_log: ChangeLog, keys: Vec<String>) -> Self {
        let now = Utc::now().timestamp_millis();
        let (start, end) = match change_log.time_span() {
            Some((min, max)) => (min, max.max(now)),
            None => (now, now),
        };
        Self {
            change_log,
            keys,
            window: TimeWindow { start, end },
        }
    }

    fn validate(&self) -> Result<()> {
        let TimeWindow { start, end } = self.window;
        let inside = self.change_log.entries().all(|e| (start..=end).contains(&e.time));
        if start > end || !inside {
            return Err(Error::Sync("change log outside of message window".to_string()));
        }
        Ok(())
    }
}

/// Encrypted sync message as held by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPayload {
    /// Version tag of the message
    pub etag: String,
    /// Armored, encrypted and signed [`SyncMessage`]
    pub message: String,
}

/// Moves encrypted sync messages to and from the other replicas.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Latest message, or `None` when there is none newer than `etag`.
    async fn download(&self, etag: Option<&str>) -> Result<Option<SyncPayload>>;

    /// Store a new message and return its version tag.
    async fn upload(&self, message: &str, etag: Option<&str>) -> Result<String>;
}

/// What a sync round did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// A remote message was merged
    pub downloaded: bool,
    /// A new message was uploaded
    pub uploaded: bool,
    /// Keys added or updated from the remote message
    pub imported: Vec<String>,
    /// Public keys removed because a replica deleted them
    pub removed: Vec<String>,
}

/// Runs sync rounds over a transport.
pub struct SyncController<T> {
    transport: T,
}

impl<T: SyncTransport> SyncController<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Reconcile `keyring` with the remote message.
    ///
    /// Messages are encrypted to and signed by the keyring's default key,
    /// which `unlock` must provide. Only public key material travels;
    /// private keys are never added or removed by a sync.
    pub async fn sync(&self, keyring: &mut Keyring, unlock: &dyn UnlockKey) -> Result<SyncReport> {
        if keyring.backend() != Backend::Local {
            return Err(Error::Unsupported("the GnuPG keyring cannot be synced".to_string()));
        }
        if !keyring.sync().is_active() {
            return Err(Error::Sync(format!("sync is not active for {}", keyring.id())));
        }

        let default_key = keyring.get_default_key().await?;
        let own_public = public_half(&default_key)?;
        let unlocked = unlock.unlock_key(&default_key).await?;
        let mut report = SyncReport::default();

        let etag = keyring.sync().etag().map(str::to_string);
        let remote = self.transport.download(etag.as_deref()).await?;
        let never_uploaded = remote.is_none() && etag.is_none();

        if let Some(payload) = remote {
            let verification_key = unlocked.secret_key().to_public_key();
            let (plaintext, signatures) = decrypt_with_key(
                &unlocked,
                payload.message.as_bytes(),
                std::slice::from_ref(&verification_key),
            )?;
            let signed_by_owner = signatures
                .iter()
                .any(|s| s.valid && s.fingerprint.as_deref() == Some(unlocked.fingerprint()));
            if !signed_by_owner {
                return Err(Error::Sync("sync message is not signed by the keyring key".to_string()));
            }

            let message: SyncMessage = serde_json::from_slice(&plaintext)?;
            message.validate()?;
            self.apply(keyring, &message, &mut report).await?;
            keyring.sync_mut().set_etag(Some(payload.etag));
            report.downloaded = true;
        }

        if keyring.sync().is_modified() || never_uploaded {
            let message = build_message(keyring)?;
            let json = serde_json::to_vec(&message)?;
            let encrypted = encrypt_bytes_to_multiple(
                &[own_public.armored.as_bytes()],
                &json,
                Some(&*unlocked),
                true,
            )?;
            let encrypted = String::from_utf8(encrypted).map_err(|e| Error::Crypto(e.to_string()))?;
            let current = keyring.sync().etag().map(str::to_string);
            let new_etag = self.transport.upload(&encrypted, current.as_deref()).await?;
            keyring.sync_mut().set_etag(Some(new_etag));
            keyring.sync_mut().set_modified(false);
            report.uploaded = true;
        }

        keyring.sync().save().await?;
        info!(
            keyring = %keyring.id(),
            imported = report.imported.len(),
            removed = report.removed.len(),
            uploaded = report.uploaded,
            "sync finished"
        );
        Ok(report)
    }

    async fn apply(&self, keyring: &mut Keyring, message: &SyncMessage, report: &mut SyncReport) -> Result<()> {
        keyring.sync_mut().merge(&message.change_log);
        let merged = keyring.sync().change_log().cloned().unwrap_or_default();

        for armored in &message.keys {
            let entry = match parse_key(armored, KeyKind::Public) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable key in sync message");
                    continue;
                }
            };
            let fingerprint = entry.fingerprint.clone();
            let latest = merged.get(&fingerprint);
            if latest.is_some_and(|e| e.change_type == ChangeType::Delete) {
                continue;
            }
            let present = keyring.get_key_by_fingerprint(&fingerprint, None).is_some();
            let remote_won = latest.is_some() && message.change_log.get(&fingerprint) == latest;
            if present && !remote_won {
                continue;
            }
            for added in keyring.import_synced(armored).await?.into_iter().flatten() {
                if added.change != KeyChange::Unchanged {
                    debug!(fingerprint = %added.entry.fingerprint, "key taken from replica");
                    report.imported.push(added.entry.fingerprint);
                }
            }
        }

        for fingerprint in keyring.sync().get_delete_entries() {
            if keyring.remove_synced(&fingerprint).await? {
                debug!(fingerprint = %fingerprint, "key deleted by replica");
                report.removed.push(fingerprint);
            }
        }
        Ok(())
    }
}

/// Message carrying the public half of every key in `keyring`.
fn build_message(keyring: &Keyring) -> Result<SyncMessage> {
    let change_log = keyring.sync().change_log().cloned().unwrap_or_default();
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for kind in [KeyKind::Public, KeyKind::Private] {
        for entry in keyring.get_keys().iter().filter(|k| k.kind == kind) {
            if seen.insert(entry.fingerprint.clone()) {
                keys.push(public_half(entry)?.armored);
            }
        }
    }
    Ok(SyncMessage::new(change_log, keys))
}
