//! Encrypt, decrypt, sign and verify against a keyring.
//!
//! These functions hold no state of their own. Private keys are obtained
//! through an [`UnlockKey`] callback, so passphrases never pass through
//! here. Recipients unknown to the keyring can be resolved through a
//! [`KeyRegistry`]; keys found that way are used for the one call and not
//! stored.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::decrypt::{decrypt_with_key, decrypt_with_password};
use crate::encrypt::{bytes_encrypted_for, encrypt_literal, encrypt_with_password};
use crate::error::{Error, Result};
use crate::gnupg::{AgentEncryptRequest, GpgAgent};
use crate::internal::normalize_fingerprint;
use crate::keyring::Keyring;
use crate::keystore::Backend;
use crate::lookup::KeyRegistry;
use crate::parse::{parse_key, public_half};
use crate::password_cache::UnlockKey;
use crate::sign::{check_password, sign_cleartext, sign_detached};
use crate::types::{KeyEntry, KeyKind, LookupQuery};
use crate::verify::{
    candidate_keys, verify_cleartext, verify_detached, verify_inline, SignatureInfo,
};

const BACKUP_CODE_LEN: usize = 26;
const BACKUP_CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Recipient of an encrypted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    Email(String),
    Fingerprint(String),
}

/// Plaintext of a decrypted message with its signature checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedMessage {
    pub data: Vec<u8>,
    pub signatures: Vec<SignatureInfo>,
}

impl DecryptedMessage {
    /// Plaintext as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Signed text with its signature checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedMessage {
    pub data: Vec<u8>,
    pub signatures: Vec<SignatureInfo>,
}

/// An encrypted private key backup and the code that opens it.
#[derive(Debug, Clone)]
pub struct PrivateKeyBackup {
    /// Armored, password-encrypted message
    pub message: String,
    /// 26 characters from `A-Z0-9`
    pub backup_code: String,
}

/// Content of a restored backup.
#[derive(Debug)]
pub struct RestoredBackup {
    pub key: KeyEntry,
    pub password: Zeroizing<String>,
}

#[derive(Serialize, Deserialize)]
struct BackupPayload {
    key: String,
    password: String,
}

/// Encrypt a text message.
///
/// With `signer` set the message is also signed with the keyring's
/// default key. On the GnuPG keyring the agent does the work and every
/// recipient must be known to it.
pub async fn encrypt_message(
    keyring: &Keyring,
    plaintext: &str,
    recipients: &[Recipient],
    signer: Option<&dyn UnlockKey>,
    lookup: Option<&KeyRegistry>,
) -> Result<String> {
    if let Some(agent) = gnupg_agent(keyring) {
        let keys = recipients
            .iter()
            .map(|r| agent_recipient(keyring, r))
            .collect::<Result<Vec<_>>>()?;
        let signing_keys = match signer {
            Some(_) => vec![keyring.get_default_key().await?.fingerprint],
            None => Vec::new(),
        };
        return agent
            .encrypt(AgentEncryptRequest {
                data: plaintext.to_string(),
                keys,
                signing_keys,
                armor: true,
            })
            .await;
    }

    let certs = resolve_recipients(keyring, recipients, lookup).await?;
    let signing_key = match signer {
        Some(unlock) => Some(unlock.unlock_key(&keyring.get_default_key().await?).await?),
        None => None,
    };
    let cert_refs: Vec<&[u8]> = certs.iter().map(|c| c.as_bytes()).collect();
    let encrypted = encrypt_literal(
        &cert_refs,
        "",
        plaintext.as_bytes(),
        signing_key.as_deref(),
        true,
    )?;
    debug!(recipients = certs.len(), signed = signing_key.is_some(), "message encrypted");
    String::from_utf8(encrypted).map_err(|e| Error::Crypto(e.to_string()))
}

/// Encrypt a file to binary OpenPGP.
pub async fn encrypt_file(
    keyring: &Keyring,
    filename: &str,
    data: &[u8],
    recipients: &[Recipient],
    lookup: Option<&KeyRegistry>,
) -> Result<Vec<u8>> {
    if keyring.backend() == Backend::GnuPg {
        return Err(Error::Unsupported(
            "file encryption is not available on the GnuPG keyring".to_string(),
        ));
    }
    let certs = resolve_recipients(keyring, recipients, lookup).await?;
    let cert_refs: Vec<&[u8]> = certs.iter().map(|c| c.as_bytes()).collect();
    encrypt_literal(&cert_refs, filename, data, None, false)
}

/// Decrypt a message with a private key of the keyring.
///
/// Embedded signatures are checked against all keys of the keyring.
pub async fn decrypt_message(
    keyring: &Keyring,
    armored: &str,
    unlock: &dyn UnlockKey,
) -> Result<DecryptedMessage> {
    if let Some(agent) = gnupg_agent(keyring) {
        let result = agent.decrypt(armored).await?;
        let good = result.signatures.good.iter().map(|s| SignatureInfo {
            fingerprint: Some(normalize_fingerprint(&s.fingerprint)),
            valid: true,
        });
        let bad = result.signatures.bad.iter().map(|s| SignatureInfo {
            fingerprint: Some(normalize_fingerprint(&s.fingerprint)),
            valid: false,
        });
        return Ok(DecryptedMessage {
            data: result.data.into_bytes(),
            signatures: good.chain(bad).collect(),
        });
    }
    decrypt_local(keyring, armored.as_bytes(), unlock).await
}

/// Decrypt an encrypted file (armored or binary).
pub async fn decrypt_file(
    keyring: &Keyring,
    data: &[u8],
    unlock: &dyn UnlockKey,
) -> Result<DecryptedMessage> {
    if keyring.backend() == Backend::GnuPg {
        return Err(Error::Unsupported(
            "file decryption is not available on the GnuPG keyring".to_string(),
        ));
    }
    decrypt_local(keyring, data, unlock).await
}

async fn decrypt_local(
    keyring: &Keyring,
    ciphertext: &[u8],
    unlock: &dyn UnlockKey,
) -> Result<DecryptedMessage> {
    let key_ids = bytes_encrypted_for(ciphertext)?;
    let private_key = keyring
        .get_private_keys()
        .into_iter()
        .find(|k| key_ids.iter().any(|id| k.has_key_id(id)))
        .cloned()
        .ok_or_else(|| Error::KeyNotFound(format!("no private key for {}", key_ids.join(", "))))?;

    let unlocked = unlock.unlock_key(&private_key).await?;
    let verification_keys = candidate_keys(keyring.get_keys());
    let (data, signatures) = decrypt_with_key(&unlocked, ciphertext, &verification_keys)?;
    debug!(fingerprint = %private_key.fingerprint, "message decrypted");
    Ok(DecryptedMessage { data, signatures })
}

/// Sign text with the keyring's default key (cleartext signature).
pub async fn sign_message(keyring: &Keyring, text: &str, unlock: &dyn UnlockKey) -> Result<String> {
    let key = signing_key(keyring).await?;
    let unlocked = unlock.unlock_key(&key).await?;
    sign_cleartext(&unlocked, text)
}

/// Create an armored detached signature with the keyring's default key.
pub async fn sign_detached_data(keyring: &Keyring, data: &[u8], unlock: &dyn UnlockKey) -> Result<String> {
    let key = signing_key(keyring).await?;
    let unlocked = unlock.unlock_key(&key).await?;
    sign_detached(&unlocked, data)
}

/// Verify a cleartext or inline signed message against the keyring.
pub fn verify_message(keyring: &Keyring, signed: &str) -> Result<VerifiedMessage> {
    let keys = candidate_keys(keyring.get_keys());
    let (data, signatures) = if signed.trim_start().starts_with("-----BEGIN PGP SIGNED MESSAGE") {
        let (text, signatures) = verify_cleartext(signed, &keys)?;
        (text.into_bytes(), signatures)
    } else {
        verify_inline(signed.as_bytes(), &keys)?
    };
    Ok(VerifiedMessage { data, signatures })
}

/// Verify a detached signature over `data` against the keyring.
pub fn verify_detached_signature(
    keyring: &Keyring,
    data: &[u8],
    signature: &str,
) -> Result<Vec<SignatureInfo>> {
    verify_detached(data, signature.as_bytes(), &candidate_keys(keyring.get_keys()))
}

/// Back up the default private key and its passphrase.
///
/// The backup is encrypted with a random backup code, which is returned
/// alongside and must be kept by the user.
pub async fn create_private_key_backup(keyring: &Keyring, unlock: &dyn UnlockKey) -> Result<PrivateKeyBackup> {
    let key = signing_key(keyring).await?;
    let unlocked = unlock.unlock_key(&key).await?;

    let payload = BackupPayload {
        key: key.armored.clone(),
        password: unlocked.passphrase().to_string(),
    };
    let json = Zeroizing::new(serde_json::to_vec(&payload)?);
    drop(Zeroizing::new(payload.password));

    let backup_code = generate_backup_code();
    let message = encrypt_with_password(&json, &backup_code)?;
    info!(fingerprint = %key.fingerprint, "private key backup created");
    Ok(PrivateKeyBackup { message, backup_code })
}

/// Open a backup made by [`create_private_key_backup`].
///
/// # Errors
/// [`Error::WrongBackupCode`] when `backup_code` does not open the message.
pub fn restore_private_key_backup(message: &str, backup_code: &str) -> Result<RestoredBackup> {
    let code = backup_code.trim().to_uppercase();
    if code.len() != BACKUP_CODE_LEN || !code.bytes().all(|b| BACKUP_CODE_CHARSET.contains(&b)) {
        return Err(Error::WrongBackupCode);
    }

    let json = Zeroizing::new(decrypt_with_password(message.as_bytes(), &code)?);
    let payload: BackupPayload =
        serde_json::from_slice(&json).map_err(|e| Error::Parse(format!("backup content: {}", e)))?;
    let password = Zeroizing::new(payload.password);

    let key = parse_key(&payload.key, KeyKind::Private)?;
    let secret_key = crate::internal::parse_secret_key(key.armored.as_bytes())?;
    check_password(&secret_key, &password)?;
    Ok(RestoredBackup { key, password })
}

/// Random backup code of 26 characters from `A-Z0-9`.
pub fn generate_backup_code() -> String {
    let mut rng = rand::thread_rng();
    (0..BACKUP_CODE_LEN)
        .map(|_| BACKUP_CODE_CHARSET[rng.gen_range(0..BACKUP_CODE_CHARSET.len())] as char)
        .collect()
}

async fn signing_key(keyring: &Keyring) -> Result<KeyEntry> {
    if keyring.backend() == Backend::GnuPg {
        return Err(Error::Unsupported(
            "private keys of the GnuPG keyring stay with the agent".to_string(),
        ));
    }
    keyring.get_default_key().await
}

fn gnupg_agent(keyring: &Keyring) -> Option<std::sync::Arc<dyn GpgAgent>> {
    match keyring.backend() {
        Backend::GnuPg => keyring.store().agent(),
        Backend::Local => None,
    }
}

fn agent_recipient(keyring: &Keyring, recipient: &Recipient) -> Result<String> {
    let found = match recipient {
        Recipient::Fingerprint(fpr) => keyring.get_key_by_fingerprint(fpr, None).cloned(),
        Recipient::Email(email) => keyring
            .get_key_by_address(&[email.as_str()])
            .remove(email.as_str())
            .flatten()
            .and_then(|keys| keys.into_iter().find(|k| k.valid)),
    };
    found
        .map(|k| k.fingerprint)
        .ok_or_else(|| Error::KeyNotFound(recipient_label(recipient)))
}

/// Armored public keys for `recipients`, from the keyring or the lookup.
async fn resolve_recipients(
    keyring: &Keyring,
    recipients: &[Recipient],
    lookup: Option<&KeyRegistry>,
) -> Result<Vec<String>> {
    if recipients.is_empty() {
        return Err(Error::InvalidInput("No recipients specified".to_string()));
    }

    let mut certs = Vec::with_capacity(recipients.len());
    for recipient in recipients {
        let local = match recipient {
            Recipient::Fingerprint(fpr) => keyring
                .get_key_by_fingerprint(fpr, None)
                .filter(|k| k.valid)
                .cloned(),
            Recipient::Email(email) => keyring
                .get_key_by_address(&[email.as_str()])
                .remove(email.as_str())
                .flatten()
                .and_then(|keys| keys.into_iter().find(|k| k.valid)),
        };
        if let Some(entry) = local {
            certs.push(public_half(&entry)?.armored);
            continue;
        }

        let query = match recipient {
            Recipient::Fingerprint(fpr) => LookupQuery::Fingerprint(fpr.clone()),
            Recipient::Email(email) => LookupQuery::Email(email.clone()),
        };
        match lookup {
            Some(registry) => match registry.lookup(&query).await {
                Some(found) => {
                    debug!(source = %found.source, fingerprint = %found.fingerprint, "recipient key discovered");
                    certs.push(found.armored);
                }
                None => return Err(Error::KeyNotFound(recipient_label(recipient))),
            },
            None => return Err(Error::KeyNotFound(recipient_label(recipient))),
        }
    }
    Ok(certs)
}

fn recipient_label(recipient: &Recipient) -> String {
    match recipient {
        Recipient::Email(email) => email.clone(),
        Recipient::Fingerprint(fpr) => normalize_fingerprint(fpr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_code_format() {
        let code = generate_backup_code();
        assert_eq!(code.len(), 26);
        assert!(code.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()));
        assert_ne!(code, generate_backup_code());
    }

    #[test]
    fn test_malformed_backup_code_rejected() {
        assert!(matches!(
            restore_private_key_backup("irrelevant", "short"),
            Err(Error::WrongBackupCode)
        ));
    }
}
