//! Encryption functions.
//!
//! This module encrypts data to one or more OpenPGP recipients, optionally
//! signing it in the same pass, and encrypts backups with a password.

use std::io::{BufReader, Cursor, Read};

use pgp::armor::Dearmor;
use pgp::composed::{MessageBuilder, SignedPublicKey, SignedPublicSubKey};
use pgp::crypto::sym::SymmetricKeyAlgorithm;
use pgp::packet::{Packet, PacketParser, PublicKeyEncryptedSessionKey};
use pgp::types::{KeyDetails, Password, StringToKey};
use rand::thread_rng;

use crate::error::{Error, Result};
use crate::internal::{is_subkey_valid, parse_public_key};
use crate::password_cache::UnlockedKey;
use crate::sign::select_hash_for_key;

/// Encrypt bytes to multiple recipients.
///
/// # Arguments
/// * `recipient_certs` - Recipient public keys (armored or binary)
/// * `plaintext` - The data to encrypt
/// * `signer` - Unlocked private key to sign with, if any
/// * `armor` - If true, output ASCII-armored; otherwise binary
///
/// # Returns
/// The encrypted message that can be decrypted by any of the recipients.
pub(crate) fn encrypt_bytes_to_multiple(
    recipient_certs: &[&[u8]],
    plaintext: &[u8],
    signer: Option<&UnlockedKey>,
    armor: bool,
) -> Result<Vec<u8>> {
    encrypt_literal(recipient_certs, "", plaintext, signer, armor)
}

/// Encrypt bytes as a literal data packet carrying `filename`.
pub(crate) fn encrypt_literal(
    recipient_certs: &[&[u8]],
    filename: &str,
    plaintext: &[u8],
    signer: Option<&UnlockedKey>,
    armor: bool,
) -> Result<Vec<u8>> {
    if recipient_certs.is_empty() {
        return Err(Error::InvalidInput("No recipients specified".to_string()));
    }

    let mut rng = thread_rng();

    let mut encryption_keys = Vec::new();
    for cert_data in recipient_certs {
        let public_key = parse_public_key(cert_data)?;
        encryption_keys.extend(find_valid_encryption_subkeys(&public_key)?);
    }

    let mut builder = MessageBuilder::from_bytes(filename.to_string(), plaintext.to_vec())
        .seipd_v1(&mut rng, SymmetricKeyAlgorithm::AES256);

    for key in &encryption_keys {
        builder
            .encrypt_to_key(&mut rng, key)
            .map_err(|e| Error::Crypto(e.to_string()))?;
    }

    if let Some(signer) = signer {
        let hash_alg = select_hash_for_key(signer.secret_key());
        builder.sign(&signer.secret_key().primary_key, signer.password(), hash_alg);
    }

    if armor {
        let armored = builder
            .to_armored_string(&mut rng, None.into())
            .map_err(|e| Error::Crypto(e.to_string()))?;
        Ok(armored.into_bytes())
    } else {
        builder
            .to_vec(&mut rng)
            .map_err(|e| Error::Crypto(e.to_string()))
    }
}

/// Encrypt bytes symmetrically with a password.
///
/// Used for private key backups; the result is always armored.
pub(crate) fn encrypt_with_password(plaintext: &[u8], password: &str) -> Result<String> {
    let mut rng = thread_rng();
    let password = Password::from(password);

    let mut builder = MessageBuilder::from_bytes("", plaintext.to_vec())
        .seipd_v1(&mut rng, SymmetricKeyAlgorithm::AES256);
    builder
        .encrypt_with_password(StringToKey::new_default(&mut rng), &password)
        .map_err(|e| Error::Crypto(e.to_string()))?;

    builder
        .to_armored_string(&mut rng, None.into())
        .map_err(|e| Error::Crypto(e.to_string()))
}

/// Get the key IDs that a message was encrypted for.
///
/// # Arguments
/// * `ciphertext` - The encrypted message (armored or binary)
///
/// # Returns
/// A list of upper-case key IDs that can decrypt this message.
pub fn bytes_encrypted_for(ciphertext: &[u8]) -> Result<Vec<String>> {
    let mut key_ids = Vec::new();

    let data = if ciphertext.starts_with(b"-----BEGIN PGP") {
        let dearmor = Dearmor::new(Cursor::new(ciphertext));
        let mut buf = Vec::new();
        BufReader::new(dearmor).read_to_end(&mut buf)?;
        buf
    } else {
        ciphertext.to_vec()
    };

    let parser = PacketParser::new(Cursor::new(&data));

    for packet_result in parser {
        match packet_result {
            Ok(Packet::PublicKeyEncryptedSessionKey(pkesk)) => {
                let key_id = match pkesk {
                    PublicKeyEncryptedSessionKey::V3 { id, .. } => format!("{}", id).to_uppercase(),
                    PublicKeyEncryptedSessionKey::V6 {
                        fingerprint: Some(fp),
                        ..
                    } => format!("{}", fp).to_uppercase(),
                    // Anonymous recipient or unknown version
                    _ => continue,
                };
                key_ids.push(key_id);
            }
            Ok(_) => {}
            // Stop on parsing error (we've probably hit encrypted data)
            Err(_) => break,
        }
    }

    Ok(key_ids)
}

/// Helper to find valid encryption subkeys from a public key.
fn find_valid_encryption_subkeys(key: &SignedPublicKey) -> Result<Vec<SignedPublicSubKey>> {
    let valid_keys: Vec<_> = key
        .public_subkeys
        .iter()
        .filter(|subkey| subkey.key.algorithm().can_encrypt())
        .filter(|subkey| {
            subkey.signatures.iter().any(|sig| {
                let flags = sig.key_flags();
                flags.encrypt_comms() || flags.encrypt_storage()
            })
        })
        .filter(|subkey| is_subkey_valid(subkey, false))
        .cloned()
        .collect();

    if valid_keys.is_empty() {
        return Err(Error::NoEncryptionSubkey);
    }

    Ok(valid_keys)
}
