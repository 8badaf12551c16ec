//! Decryption functions.
//!
//! This module decrypts OpenPGP messages with an unlocked private key or
//! with a password (backups).

use std::io::Cursor;

use pgp::composed::{Deserializable, Message, SignedPublicKey};
use pgp::types::Password;

use crate::error::{Error, Result};
use crate::password_cache::UnlockedKey;
use crate::verify::{verify_message_content, SignatureInfo};

fn parse_message(ciphertext: &[u8]) -> Result<Message<'_>> {
    match Message::from_armor(Cursor::new(ciphertext)) {
        Ok((msg, _headers)) => Ok(msg),
        Err(_) => Message::from_bytes(ciphertext).map_err(|e| Error::Parse(e.to_string())),
    }
}

/// Decrypt bytes using an unlocked secret key.
///
/// # Arguments
/// * `key` - The recipient's unlocked private key
/// * `ciphertext` - The encrypted data (armored or binary)
/// * `verification_keys` - Keys to check embedded signatures against
///
/// # Returns
/// The decrypted plaintext and the verification result of any signature.
pub(crate) fn decrypt_with_key(
    key: &UnlockedKey,
    ciphertext: &[u8],
    verification_keys: &[SignedPublicKey],
) -> Result<(Vec<u8>, Vec<SignatureInfo>)> {
    let password = key.password();
    let message = parse_message(ciphertext)?;

    // Try standard decrypt first, then legacy mode
    let decrypted = match message.decrypt(&password, key.secret_key()) {
        Ok(msg) => msg,
        Err(_) => parse_message(ciphertext)?
            .decrypt_legacy(&password, key.secret_key())
            .map_err(|e| Error::Crypto(e.to_string()))?,
    };

    verify_message_content(decrypted, verification_keys)
}

/// Decrypt a password-encrypted message.
///
/// A password that does not decrypt the session key is reported as
/// [`Error::WrongBackupCode`].
pub(crate) fn decrypt_with_password(ciphertext: &[u8], password: &str) -> Result<Vec<u8>> {
    let message = parse_message(ciphertext)?;
    let password = Password::from(password);

    let decrypted = message
        .decrypt_with_password(&password)
        .map_err(|_| Error::WrongBackupCode)?;

    let mut decompressed = if decrypted.is_compressed() {
        decrypted
            .decompress()
            .map_err(|e| Error::Crypto(e.to_string()))?
    } else {
        decrypted
    };

    decompressed
        .as_data_vec()
        .map_err(|_| Error::WrongBackupCode)
}
