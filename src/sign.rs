//! Signing functions.
//!
//! All signing goes through an [`UnlockedKey`]; passphrases never reach
//! this module directly.

use std::io::Cursor;

use pgp::composed::{CleartextSignedMessage, DetachedSignature, SignedSecretKey};
use pgp::crypto::hash::HashAlgorithm;
use pgp::types::{EcdsaPublicParams, KeyDetails, Password, PublicParams};
use rand::thread_rng;

use crate::error::{Error, Result};
use crate::password_cache::UnlockedKey;

/// Select appropriate hash algorithm based on key type.
/// ECDSA keys require hash algorithms that match or exceed their security level.
pub(crate) fn select_hash_for_key(secret_key: &SignedSecretKey) -> HashAlgorithm {
    match secret_key.primary_key.public_params() {
        PublicParams::ECDSA(EcdsaPublicParams::P384 { .. }) => HashAlgorithm::Sha384,
        PublicParams::ECDSA(EcdsaPublicParams::P521 { .. }) => HashAlgorithm::Sha512,
        _ => HashAlgorithm::Sha256,
    }
}

/// Sign text with a cleartext signature.
///
/// # Returns
/// The armored cleartext signed message.
pub(crate) fn sign_cleartext(key: &UnlockedKey, text: &str) -> Result<String> {
    let mut rng = thread_rng();
    let password = key.password();

    let msg = CleartextSignedMessage::sign(&mut rng, text, &key.secret_key().primary_key, &password)
        .map_err(|e| Error::Crypto(e.to_string()))?;

    msg.to_armored_string(None.into())
        .map_err(|e| Error::Crypto(e.to_string()))
}

/// Create an armored detached signature for bytes.
pub(crate) fn sign_detached(key: &UnlockedKey, data: &[u8]) -> Result<String> {
    let signature = detached_signature(key.secret_key(), &key.password(), data)?;
    signature
        .to_armored_string(None.into())
        .map_err(|e| Error::Crypto(e.to_string()))
}

/// Check that `password` unlocks `secret_key`.
///
/// rpgp only unlocks secret material inside an operation, so the check
/// signs a short probe and discards the signature.
pub(crate) fn check_password(secret_key: &SignedSecretKey, password: &str) -> Result<()> {
    detached_signature(secret_key, &Password::from(password), b"unlock probe")
        .map(|_| ())
        .map_err(|_| Error::WrongPassword)
}

fn detached_signature(
    secret_key: &SignedSecretKey,
    password: &Password,
    data: &[u8],
) -> Result<DetachedSignature> {
    let mut rng = thread_rng();
    DetachedSignature::sign_binary_data(
        &mut rng,
        &secret_key.primary_key,
        password,
        select_hash_for_key(secret_key),
        Cursor::new(data),
    )
    .map_err(|e| Error::Crypto(e.to_string()))
}
