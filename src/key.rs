//! Key generation.
//!
//! This module generates new OpenPGP key pairs with an encryption subkey.

use chrono::Utc;
use pgp::composed::{EncryptionCaps, SecretKeyParamsBuilder, SubkeyParamsBuilder};
use rand::thread_rng;

use crate::error::{Error, Result};
use crate::internal::{fingerprint_to_hex, public_key_to_armored, secret_key_to_armored};
use crate::types::{GenerateKeyParams, GeneratedKey};

/// Generate a new OpenPGP key pair.
///
/// The primary key certifies and signs; one subkey encrypts.
///
/// # Arguments
/// * `params` - User ids, passphrase, cipher suite and expiration
///
/// # Returns
/// The generated key with both halves armored.
///
/// # Example
/// ```ignore
/// let key = create_key(&GenerateKeyParams::new("Alice <alice@example.com>", "password"))?;
/// println!("Fingerprint: {}", key.fingerprint);
/// ```
pub fn create_key(params: &GenerateKeyParams) -> Result<GeneratedKey> {
    if params.user_ids.is_empty() {
        return Err(Error::InvalidInput(
            "At least one user ID is required".to_string(),
        ));
    }

    let mut rng = thread_rng();

    let expiration = params.expiration.map(|exp| {
        let duration = exp.signed_duration_since(Utc::now());
        pgp::types::Duration::from_secs(duration.num_seconds().max(0) as u32)
    });

    let mut enc_builder = SubkeyParamsBuilder::default();
    enc_builder
        .key_type(params.cipher.encryption_key_type())
        .can_encrypt(EncryptionCaps::All)
        .can_sign(false)
        .can_authenticate(false);
    if let Some(exp) = expiration {
        enc_builder.expiration(Some(exp));
    }
    if !params.passphrase.is_empty() {
        enc_builder.passphrase(Some(params.passphrase.clone()));
    }
    let encryption_subkey = enc_builder
        .build()
        .map_err(|e| Error::Crypto(e.to_string()))?;

    let mut key_params = SecretKeyParamsBuilder::default();
    key_params
        .key_type(params.cipher.primary_key_type())
        .can_certify(true)
        .can_sign(true)
        .can_encrypt(EncryptionCaps::None)
        .primary_user_id(params.user_ids[0].clone());

    if params.user_ids.len() > 1 {
        key_params.user_ids(params.user_ids[1..].to_vec());
    }
    if let Some(exp) = expiration {
        key_params.expiration(Some(exp));
    }
    if !params.passphrase.is_empty() {
        key_params.passphrase(Some(params.passphrase.clone()));
    }
    key_params.subkeys(vec![encryption_subkey]);

    let secret_key = key_params
        .build()
        .map_err(|e| Error::Crypto(e.to_string()))?
        .generate(&mut rng)
        .map_err(|e| Error::Crypto(e.to_string()))?;

    let public_key = secret_key.to_public_key();

    Ok(GeneratedKey {
        public_key: public_key_to_armored(&public_key)?,
        private_key: secret_key_to_armored(&secret_key)?,
        fingerprint: fingerprint_to_hex(&public_key.primary_key),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_key_requires_user_id() {
        let mut params = GenerateKeyParams::new("Alice <alice@example.com>", "pw");
        params.user_ids.clear();
        assert!(matches!(create_key(&params), Err(Error::InvalidInput(_))));
    }
}
