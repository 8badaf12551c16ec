//! Key validation functions.
//!
//! rpgp has no policy layer, so expiration and revocation are checked
//! manually against the binding signatures.

use std::time::SystemTime;

use pgp::composed::{SignedPublicKey, SignedPublicSubKey};
use pgp::packet::SignatureType;
use pgp::types::KeyDetails;

/// Check if a key has expired based on its creation time and validity period.
pub(crate) fn is_key_expired(creation_time: SystemTime, validity_seconds: Option<u64>) -> bool {
    match validity_seconds {
        Some(0) | None => false,
        Some(validity) => {
            let expiration = creation_time + std::time::Duration::from_secs(validity);
            expiration < SystemTime::now()
        }
    }
}

/// Check if a subkey is revoked.
pub(crate) fn is_subkey_revoked(subkey: &SignedPublicSubKey) -> bool {
    subkey
        .signatures
        .iter()
        .any(|sig| sig.typ() == Some(SignatureType::SubkeyRevocation))
}

/// Check if a subkey is valid for use (not expired, not revoked).
pub(crate) fn is_subkey_valid(subkey: &SignedPublicSubKey, allow_expired: bool) -> bool {
    if is_subkey_revoked(subkey) {
        return false;
    }

    if !allow_expired {
        // Expiration comes from the most recent binding signature
        if let Some(sig) = subkey.signatures.last() {
            if let Some(validity) = sig.key_expiration_time() {
                let creation_time: SystemTime = subkey.key.created_at().into();
                if is_key_expired(creation_time, Some(validity.as_secs() as u64)) {
                    return false;
                }
            }
        }
    }

    true
}

/// Check if the primary key carries a revocation signature.
pub(crate) fn is_primary_revoked(key: &SignedPublicKey) -> bool {
    key.details
        .revocation_signatures
        .iter()
        .any(|sig| sig.typ() == Some(SignatureType::KeyRevocation))
}

/// Get the expiration time for a key (from first user binding signature).
pub(crate) fn get_key_expiration(key: &SignedPublicKey) -> Option<SystemTime> {
    for user in &key.details.users {
        for sig in &user.signatures {
            if let Some(validity) = sig.key_expiration_time() {
                if validity.as_secs() == 0 {
                    continue;
                }
                let creation_time: SystemTime = key.primary_key.created_at().into();
                return Some(creation_time + validity.into());
            }
        }
    }
    None
}

/// A primary key is usable when it is neither revoked nor expired.
pub(crate) fn is_primary_valid(key: &SignedPublicKey) -> bool {
    if is_primary_revoked(key) {
        return false;
    }
    match get_key_expiration(key) {
        Some(expiration) => expiration > SystemTime::now(),
        None => true,
    }
}
