//! Verification functions.
//!
//! Signatures are checked against a set of candidate keys (usually the
//! whole keyring); the result names the key that produced a valid
//! signature.

use std::io::Cursor;

use pgp::composed::{
    CleartextSignedMessage, Deserializable, DetachedSignature, Message, SignedPublicKey,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::internal::{fingerprint_to_hex, parse_public_key};
use crate::types::KeyEntry;

/// Verification result for one signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureInfo {
    /// Fingerprint of the key that made the signature, if it is known
    pub fingerprint: Option<String>,
    /// Whether the signature verified
    pub valid: bool,
}

impl SignatureInfo {
    fn unknown() -> Self {
        Self {
            fingerprint: None,
            valid: false,
        }
    }
}

/// Parse candidate keys, skipping the ones that do not parse.
pub(crate) fn candidate_keys(keys: &[KeyEntry]) -> Vec<SignedPublicKey> {
    keys.iter()
        .filter_map(|k| parse_public_key(k.armored.as_bytes()).ok())
        .collect()
}

/// Verify a cleartext signed message and extract its text.
pub(crate) fn verify_cleartext(
    signed_message: &str,
    keys: &[SignedPublicKey],
) -> Result<(String, Vec<SignatureInfo>)> {
    let (msg, _) = CleartextSignedMessage::from_string(signed_message)
        .map_err(|e| Error::Parse(e.to_string()))?;

    let text = normalize_line_endings(&msg.signed_text());
    let info = first_match(keys, |key| {
        msg.verify(&key.primary_key).is_ok()
            || key.public_subkeys.iter().any(|s| msg.verify(&s.key).is_ok())
    });

    Ok((text, vec![info]))
}

/// Verify an inline signed message and extract its content.
pub(crate) fn verify_inline(
    signed_message: &[u8],
    keys: &[SignedPublicKey],
) -> Result<(Vec<u8>, Vec<SignatureInfo>)> {
    let message = match Message::from_armor(Cursor::new(signed_message)) {
        Ok((msg, _headers)) => msg,
        Err(_) => Message::from_bytes(signed_message).map_err(|e| Error::Parse(e.to_string()))?,
    };
    verify_message_content(message, keys)
}

/// Read a (decrypted) message and check its signatures.
pub(crate) fn verify_message_content(
    mut message: Message<'_>,
    keys: &[SignedPublicKey],
) -> Result<(Vec<u8>, Vec<SignatureInfo>)> {
    if message.is_compressed() {
        message = message
            .decompress()
            .map_err(|e| Error::Parse(e.to_string()))?;
    }

    let signed = message.is_signed();

    // Content must be read before the signature can be checked
    let content = message
        .as_data_vec()
        .map_err(|e| Error::Parse(e.to_string()))?;

    if !signed {
        return Ok((content, Vec::new()));
    }

    let info = first_match(keys, |key| {
        message.verify(&key.primary_key).is_ok()
            || key
                .public_subkeys
                .iter()
                .any(|s| message.verify(&s.key).is_ok())
    });

    Ok((content, vec![info]))
}

/// Verify a detached signature on bytes.
pub(crate) fn verify_detached(
    data: &[u8],
    signature: &[u8],
    keys: &[SignedPublicKey],
) -> Result<Vec<SignatureInfo>> {
    let sig = match DetachedSignature::from_armor_single(Cursor::new(signature)) {
        Ok((result, _headers)) => result,
        Err(_) => DetachedSignature::from_bytes(Cursor::new(signature))
            .map_err(|e| Error::Parse(e.to_string()))?,
    };

    let info = first_match(keys, |key| {
        sig.verify(&key.primary_key, data).is_ok()
            || key
                .public_subkeys
                .iter()
                .any(|s| sig.verify(&s.key, data).is_ok())
    });

    Ok(vec![info])
}

fn first_match<F>(keys: &[SignedPublicKey], verifies: F) -> SignatureInfo
where
    F: Fn(&SignedPublicKey) -> bool,
{
    keys.iter()
        .find(|key| verifies(key))
        .map(|key| SignatureInfo {
            fingerprint: Some(fingerprint_to_hex(&key.primary_key)),
            valid: true,
        })
        .unwrap_or_else(SignatureInfo::unknown)
}

/// Normalize CRLF line endings to LF.
fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n")
}
