//! Public type definitions for the mailkeys library.
//!
//! This module contains the data structures shared by the keystores,
//! keyrings, key discovery and the crypto operations.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a keyring instance.
pub type KeyringId = String;

/// Id of the keyring every installation has.
pub const MAIN_KEYRING_ID: &str = "localhost|#|mailvelope";

/// Id of the keyring backed by the local GnuPG installation.
pub const GNUPG_KEYRING_ID: &str = "localhost|#|gnupg";

/// Cipher suite options for key generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CipherSuite {
    /// RSA with 2048-bit keys
    Rsa2k,
    /// RSA with 4096-bit keys
    Rsa4k,
    /// Curve25519 legacy format (EdDSA for signing, ECDH for encryption)
    #[default]
    Cv25519,
    /// NIST P-256 curve (ECDSA for signing, ECDH for encryption)
    NistP256,
}

impl std::str::FromStr for CipherSuite {
    type Err = String;

    /// Parse cipher suite from string (case-insensitive).
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rsa2k" | "rsa2048" => Ok(CipherSuite::Rsa2k),
            "rsa4k" | "rsa4096" => Ok(CipherSuite::Rsa4k),
            "cv25519" | "curve25519" | "ed25519" => Ok(CipherSuite::Cv25519),
            "nistp256" | "p256" | "secp256r1" => Ok(CipherSuite::NistP256),
            _ => Err(format!("unknown cipher suite: {}", s)),
        }
    }
}

impl CipherSuite {
    /// Get the rpgp KeyType for the primary key (signing/certification).
    pub(crate) fn primary_key_type(&self) -> pgp::composed::KeyType {
        use pgp::composed::KeyType;
        use pgp::crypto::ecc_curve::ECCCurve;

        match self {
            CipherSuite::Rsa2k => KeyType::Rsa(2048),
            CipherSuite::Rsa4k => KeyType::Rsa(4096),
            CipherSuite::Cv25519 => KeyType::Ed25519Legacy,
            CipherSuite::NistP256 => KeyType::ECDSA(ECCCurve::P256),
        }
    }

    /// Get the rpgp KeyType for encryption subkeys.
    pub(crate) fn encryption_key_type(&self) -> pgp::composed::KeyType {
        use pgp::composed::KeyType;
        use pgp::crypto::ecc_curve::ECCCurve;

        match self {
            CipherSuite::Rsa2k => KeyType::Rsa(2048),
            CipherSuite::Rsa4k => KeyType::Rsa(4096),
            CipherSuite::Cv25519 => KeyType::ECDH(ECCCurve::Curve25519),
            CipherSuite::NistP256 => KeyType::ECDH(ECCCurve::P256),
        }
    }
}

/// Which half of a key pair an entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    /// Public key (certificate)
    Public,
    /// Private (secret) key
    Private,
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyKind::Public => write!(f, "public"),
            KeyKind::Private => write!(f, "private"),
        }
    }
}

/// A user identity bound to a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Raw user id string, e.g. `Alice <alice@example.com>`
    pub uid: String,
    /// Display name part of the user id
    pub name: String,
    /// Email address part of the user id, if present
    pub email: Option<String>,
    /// Whether the user id carries a binding self-signature
    pub valid: bool,
}

impl UserIdentity {
    /// Split a raw user id into name and email.
    pub fn from_uid(uid: &str, valid: bool) -> Self {
        let (name, email) = match (uid.rfind('<'), uid.rfind('>')) {
            (Some(start), Some(end)) if start < end => {
                let email = uid[start + 1..end].trim().to_string();
                let name = uid[..start].trim().to_string();
                (name, (!email.is_empty()).then_some(email))
            }
            _ if uid.contains('@') && !uid.contains(' ') => (String::new(), Some(uid.to_string())),
            _ => (uid.trim().to_string(), None),
        };
        Self {
            uid: uid.to_string(),
            name,
            email,
            valid,
        }
    }
}

/// A parsed key (one half of a key pair) held by a keyring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEntry {
    /// Primary key fingerprint (40 upper-case hex characters)
    pub fingerprint: String,
    /// Primary key id (16 upper-case hex characters)
    pub key_id: String,
    /// Public or private half
    pub kind: KeyKind,
    /// User identities on the key
    pub user_ids: Vec<UserIdentity>,
    /// When the primary key was created
    pub creation_time: DateTime<Utc>,
    /// When the key expires (None if never)
    pub expiration_time: Option<DateTime<Utc>>,
    /// Algorithm name of the primary key (e.g. "EdDSA", "RSA")
    pub algorithm: String,
    /// Primary key size in bits
    pub bit_length: usize,
    /// Key ids of all subkeys
    pub subkey_ids: Vec<String>,
    /// Not expired and not revoked
    pub valid: bool,
    /// Canonical ASCII armor of this half
    pub armored: String,
}

impl KeyEntry {
    /// Email addresses of all user ids, lower-cased.
    pub fn emails(&self) -> impl Iterator<Item = String> + '_ {
        self.user_ids
            .iter()
            .filter_map(|u| u.email.as_ref().map(|e| e.to_lowercase()))
    }

    /// The first user id, used as the display name of the key.
    pub fn primary_user_id(&self) -> Option<&UserIdentity> {
        self.user_ids.first()
    }

    /// Whether `key_id` names the primary key or one of the subkeys.
    pub fn has_key_id(&self, key_id: &str) -> bool {
        self.key_id.eq_ignore_ascii_case(key_id)
            || self.subkey_ids.iter().any(|k| k.eq_ignore_ascii_case(key_id))
    }
}

/// Summary of a key as shown in key lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyData {
    /// Primary key fingerprint
    pub fingerprint: String,
    /// Public or private half
    pub kind: KeyKind,
    /// Name of the primary user id
    pub name: String,
    /// Email of the primary user id
    pub email: Option<String>,
    /// Whether this is the keyring's default key
    pub is_default: bool,
    /// Not expired and not revoked
    pub valid: bool,
    /// Creation time of the primary key
    pub creation_time: DateTime<Utc>,
}

/// One item of an import batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRequest {
    /// Expected key kind
    pub kind: KeyKind,
    /// Armored key text (may hold several keys)
    pub armored: String,
}

impl ImportRequest {
    /// Import request for an armored public key.
    pub fn public(armored: impl Into<String>) -> Self {
        Self {
            kind: KeyKind::Public,
            armored: armored.into(),
        }
    }

    /// Import request for an armored private key.
    pub fn private(armored: impl Into<String>) -> Self {
        Self {
            kind: KeyKind::Private,
            armored: armored.into(),
        }
    }
}

/// Outcome class of one imported key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    /// Key was added or updated
    Success,
    /// Key was not changed (e.g. already exists)
    Warning,
    /// Key could not be imported
    Error,
}

/// Per-key result of an import batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportOutcome {
    /// Outcome class
    pub status: ImportStatus,
    /// Fingerprint of the key, when it could be determined
    pub fingerprint: Option<String>,
    /// Human-readable detail
    pub message: String,
}

/// Parameters for [`crate::Keyring::generate_key`].
#[derive(Debug, Clone)]
pub struct GenerateKeyParams {
    /// User ids, the first one becomes primary
    pub user_ids: Vec<String>,
    /// Passphrase protecting the new private key
    pub passphrase: String,
    /// Cipher suite
    pub cipher: CipherSuite,
    /// Optional primary key expiration
    pub expiration: Option<DateTime<Utc>>,
    /// Publish the public key on the Mailvelope key server
    pub upload_to_key_server: bool,
}

impl GenerateKeyParams {
    /// Parameters with defaults for everything but the identity.
    pub fn new(user_id: impl Into<String>, passphrase: impl Into<String>) -> Self {
        Self {
            user_ids: vec![user_id.into()],
            passphrase: passphrase.into(),
            cipher: CipherSuite::default(),
            expiration: None,
            upload_to_key_server: false,
        }
    }
}

/// Result of key generation.
#[derive(Debug)]
pub struct GeneratedKey {
    /// ASCII-armored public key
    pub public_key: String,
    /// ASCII-armored private key
    pub private_key: String,
    /// Key fingerprint as hex string
    pub fingerprint: String,
}

/// External source a looked-up key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LookupSource {
    /// Locally cached Autocrypt header
    #[serde(rename = "AC")]
    Autocrypt,
    /// Web Key Directory of the address's domain
    #[serde(rename = "WKD")]
    Wkd,
    /// Mailvelope key server
    #[serde(rename = "MKS")]
    Mks,
    /// Another public key server
    #[serde(rename = "OKS")]
    Oks,
}

impl fmt::Display for LookupSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupSource::Autocrypt => write!(f, "AC"),
            LookupSource::Wkd => write!(f, "WKD"),
            LookupSource::Mks => write!(f, "MKS"),
            LookupSource::Oks => write!(f, "OKS"),
        }
    }
}

/// What to look up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupQuery {
    /// Email address
    Email(String),
    /// Full fingerprint
    Fingerprint(String),
    /// 16-hex-character key id
    KeyId(String),
}

impl LookupQuery {
    /// The email of an email query.
    pub fn email(&self) -> Option<&str> {
        match self {
            LookupQuery::Email(email) => Some(email),
            _ => None,
        }
    }
}

/// A key found by an external source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupResult {
    /// ASCII-armored public key
    pub armored: String,
    /// Primary key fingerprint
    pub fingerprint: String,
    /// Where the key came from
    pub source: LookupSource,
}
