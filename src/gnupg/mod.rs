//! GnuPG agent boundary.
//!
//! The GnuPG-backed keyring never sees key material itself: parsing,
//! storage and private-key operations happen in an external agent process
//! reached over native messaging. [`GpgAgent`] is that boundary;
//! [`NativeMessagingAgent`] is the production implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

mod native;

pub use native::{read_frame, write_frame, NativeMessagingAgent, MAX_FRAME_LEN};

/// Keys exported by the agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmoredKeys {
    /// Armored public keys of the whole GnuPG keyring
    pub armored: String,
    /// Fingerprints of keys with secret material in the agent
    #[serde(default)]
    pub secret_fingerprints: Vec<String>,
}

/// Key reference inside an import result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentKey {
    /// Primary key fingerprint
    pub fingerprint: String,
}

/// Per-key entry of an agent import result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentImportedKey {
    /// The key the status refers to
    pub key: AgentKey,
    /// `newkey`, `change`, `nochange`, or an error description
    pub status: String,
}

/// Counters of an agent import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    /// Keys found in the input
    pub considered: u32,
    /// Keys imported (new or changed)
    pub imported: u32,
    /// Keys already present and unchanged
    #[serde(default)]
    pub unchanged: u32,
}

/// Result of an agent import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentImportResult {
    /// Per-key results
    #[serde(rename = "Keys", default)]
    pub keys: Vec<AgentImportedKey>,
    /// Counters
    pub summary: ImportSummary,
}

impl AgentImportResult {
    /// The agent could not parse the input at all.
    pub fn is_aborted(&self) -> bool {
        self.summary.considered == 0 && self.summary.imported == 0
    }
}

/// Encryption request handled by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEncryptRequest {
    /// Plaintext
    pub data: String,
    /// Recipient fingerprints
    pub keys: Vec<String>,
    /// Fingerprints of keys to sign with
    #[serde(default)]
    pub signing_keys: Vec<String>,
    /// Produce ASCII armor
    pub armor: bool,
}

/// One signature reported by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSignature {
    /// Signer fingerprint
    pub fingerprint: String,
    /// Signature creation time (seconds since epoch)
    pub timestamp: i64,
    /// Validity as reported by GnuPG (e.g. `full`, `unknown`)
    #[serde(default)]
    pub validity: Option<String>,
    /// Error detail for bad signatures
    #[serde(default)]
    pub error: Option<String>,
}

/// Signature verification detail of an agent decryption.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSignatures {
    /// Signatures that verified
    #[serde(default)]
    pub good: Vec<AgentSignature>,
    /// Signatures that did not verify
    #[serde(default)]
    pub bad: Vec<AgentSignature>,
}

/// Result of an agent decryption.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDecryptResult {
    /// Plaintext
    pub data: String,
    /// Verification detail
    #[serde(default)]
    pub signatures: AgentSignatures,
}

/// Operations the external GnuPG agent offers.
#[async_trait]
pub trait GpgAgent: Send + Sync {
    /// Export all public keys and name the ones with secret material.
    async fn get_keys_armored(&self) -> Result<ArmoredKeys>;

    /// Fingerprint of GnuPG's default signing key.
    async fn get_default_key(&self) -> Result<Option<String>>;

    /// Import armored keys.
    async fn import_keys(&self, armored: &str) -> Result<AgentImportResult>;

    /// Encrypt (and optionally sign) data.
    async fn encrypt(&self, request: AgentEncryptRequest) -> Result<String>;

    /// Decrypt data and verify embedded signatures.
    async fn decrypt(&self, armored: &str) -> Result<AgentDecryptResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_result_wire_format() {
        let json = r#"{
            "Keys": [{"key": {"fingerprint": "AB"}, "status": "newkey"}],
            "summary": {"considered": 1, "imported": 1}
        }"#;
        let result: AgentImportResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.keys[0].key.fingerprint, "AB");
        assert_eq!(result.summary.unchanged, 0);
        assert!(!result.is_aborted());

        let aborted: AgentImportResult =
            serde_json::from_str(r#"{"summary": {"considered": 0, "imported": 0}}"#).unwrap();
        assert!(aborted.is_aborted());
    }
}
