//! Keys learned from `Autocrypt:` mail headers.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{select_key, KeySource};
use crate::error::{Error, Result};
use crate::storage::Storage;
use crate::types::{LookupQuery, LookupResult, LookupSource};

const AUTOCRYPT_PREFIX: &str = "autocrypt.";

/// The `prefer-encrypt` attribute of a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PreferEncrypt {
    Mutual,
    #[default]
    NoPreference,
}

/// Latest Autocrypt state of one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutocryptPeer {
    pub addr: String,
    pub prefer_encrypt: PreferEncrypt,
    /// Base64 of the binary key
    pub keydata: String,
    /// Date of the mail the header came from
    pub last_seen: DateTime<Utc>,
}

impl AutocryptPeer {
    /// Parse a header value, e.g. `addr=a@b.c; prefer-encrypt=mutual; keydata=...`.
    pub fn parse_header(value: &str, date: DateTime<Utc>) -> Result<Self> {
        let mut addr = None;
        let mut prefer_encrypt = PreferEncrypt::NoPreference;
        let mut keydata = None;

        for attribute in value.split(';') {
            let attribute = attribute.trim();
            if attribute.is_empty() {
                continue;
            }
            let (name, value) = attribute.split_once('=').ok_or_else(|| {
                Error::Parse(format!("malformed Autocrypt attribute: {}", attribute))
            })?;
            match name.trim() {
                "addr" => addr = Some(value.trim().to_lowercase()),
                "prefer-encrypt" => {
                    if value.trim() == "mutual" {
                        prefer_encrypt = PreferEncrypt::Mutual;
                    }
                }
                "keydata" => {
                    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
                    STANDARD
                        .decode(&compact)
                        .map_err(|e| Error::Parse(format!("Autocrypt keydata: {}", e)))?;
                    keydata = Some(compact);
                }
                // Non-critical attributes start with an underscore
                name if name.starts_with('_') => {}
                name => {
                    return Err(Error::Parse(format!(
                        "unknown critical Autocrypt attribute: {}",
                        name
                    )))
                }
            }
        }

        Ok(Self {
            addr: addr.ok_or_else(|| Error::Parse("Autocrypt header without addr".to_string()))?,
            prefer_encrypt,
            keydata: keydata
                .ok_or_else(|| Error::Parse("Autocrypt header without keydata".to_string()))?,
            last_seen: date,
        })
    }

    /// Decoded binary key.
    pub fn key_bytes(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(&self.keydata)
            .map_err(|e| Error::Parse(e.to_string()))
    }
}

/// Persistent cache of Autocrypt peers.
pub struct AutocryptStore {
    storage: Arc<dyn Storage>,
}

impl AutocryptStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Process the `Autocrypt:` header of a received mail.
    ///
    /// The header is ignored unless its `addr` is the sender. A header
    /// older than the stored one for the same address is ignored too.
    /// Returns whether the stored state changed.
    pub async fn process_header(&self, header: &str, from: &str, date: DateTime<Utc>) -> Result<bool> {
        let peer = AutocryptPeer::parse_header(header, date)?;
        if peer.addr != from.trim().to_lowercase() {
            debug!(addr = %peer.addr, "Autocrypt header does not match sender");
            return Ok(false);
        }
        if let Some(existing) = self.get(&peer.addr).await? {
            if existing.last_seen > peer.last_seen {
                return Ok(false);
            }
        }
        self.storage
            .set(&storage_key(&peer.addr), serde_json::to_value(&peer)?)
            .await?;
        debug!(addr = %peer.addr, "Autocrypt peer updated");
        Ok(true)
    }

    /// Stored state of `addr`.
    pub async fn get(&self, addr: &str) -> Result<Option<AutocryptPeer>> {
        match self.storage.get(&storage_key(addr)).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Forget `addr`.
    pub async fn remove(&self, addr: &str) -> Result<()> {
        self.storage.remove(&storage_key(addr)).await
    }
}

fn storage_key(addr: &str) -> String {
    format!("{}{}", AUTOCRYPT_PREFIX, addr.trim().to_lowercase())
}

/// Key source over an [`AutocryptStore`]; answers email queries only.
pub struct AutocryptSource {
    store: Arc<AutocryptStore>,
}

impl AutocryptSource {
    pub fn new(store: Arc<AutocryptStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl KeySource for AutocryptSource {
    fn source(&self) -> LookupSource {
        LookupSource::Autocrypt
    }

    async fn lookup(&self, query: &LookupQuery) -> Result<Option<LookupResult>> {
        let Some(email) = query.email() else {
            return Ok(None);
        };
        match self.store.get(email).await? {
            Some(peer) => select_key(&peer.key_bytes()?, query, self.source()),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use chrono::TimeZone;

    fn date(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_header() {
        let peer = AutocryptPeer::parse_header(
            "addr=Alice@Example.org; prefer-encrypt=mutual; keydata=AAEC\n AwQ=",
            date(1),
        )
        .unwrap();
        assert_eq!(peer.addr, "alice@example.org");
        assert_eq!(peer.prefer_encrypt, PreferEncrypt::Mutual);
        assert_eq!(peer.key_bytes().unwrap(), vec![0, 1, 2, 3, 4]);

        let ignored = AutocryptPeer::parse_header("addr=a@b.c; _extra=1; keydata=AAEC", date(1)).unwrap();
        assert_eq!(ignored.prefer_encrypt, PreferEncrypt::NoPreference);
    }

    #[test]
    fn test_parse_header_rejects() {
        assert!(AutocryptPeer::parse_header("keydata=AAEC", date(1)).is_err());
        assert!(AutocryptPeer::parse_header("addr=a@b.c", date(1)).is_err());
        assert!(AutocryptPeer::parse_header("addr=a@b.c; keydata=!!", date(1)).is_err());
        assert!(AutocryptPeer::parse_header("addr=a@b.c; critical=1; keydata=AAEC", date(1)).is_err());
    }

    #[tokio::test]
    async fn test_newer_header_replaces_older() {
        let store = AutocryptStore::new(Arc::new(MemoryStorage::new()));
        assert!(store.process_header("addr=a@b.c; keydata=AAEC", "A@B.C", date(2)).await.unwrap());
        assert!(!store.process_header("addr=a@b.c; keydata=AAAA", "a@b.c", date(1)).await.unwrap());
        assert!(store.process_header("addr=a@b.c; keydata=AAAA", "a@b.c", date(3)).await.unwrap());
        assert_eq!(store.get("a@b.c").await.unwrap().unwrap().keydata, "AAAA");

        // Header for another address than the sender
        assert!(!store.process_header("addr=x@b.c; keydata=AAEC", "a@b.c", date(4)).await.unwrap());
        assert!(store.get("x@b.c").await.unwrap().is_none());
    }
}
