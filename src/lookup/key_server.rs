//! Client for the Mailvelope key server API.
//!
//! - `GET /api/v1/key?email=|keyId=|fingerprint=` answers 200 with
//!   `{"publicKeyArmored": ...}` or 404
//! - `POST /api/v1/key` with `{"publicKeyArmored", "primaryEmail"}` answers 201
//!   (any 2xx is accepted)
//! - `DELETE /api/v1/key?email=|keyId=` answers 2xx when the request was accepted

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use super::{select_key, KeySource};
use crate::error::{Error, Result};
use crate::internal::normalize_fingerprint;
use crate::keyring::KeyUploader;
use crate::types::{LookupQuery, LookupResult, LookupSource};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyRecord {
    public_key_armored: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    primary_email: Option<String>,
}

/// HTTP client for one Mailvelope-compatible key server.
#[derive(Debug, Clone)]
pub struct KeyServerClient {
    endpoint: Url,
    client: reqwest::Client,
}

impl KeyServerClient {
    /// Client for the server at `base_url`.
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_client(base_url, reqwest::Client::new())
    }

    /// Client sharing an existing HTTP client.
    ///
    /// A path prefix on `base_url` is kept: `https://host/mks` serves
    /// `https://host/mks/api/v1/key`.
    pub fn with_client(base_url: &str, client: reqwest::Client) -> Result<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| Error::InvalidInput(format!("key server URL {}: {}", base_url, e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base
            .join("api/v1/key")
            .map_err(|e| Error::InvalidInput(e.to_string()))?;
        Ok(Self { endpoint, client })
    }

    /// Fetch the armored key for `query`, `None` on 404.
    pub async fn get(&self, query: &LookupQuery) -> Result<Option<String>> {
        let response = self.client.get(self.query_url(query)).send().await?;
        match response.status() {
            StatusCode::OK => {
                let record: KeyRecord = response.json().await?;
                Ok(Some(record.public_key_armored))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(Error::Network(format!("key server answered {}", status))),
        }
    }

    /// Publish an armored public key.
    ///
    /// # Errors
    /// [`Error::Upload`] with the status when the server answers non-2xx.
    pub async fn upload(&self, armored: &str, primary_email: Option<&str>) -> Result<()> {
        let record = KeyRecord {
            public_key_armored: armored.to_string(),
            primary_email: primary_email.map(str::to_string),
        };
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&record)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Upload(response.status().as_u16()));
        }
        info!("key uploaded to key server");
        Ok(())
    }

    /// Request removal of the key for `query` (email or key id).
    pub async fn remove(&self, query: &LookupQuery) -> Result<()> {
        if matches!(query, LookupQuery::Fingerprint(_)) {
            return Err(Error::InvalidInput(
                "key removal takes an email or key id".to_string(),
            ));
        }
        let response = self.client.delete(self.query_url(query)).send().await?;
        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "key removal answered {}",
                response.status()
            )));
        }
        debug!("key removal requested");
        Ok(())
    }

    fn query_url(&self, query: &LookupQuery) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut pairs = url.query_pairs_mut();
            match query {
                LookupQuery::Email(email) => pairs.append_pair("email", email.trim()),
                LookupQuery::KeyId(id) => pairs.append_pair("keyId", &normalize_fingerprint(id)),
                LookupQuery::Fingerprint(fpr) => {
                    pairs.append_pair("fingerprint", &normalize_fingerprint(fpr))
                }
            };
        }
        url
    }
}

#[async_trait]
impl KeyUploader for KeyServerClient {
    async fn upload(&self, armored: &str, primary_email: Option<&str>) -> Result<()> {
        KeyServerClient::upload(self, armored, primary_email).await
    }
}

/// Key source over the Mailvelope key server.
pub struct KeyServerSource {
    client: KeyServerClient,
}

impl KeyServerSource {
    pub fn new(client: KeyServerClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KeySource for KeyServerSource {
    fn source(&self) -> LookupSource {
        LookupSource::Mks
    }

    async fn lookup(&self, query: &LookupQuery) -> Result<Option<LookupResult>> {
        match self.client.get(query).await? {
            Some(armored) => select_key(armored.as_bytes(), query, self.source()),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_urls() {
        let client = KeyServerClient::new("https://keys.mailvelope.com").unwrap();
        assert_eq!(
            client
                .query_url(&LookupQuery::Email("test@mailvelope.com".to_string()))
                .as_str(),
            "https://keys.mailvelope.com/api/v1/key?email=test%40mailvelope.com"
        );
        assert_eq!(
            client
                .query_url(&LookupQuery::KeyId("0xabcdef0123456789".to_string()))
                .as_str(),
            "https://keys.mailvelope.com/api/v1/key?keyId=ABCDEF0123456789"
        );
    }

    #[test]
    fn test_base_path_is_kept() {
        for base in ["https://example.org/mks", "https://example.org/mks/"] {
            let client = KeyServerClient::new(base).unwrap();
            assert_eq!(client.endpoint.as_str(), "https://example.org/mks/api/v1/key");
        }
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            KeyServerClient::new("not a url"),
            Err(Error::InvalidInput(_))
        ));
    }
}
