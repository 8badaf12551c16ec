//! Lookup on VKS key servers such as keys.openpgp.org.

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;
use url::Url;

use super::{select_key, KeySource};
use crate::error::{Error, Result};
use crate::internal::normalize_fingerprint;
use crate::types::{LookupQuery, LookupResult, LookupSource};

/// Key source asking a list of VKS servers in order.
pub struct VksSource {
    servers: Vec<Url>,
    client: reqwest::Client,
}

impl VksSource {
    pub fn new(servers: &[String]) -> Result<Self> {
        Self::with_client(servers, reqwest::Client::new())
    }

    pub fn with_client(servers: &[String], client: reqwest::Client) -> Result<Self> {
        let servers = servers
            .iter()
            .map(|s| {
                Url::parse(s).map_err(|e| Error::InvalidInput(format!("key server URL {}: {}", s, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { servers, client })
    }

    fn query_url(server: &Url, query: &LookupQuery) -> Result<Url> {
        let (kind, value) = match query {
            LookupQuery::Email(email) => ("by-email", email.trim().to_string()),
            LookupQuery::Fingerprint(fpr) => ("by-fingerprint", normalize_fingerprint(fpr)),
            LookupQuery::KeyId(id) => ("by-keyid", normalize_fingerprint(id)),
        };
        let mut url = server.clone();
        url.path_segments_mut()
            .map_err(|_| Error::InvalidInput(format!("{} cannot be a base URL", server)))?
            .pop_if_empty()
            .extend(["vks", "v1", kind, &value]);
        Ok(url)
    }
}

#[async_trait]
impl KeySource for VksSource {
    fn source(&self) -> LookupSource {
        LookupSource::Oks
    }

    async fn lookup(&self, query: &LookupQuery) -> Result<Option<LookupResult>> {
        let mut last_error = None;
        for server in &self.servers {
            let url = Self::query_url(server, query)?;
            match self.client.get(url.clone()).send().await {
                Ok(response) if response.status() == StatusCode::OK => {
                    let body = response.bytes().await?;
                    if let Some(result) = select_key(&body, query, self.source())? {
                        return Ok(Some(result));
                    }
                }
                Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                    debug!(url = %url, "no key on key server");
                }
                Ok(response) => last_error = Some(Error::Network(format!("{}: {}", url, response.status()))),
                Err(e) => last_error = Some(Error::from(e)),
            }
        }
        match last_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }
}
