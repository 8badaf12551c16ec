//! Discovery of public keys from external sources.
//!
//! A [`KeyRegistry`] asks an ordered list of [`KeySource`]s and returns the
//! first key found, tagged with the source it came from. Default order:
//!
//! 1. Autocrypt headers cached locally (no network)
//! 2. Web Key Directory of the address's domain
//! 3. Mailvelope key server
//! 4. Other VKS key servers
//!
//! A failing source counts as "no result"; the registry logs it and moves
//! on, so one unreachable server never blocks the others.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::Result;
use crate::internal::{normalize_fingerprint, parse_public_keys};
use crate::parse::public_entry;
use crate::types::{LookupQuery, LookupResult, LookupSource};

mod autocrypt;
#[cfg(feature = "network")]
mod key_server;
#[cfg(feature = "network")]
mod vks;
#[cfg(feature = "network")]
mod wkd;

pub use autocrypt::{AutocryptPeer, AutocryptSource, AutocryptStore, PreferEncrypt};
#[cfg(feature = "network")]
pub use key_server::{KeyServerClient, KeyServerSource};
#[cfg(feature = "network")]
pub use vks::VksSource;
#[cfg(feature = "network")]
pub use wkd::{wkd_urls, WkdSource};

/// One key discovery strategy.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Tag attached to keys found by this source.
    fn source(&self) -> LookupSource;

    /// Look up a key. `Ok(None)` means the source has no key for `query`.
    async fn lookup(&self, query: &LookupQuery) -> Result<Option<LookupResult>>;
}

/// Ordered, failure-isolating set of key sources.
#[derive(Default)]
pub struct KeyRegistry {
    sources: Vec<Box<dyn KeySource>>,
}

impl KeyRegistry {
    /// Registry querying `sources` in order.
    pub fn new(sources: Vec<Box<dyn KeySource>>) -> Self {
        Self { sources }
    }

    /// Build the enabled sources of `config` in the default order.
    #[cfg(feature = "network")]
    pub fn from_config(
        config: &crate::config::LookupConfig,
        autocrypt: Option<std::sync::Arc<AutocryptStore>>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        let mut sources: Vec<Box<dyn KeySource>> = Vec::new();
        if config.autocrypt {
            if let Some(store) = autocrypt {
                sources.push(Box::new(AutocryptSource::new(store)));
            }
        }
        if config.wkd {
            sources.push(Box::new(WkdSource::new(client.clone())));
        }
        if config.mks {
            let mks = KeyServerClient::with_client(&config.mks_url, client.clone())?;
            sources.push(Box::new(KeyServerSource::new(mks)));
        }
        if config.oks && !config.oks_urls.is_empty() {
            sources.push(Box::new(VksSource::with_client(&config.oks_urls, client)?));
        }
        Ok(Self::new(sources))
    }

    /// Append a source after the existing ones.
    pub fn with_source(mut self, source: Box<dyn KeySource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Sources in query order.
    pub fn sources(&self) -> Vec<LookupSource> {
        self.sources.iter().map(|s| s.source()).collect()
    }

    /// First key any source finds for `query`.
    pub async fn lookup(&self, query: &LookupQuery) -> Option<LookupResult> {
        for source in &self.sources {
            match source.lookup(query).await {
                Ok(Some(result)) => {
                    debug!(source = %result.source, fingerprint = %result.fingerprint, "key found");
                    return Some(result);
                }
                Ok(None) => {}
                Err(e) => warn!(source = %source.source(), error = %e, "key lookup failed"),
            }
        }
        None
    }

    /// First key any source finds for `email`.
    pub async fn lookup_email(&self, email: &str) -> Option<LookupResult> {
        self.lookup(&LookupQuery::Email(email.to_string())).await
    }
}

/// Pick the first key in `data` that matches `query`.
///
/// `data` may be armored or binary and hold several keys; the result is
/// always armored. Email queries only accept keys with a matching user id.
pub(crate) fn select_key(
    data: &[u8],
    query: &LookupQuery,
    source: LookupSource,
) -> Result<Option<LookupResult>> {
    for key in parse_public_keys(data)? {
        let entry = match key.and_then(|k| public_entry(&k)) {
            Ok(entry) => entry,
            Err(e) => {
                debug!(%source, error = %e, "skipping unreadable key");
                continue;
            }
        };
        let matches = match query {
            LookupQuery::Email(email) => {
                let email = email.trim().to_lowercase();
                entry.emails().any(|e| e == email)
            }
            LookupQuery::Fingerprint(fpr) => entry.fingerprint == normalize_fingerprint(fpr),
            LookupQuery::KeyId(key_id) => entry.has_key_id(&normalize_fingerprint(key_id)),
        };
        if matches {
            return Ok(Some(LookupResult {
                fingerprint: entry.fingerprint,
                armored: entry.armored,
                source,
            }));
        }
    }
    Ok(None)
}
