//! Web Key Directory lookup.
//!
//! WKD publishes keys under a well-known path of the address's domain,
//! named by the z-base32 encoded SHA-1 of the lower-cased local part.

use async_trait::async_trait;
use reqwest::StatusCode;
use sha1::{Digest, Sha1};
use tracing::debug;

use super::{select_key, KeySource};
use crate::error::{Error, Result};
use crate::types::{LookupQuery, LookupResult, LookupSource};

/// Key source querying the WKD of the address's domain.
pub struct WkdSource {
    client: reqwest::Client,
}

impl WkdSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KeySource for WkdSource {
    fn source(&self) -> LookupSource {
        LookupSource::Wkd
    }

    async fn lookup(&self, query: &LookupQuery) -> Result<Option<LookupResult>> {
        let Some(email) = query.email() else {
            return Ok(None);
        };

        self.fetch_first(&wkd_urls(email)?, query).await
    }
}

impl WkdSource {
    /// Try `urls` in order. A 404 is a definitive "no key" and clears
    /// errors of earlier URLs.
    async fn fetch_first(&self, urls: &[String], query: &LookupQuery) -> Result<Option<LookupResult>> {
        let mut last_error = None;
        for url in urls {
            match self.client.get(url).send().await {
                Ok(response) if response.status().is_success() => {
                    let body = response.bytes().await?;
                    // Binary keys come back armored; only keys for this address count
                    return select_key(&body, query, self.source());
                }
                Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                    debug!(url = %url, "no key in WKD");
                    last_error = None;
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

/// Advanced and direct method URLs for `email`, in that order.
pub fn wkd_urls(email: &str) -> Result<Vec<String>> {
    let (local, domain) = parse_email(email)?;
    let hash = zbase32_encode(&Sha1::digest(local.to_lowercase().as_bytes()));
    let local = url::form_urlencoded::byte_serialize(local.as_bytes()).collect::<String>();

    Ok(vec![
        format!(
            "https://openpgpkey.{domain}/.well-known/openpgpkey/{domain}/hu/{hash}?l={local}"
        ),
        format!("https://{domain}/.well-known/openpgpkey/hu/{hash}?l={local}"),
    ])
}

/// Split an address into local part and lower-cased domain.
fn parse_email(email: &str) -> Result<(String, String)> {
    match email.trim().rsplit_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => {
            Ok((local.to_string(), domain.to_lowercase()))
        }
        _ => Err(Error::InvalidInput(format!("Invalid email address: {}", email))),
    }
}

/// Z-base32 encoding (used by WKD).
fn zbase32_encode(data: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ybndrfg8ejkmcpqxot1uwisza345h769";

    let mut result = String::new();
    let mut buffer: u64 = 0;
    let mut bits_in_buffer = 0;

    for &byte in data {
        buffer = (buffer << 8) | byte as u64;
        bits_in_buffer += 8;

        while bits_in_buffer >= 5 {
            bits_in_buffer -= 5;
            let index = ((buffer >> bits_in_buffer) & 0x1f) as usize;
            result.push(ALPHABET[index] as char);
        }
    }

    if bits_in_buffer > 0 {
        let index = ((buffer << (5 - bits_in_buffer)) & 0x1f) as usize;
        result.push(ALPHABET[index] as char);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_email() {
        let (local, domain) = parse_email("Joe.Doe@Example.ORG").unwrap();
        assert_eq!(local, "Joe.Doe");
        assert_eq!(domain, "example.org");

        assert!(parse_email("invalid").is_err());
        assert!(parse_email("@example.org").is_err());
    }

    #[test]
    fn test_wkd_urls() {
        let urls = wkd_urls("Joe.Doe@Example.ORG").unwrap();
        assert_eq!(
            urls,
            vec![
                "https://openpgpkey.example.org/.well-known/openpgpkey/example.org/hu/iy9q119eutrkn8s1mk4r39qejnbu3n5q?l=Joe.Doe",
                "https://example.org/.well-known/openpgpkey/hu/iy9q119eutrkn8s1mk4r39qejnbu3n5q?l=Joe.Doe",
            ]
        );
    }

    #[tokio::test]
    async fn test_unreachable_then_not_found_is_no_key() {
        use axum::http::StatusCode as AxumStatus;
        use axum::routing::get;

        let router = axum::Router::new().route("/hu", get(|| async { AxumStatus::NOT_FOUND }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

        let source = WkdSource::new(reqwest::Client::new());
        let query = LookupQuery::Email("joe@example.org".to_string());
        // Port 9 is discard; nothing answers HTTP there
        let urls = vec![
            "http://127.0.0.1:9/hu".to_string(),
            format!("http://{}/hu", addr),
        ];
        assert!(source.fetch_first(&urls, &query).await.unwrap().is_none());

        let unreachable = vec!["http://127.0.0.1:9/hu".to_string()];
        assert!(source.fetch_first(&unreachable, &query).await.is_err());
    }

    #[test]
    fn test_zbase32_length() {
        // 160 bit digests encode to 32 characters
        assert_eq!(zbase32_encode(&[0u8; 20]), "y".repeat(32));
    }
}
