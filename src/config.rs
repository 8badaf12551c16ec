//! Configuration for the keyring core.
//!
//! Loaded from TOML; every field has a default so an empty file is a
//! valid configuration. Durations use humantime notation (`"30m"`, `"10s"`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Passphrase caching
    pub password_cache: PasswordCacheConfig,

    /// External key discovery
    pub lookup: LookupConfig,

    /// GnuPG keyring
    pub gnupg: GnupgConfig,
}

/// Passphrase caching configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordCacheConfig {
    /// Keep unlocked keys in memory
    pub enabled: bool,

    /// How long an unlocked key stays cached
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

/// Key discovery configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    /// Use locally cached Autocrypt headers
    pub autocrypt: bool,

    /// Query the Web Key Directory of the address's domain
    pub wkd: bool,

    /// Query the Mailvelope key server
    pub mks: bool,

    /// Mailvelope key server base URL
    pub mks_url: String,

    /// Query other VKS key servers
    pub oks: bool,

    /// Base URLs of the other key servers, queried in order
    pub oks_urls: Vec<String>,

    /// Timeout of a single lookup request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

/// GnuPG keyring configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GnupgConfig {
    /// Path of the native messaging host, GnuPG support is off when unset
    pub native_host: Option<PathBuf>,

    /// Timeout of a single agent request
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for PasswordCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            autocrypt: true,
            wkd: true,
            mks: false,
            mks_url: "https://keys.mailvelope.com".to_string(),
            oks: false,
            oks_urls: vec!["https://keys.openpgp.org".to_string()],
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for GnupgConfig {
    fn default() -> Self {
        Self {
            native_host: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Check values that parse but cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.password_cache.enabled && self.password_cache.timeout.is_zero() {
            return Err(Error::Config(
                "password_cache.timeout must be positive".to_string(),
            ));
        }
        if self.lookup.request_timeout.is_zero() {
            return Err(Error::Config(
                "lookup.request_timeout must be positive".to_string(),
            ));
        }
        if self.gnupg.native_host.is_some() && self.gnupg.timeout.is_zero() {
            return Err(Error::Config("gnupg.timeout must be positive".to_string()));
        }
        if self.lookup.mks && self.lookup.mks_url.is_empty() {
            return Err(Error::Config("lookup.mks_url is empty".to_string()));
        }
        Ok(())
    }
}
