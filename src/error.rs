//! Error types for the mailkeys library.
//!
//! Every public operation returns [`Result`], with one variant per failure
//! kind a caller may want to react to (re-prompt on a wrong passphrase,
//! report an agent abort, pick another keyring when no default key exists).

use thiserror::Error;

/// The main error type for mailkeys operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Cryptographic operation failed
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    /// Key parsing failed
    #[error("Key parsing failed: {0}")]
    Parse(String),

    /// Passphrase does not unlock the private key
    #[error("Wrong password")]
    WrongPassword,

    /// Backup code does not decrypt the backup message
    #[error("Wrong backup code")]
    WrongBackupCode,

    /// Requested key was not found
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Keyring holds no usable private key
    #[error("No default key in keyring {0}")]
    NoDefaultKey(String),

    /// Requested keyring does not exist
    #[error("Keyring not found: {0}")]
    KeyringNotFound(String),

    /// Keyring id is already in use
    #[error("Keyring already exists: {0}")]
    KeyringExists(String),

    /// No suitable encryption subkey found
    #[error("No suitable encryption subkey found")]
    NoEncryptionSubkey,

    /// The GnuPG agent could not parse the input at all
    #[error("GnuPG agent aborted the operation")]
    AgentAborted,

    /// The GnuPG agent reported an error
    #[error("GnuPG agent error: {0}")]
    Agent(String),

    /// Operation is not available on this keyring backend
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Sync message could not be processed
    #[error("Sync error: {0}")]
    Sync(String),

    /// Key server rejected an upload
    #[error("Key upload failed with status {0}")]
    Upload(u16),

    /// Network error
    #[error("Network error: {0}")]
    Network(String),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored record could not be (de)serialized
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Database error (sqlite feature)
    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// rpgp OpenPGP error
    #[error("OpenPGP error: {0}")]
    OpenPgp(#[from] pgp::errors::Error),
}

/// A specialized Result type for mailkeys operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a single key of an import batch was not imported.
///
/// Batch imports report these per item instead of failing the whole batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImportError {
    /// Armored text is not a well-formed key of the requested kind
    #[error("Malformed key: {0}")]
    Malformed(String),

    /// The key is already present and unchanged
    #[error("Key {0} already exists")]
    AlreadyExists(String),

    /// The backend refused the key
    #[error("Import of key {0} failed")]
    Rejected(String),
}

#[cfg(feature = "network")]
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Network(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}
