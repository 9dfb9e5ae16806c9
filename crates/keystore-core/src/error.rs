//! Error types for keystore-core

use thiserror::Error;

/// Result type alias for keystore operations
pub type Result<T> = std::result::Result<T, KeystoreError>;

/// Keystore error types
#[derive(Error, Debug)]
pub enum KeystoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("No identity matched any of the envelope's recipients")]
    IncorrectIdentity,

    #[error("Passphrases didn't match")]
    PassphraseMismatch,

    #[error("Protection type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Could not read passphrase: {0}")]
    Prompt(String),

    #[error("Store file changed on disk since it was loaded: {0}")]
    Conflict(String),

    #[error("Resource busy: {0}")]
    Busy(String),
}

impl KeystoreError {
    pub(crate) fn parse(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }

    pub(crate) fn crypto(msg: impl std::fmt::Display) -> Self {
        Self::Crypto(msg.to_string())
    }
}
