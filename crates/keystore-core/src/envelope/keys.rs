//! Public-key recipients and identities
//!
//! Native keys are X25519, written as `age1...` recipients and upper-case
//! `AGE-SECRET-KEY-1...` identities. OpenSSH `ssh-ed25519` and `ssh-rsa`
//! keys work as well.

use std::fmt;

use age::secrecy::ExposeSecret;
use age::ssh::ParseRecipientKeyError;

pub use age::ssh::Recipient as SshRecipient;
pub use age::x25519::{Identity as X25519Identity, Recipient as X25519Recipient};

use super::Recipient;
use crate::crypto::SecretString;
use crate::error::{KeystoreError, Result};

pub const X25519_RECIPIENT_PREFIX: &str = "age1";
pub const X25519_IDENTITY_PREFIX: &str = "AGE-SECRET-KEY-1";
pub const SSH_KEY_TYPES: &[&str] = &["ssh-ed25519", "ssh-rsa"];

/// A private key that can open key-sealed envelopes
#[derive(Clone)]
pub enum KeyIdentity {
    X25519(X25519Identity),
    /// An unencrypted OpenSSH key, or one already decrypted
    Ssh(age::ssh::Identity),
}

impl KeyIdentity {
    /// Parse an `AGE-SECRET-KEY-1...` string
    pub fn parse(s: &str) -> Result<Self> {
        s.trim()
            .parse::<X25519Identity>()
            .map(KeyIdentity::X25519)
            .map_err(|e| KeystoreError::parse(format!("invalid identity: {}", e)))
    }

    pub(crate) fn as_age(&self) -> &dyn age::Identity {
        match self {
            KeyIdentity::X25519(key) => key,
            KeyIdentity::Ssh(key) => key,
        }
    }

    /// Recipient that this key can open
    pub fn to_recipient(&self) -> Result<Recipient> {
        match self {
            KeyIdentity::X25519(key) => Ok(Recipient::X25519(key.to_public())),
            KeyIdentity::Ssh(key) => ssh_recipient_of(key.clone()).map(Recipient::Ssh),
        }
    }
}

impl From<X25519Identity> for KeyIdentity {
    fn from(key: X25519Identity) -> Self {
        KeyIdentity::X25519(key)
    }
}

impl fmt::Debug for KeyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            KeyIdentity::X25519(_) => "X25519",
            KeyIdentity::Ssh(_) => "Ssh",
        };
        f.debug_tuple(kind).field(&"[REDACTED]").finish()
    }
}

/// `AGE-SECRET-KEY-1...` text of an X25519 identity
pub fn encode_identity(identity: &X25519Identity) -> SecretString {
    SecretString::new(identity.to_string().expose_secret().clone())
}

pub fn parse_x25519_recipient(s: &str) -> Result<X25519Recipient> {
    s.trim()
        .parse::<X25519Recipient>()
        .map_err(|e| KeystoreError::parse(format!("invalid X25519 recipient: {}", e)))
}

pub fn parse_ssh_recipient(s: &str) -> Result<SshRecipient> {
    s.trim().parse::<SshRecipient>().map_err(ssh_key_error)
}

/// Public key of an SSH private key. Encrypted keys carry their public half
/// in the clear, so no passphrase is needed.
pub(crate) fn ssh_recipient_of(identity: age::ssh::Identity) -> Result<SshRecipient> {
    SshRecipient::try_from(identity).map_err(ssh_key_error)
}

fn ssh_key_error(e: ParseRecipientKeyError) -> KeystoreError {
    match e {
        ParseRecipientKeyError::Unsupported(kind) => {
            KeystoreError::NotImplemented(format!("SSH key type {} is not supported", kind))
        }
        ParseRecipientKeyError::RsaModulusTooLarge => {
            KeystoreError::NotImplemented("RSA keys above 4096 bits are not supported".to_string())
        }
        ParseRecipientKeyError::RsaModulusTooSmall => {
            KeystoreError::parse("RSA key is shorter than 2048 bits")
        }
        ParseRecipientKeyError::Invalid(msg) => KeystoreError::parse(format!("invalid SSH key: {}", msg)),
        ParseRecipientKeyError::Ignore => KeystoreError::parse("not an SSH public key"),
    }
}
