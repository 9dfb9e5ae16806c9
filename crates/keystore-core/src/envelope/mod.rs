//! Self-describing encryption envelope in the age format
//!
//! A random file key encrypts the payload; the file key is wrapped once per
//! recipient into a stanza. Anyone holding an identity that can unwrap one of
//! the stanzas recovers the payload. The binary envelope is carried as ASCII
//! armor, so records written by earlier releases open unchanged.
//!
//! Passphrase envelopes always have exactly one `scrypt` stanza. Mixing a
//! passphrase with other recipients is refused when sealing and when opening.

pub mod armor;
pub mod keys;
pub mod passphrase;

use std::io::{Read, Write};

use age::DecryptError;
use tracing::debug;
use zeroize::Zeroize;

use crate::crypto::{SecretBytes, SecretString};
use crate::error::{KeystoreError, Result};
use crate::resolver::FileIdentity;
use crate::store::ProtectionType;

pub use keys::{KeyIdentity, SshRecipient, X25519Identity, X25519Recipient};
pub use passphrase::{PassphraseIdentity, DEFAULT_MAX_WORK_FACTOR};

/// Target of a seal operation
#[derive(Debug)]
pub enum Recipient {
    Passphrase(SecretString),
    X25519(X25519Recipient),
    Ssh(SshRecipient),
}

impl Recipient {
    pub fn protection(&self) -> ProtectionType {
        match self {
            Recipient::Passphrase(_) => ProtectionType::Passphrase,
            Recipient::X25519(_) | Recipient::Ssh(_) => ProtectionType::Identity,
        }
    }

    fn to_age(&self) -> Option<Box<dyn age::Recipient + Send>> {
        match self {
            Recipient::Passphrase(_) => None,
            Recipient::X25519(r) => Some(Box::new(r.clone())),
            Recipient::Ssh(r) => Some(Box::new(r.clone())),
        }
    }
}

/// Capability used to open an envelope
#[derive(Debug)]
pub enum Identity<'p> {
    /// Passphrase, known up front or asked for lazily
    Passphrase(PassphraseIdentity<'p>),
    /// Keys loaded from an identity file, possibly passphrase-protected
    File(FileIdentity<'p>),
    /// A single literal key
    KeyString(KeyIdentity),
}

impl Identity<'_> {
    pub fn protection(&self) -> ProtectionType {
        match self {
            Identity::Passphrase(_) => ProtectionType::Passphrase,
            Identity::File(_) | Identity::KeyString(_) => ProtectionType::Identity,
        }
    }
}

/// Seal `secret` so that any one of `recipients` can open it
pub fn seal(secret: &[u8], recipients: &[Recipient]) -> Result<String> {
    let encryptor = match recipients {
        [] => return Err(KeystoreError::parse("at least one recipient is required")),
        [Recipient::Passphrase(passphrase)] => {
            age::Encryptor::with_user_passphrase(passphrase.to_age())
        }
        _ => {
            if recipients
                .iter()
                .any(|r| r.protection() == ProtectionType::Passphrase)
            {
                return Err(KeystoreError::TypeMismatch(
                    "a passphrase recipient must be the only recipient".to_string(),
                ));
            }
            let keys = recipients.iter().filter_map(Recipient::to_age).collect();
            age::Encryptor::with_recipients(keys)
                .ok_or_else(|| KeystoreError::parse("at least one recipient is required"))?
        }
    };

    let mut bytes = Vec::new();
    let mut writer = encryptor
        .wrap_output(&mut bytes)
        .map_err(KeystoreError::crypto)?;
    writer.write_all(secret)?;
    writer.finish()?;

    debug!("Sealed envelope for {} recipient(s)", recipients.len());
    armor::encode(&bytes)
}

/// Open `armor` with the first of `identities` that matches a stanza
pub fn open(armor: &str, identities: &[Identity<'_>]) -> Result<SecretBytes> {
    Opener::new(identities).open(armor)
}

/// Inspect the stanzas of an envelope without unwrapping anything
pub fn protection_kind(armor: &str) -> Result<ProtectionType> {
    classify(&armor::decode(armor)?)
}

pub(crate) fn classify(binary: &[u8]) -> Result<ProtectionType> {
    match age::Decryptor::new_buffered(binary).map_err(decrypt_error)? {
        age::Decryptor::Passphrase(_) => Ok(ProtectionType::Passphrase),
        age::Decryptor::Recipients(_) => Ok(ProtectionType::Identity),
    }
}

fn decrypt_error(e: DecryptError) -> KeystoreError {
    match e {
        DecryptError::DecryptionFailed
        | DecryptError::NoMatchingKeys
        | DecryptError::KeyDecryptionFailed => KeystoreError::IncorrectIdentity,
        DecryptError::ExcessiveWork { required, target } => KeystoreError::KeyDerivation(format!(
            "scrypt work factor {} exceeds the limit of {}",
            required, target
        )),
        DecryptError::InvalidHeader => {
            KeystoreError::parse("invalid envelope header (a passphrase stanza must be alone)")
        }
        DecryptError::UnknownFormat => KeystoreError::parse("unknown envelope format"),
        DecryptError::Io(e) => KeystoreError::Io(e),
        other => KeystoreError::crypto(other),
    }
}

fn read_payload(mut reader: impl Read) -> Result<SecretBytes> {
    let mut secret = Vec::new();
    if let Err(e) = reader.read_to_end(&mut secret) {
        secret.zeroize();
        return Err(KeystoreError::Crypto(format!("payload failed to decrypt: {}", e)));
    }
    Ok(SecretBytes::new(secret))
}

/// Progress of a single open attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenState {
    NotAttempted,
    /// Stanza is passphrase-protected; the passphrase is being obtained
    AwaitingPassphrase,
    /// Stanzas are asymmetric; identities are being tried
    MatchedAsymmetric,
    Unwrapped,
    Failed,
}

/// Runs one open attempt and records how far it got. There are no retries:
/// asking again is up to the caller.
pub struct Opener<'a, 'p> {
    identities: &'a [Identity<'p>],
    max_work_factor: u8,
    state: OpenState,
}

impl<'a, 'p> Opener<'a, 'p> {
    pub fn new(identities: &'a [Identity<'p>]) -> Self {
        Self {
            identities,
            max_work_factor: DEFAULT_MAX_WORK_FACTOR,
            state: OpenState::NotAttempted,
        }
    }

    /// Refuse passphrase envelopes whose scrypt work factor is above `max`
    pub fn with_max_work_factor(mut self, max: u8) -> Self {
        self.max_work_factor = max;
        self
    }

    pub fn state(&self) -> OpenState {
        self.state
    }

    pub fn open(&mut self, armor: &str) -> Result<SecretBytes> {
        let result = armor::decode(armor).and_then(|binary| self.run(&binary));
        self.finish(result)
    }

    /// Same as [`Opener::open`] for an envelope already in binary form
    pub(crate) fn open_binary(&mut self, binary: &[u8]) -> Result<SecretBytes> {
        let result = self.run(binary);
        self.finish(result)
    }

    fn finish(&mut self, result: Result<SecretBytes>) -> Result<SecretBytes> {
        self.state = match result {
            Ok(_) => OpenState::Unwrapped,
            Err(_) => OpenState::Failed,
        };
        result
    }

    fn run(&mut self, binary: &[u8]) -> Result<SecretBytes> {
        let kind = classify(binary)?;
        let identities = self.identities;
        let candidates: Vec<&Identity<'p>> = identities
            .iter()
            .filter(|i| i.protection() == kind)
            .collect();

        if candidates.is_empty() && !identities.is_empty() {
            return Err(KeystoreError::TypeMismatch(match kind {
                ProtectionType::Passphrase => {
                    "envelope is passphrase-protected but only key identities were supplied"
                        .to_string()
                }
                ProtectionType::Identity => {
                    "envelope is sealed to keys but only a passphrase was supplied".to_string()
                }
            }));
        }

        match kind {
            ProtectionType::Passphrase => {
                self.state = OpenState::AwaitingPassphrase;
                self.unlock_passphrase(binary, &candidates)
            }
            ProtectionType::Identity => {
                self.state = OpenState::MatchedAsymmetric;
                unlock_keys(binary, &candidates)
            }
        }
    }

    fn unlock_passphrase(&self, binary: &[u8], candidates: &[&Identity<'p>]) -> Result<SecretBytes> {
        // Checked before prompting so a hostile envelope never asks for input
        let work_factor = passphrase::scrypt_work_factor(binary)?;
        passphrase::check_work_factor(work_factor, self.max_work_factor)?;

        for candidate in candidates {
            let Identity::Passphrase(identity) = candidate else {
                continue;
            };
            let passphrase = identity.obtain()?;

            let age::Decryptor::Passphrase(decryptor) =
                age::Decryptor::new_buffered(binary).map_err(decrypt_error)?
            else {
                return Err(KeystoreError::parse("envelope is not passphrase-protected"));
            };
            match decryptor.decrypt(&passphrase, Some(self.max_work_factor)) {
                Ok(reader) => return read_payload(reader),
                Err(DecryptError::DecryptionFailed) => {
                    debug!("Passphrase did not unwrap the scrypt stanza");
                }
                Err(e) => return Err(decrypt_error(e)),
            }
        }
        Err(KeystoreError::IncorrectIdentity)
    }
}

fn unlock_keys(binary: &[u8], candidates: &[&Identity<'_>]) -> Result<SecretBytes> {
    for candidate in candidates {
        // Files are loaded one at a time so a protected file later in the
        // list is never unlocked when an earlier key already matches
        let keys: Vec<&dyn age::Identity> = match candidate {
            Identity::File(file) => file.identities()?.iter().map(KeyIdentity::as_age).collect(),
            Identity::KeyString(key) => vec![key.as_age()],
            Identity::Passphrase(_) => continue,
        };

        let age::Decryptor::Recipients(decryptor) =
            age::Decryptor::new_buffered(binary).map_err(decrypt_error)?
        else {
            return Err(KeystoreError::parse("envelope is not sealed to keys"));
        };
        match decryptor.decrypt(keys.into_iter()) {
            Ok(reader) => return read_payload(reader),
            Err(DecryptError::NoMatchingKeys) => {
                debug!("Identity did not match any stanza");
            }
            Err(e) => return Err(decrypt_error(e)),
        }
    }
    Err(KeystoreError::IncorrectIdentity)
}

/// Open a binary or armored envelope held in memory
pub(crate) fn open_bytes(input: &[u8], identities: &[Identity<'_>]) -> Result<SecretBytes> {
    Opener::new(identities).open_binary(&armor::decode_input(input)?)
}
