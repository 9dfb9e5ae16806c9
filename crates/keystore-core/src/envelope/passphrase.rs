//! Passphrase (scrypt) envelopes

use crate::crypto::SecretString;
use crate::error::{KeystoreError, Result};
use crate::passphrase::{PassphrasePrompt, DECRYPT_PROMPT};

/// Stanza tag of a passphrase envelope
pub const KIND: &str = "scrypt";

/// Highest scrypt work factor (log2 N) opened without extra configuration
pub const DEFAULT_MAX_WORK_FACTOR: u8 = 22;

/// Work factors above this are refused even when configured
pub const WORK_FACTOR_CEILING: u8 = 30;

enum PassphraseSource<'p> {
    Known(SecretString),
    Deferred(&'p dyn PassphrasePrompt),
}

/// Opens passphrase envelopes, either with a known passphrase or by asking a
/// prompt only once such an envelope has actually been found
pub struct PassphraseIdentity<'p> {
    source: PassphraseSource<'p>,
}

impl<'p> PassphraseIdentity<'p> {
    pub fn new(passphrase: SecretString) -> Self {
        Self {
            source: PassphraseSource::Known(passphrase),
        }
    }

    pub fn deferred(prompt: &'p dyn PassphrasePrompt) -> Self {
        Self {
            source: PassphraseSource::Deferred(prompt),
        }
    }

    pub(crate) fn obtain(&self) -> Result<age::secrecy::SecretString> {
        match &self.source {
            PassphraseSource::Known(passphrase) => Ok(passphrase.to_age()),
            PassphraseSource::Deferred(prompt) => Ok(prompt.read_passphrase(DECRYPT_PROMPT)?.to_age()),
        }
    }
}

impl std::fmt::Debug for PassphraseIdentity<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let source = match self.source {
            PassphraseSource::Known(_) => "known",
            PassphraseSource::Deferred(_) => "deferred",
        };
        f.debug_struct("PassphraseIdentity")
            .field("source", &source)
            .finish()
    }
}

/// Work factor recorded in the scrypt stanza of a binary passphrase
/// envelope. The stanza is always the line after the intro.
pub(crate) fn scrypt_work_factor(binary: &[u8]) -> Result<u8> {
    let line = binary
        .split(|b| *b == b'\n')
        .nth(1)
        .and_then(|line| std::str::from_utf8(line).ok())
        .ok_or_else(|| KeystoreError::parse("envelope header is truncated"))?;

    match line.split(' ').collect::<Vec<_>>().as_slice() {
        ["->", kind, _salt, log_n] if *kind == KIND => log_n
            .parse::<u8>()
            .map_err(|_| KeystoreError::parse("invalid scrypt work factor")),
        _ => Err(KeystoreError::parse("envelope has no scrypt stanza")),
    }
}

pub(crate) fn check_work_factor(work_factor: u8, max: u8) -> Result<()> {
    if work_factor > max {
        return Err(KeystoreError::KeyDerivation(format!(
            "scrypt work factor {} exceeds the limit of {}",
            work_factor, max
        )));
    }
    Ok(())
}
