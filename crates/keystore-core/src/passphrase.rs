//! Passphrase prompting and generation
//!
//! The core never reads a terminal itself. Callers hand in a
//! [`PassphrasePrompt`]; the envelope only invokes it once it has seen a
//! passphrase stanza, and creation-time rules (confirm, or auto-generate on
//! empty input) live in [`passphrase_for_encryption`].

use bip39::Language;
use rand::{rngs::OsRng, Rng};
use tracing::debug;

use crate::crypto::SecretString;
use crate::error::{KeystoreError, Result};

/// Default number of words in an auto-generated passphrase
pub const DEFAULT_GENERATED_WORDS: usize = 10;

pub const DECRYPT_PROMPT: &str = "Enter passphrase";
pub const ENCRYPT_PROMPT: &str = "Enter passphrase (leave empty to autogenerate a secure one)";
pub const CONFIRM_PROMPT: &str = "Confirm passphrase";

/// Source of passphrases, usually a terminal
pub trait PassphrasePrompt {
    /// Ask for a passphrase, displaying `prompt`
    fn read_passphrase(&self, prompt: &str) -> Result<SecretString>;

    /// Show an auto-generated passphrase to the user exactly once
    fn show_generated(&self, passphrase: &str) -> Result<()>;
}

/// Build `words` random words from the BIP-39 English list joined with `-`
pub fn generate_passphrase(words: usize) -> SecretString {
    let list = Language::English.word_list();
    let mut rng = OsRng;

    let chosen: Vec<&str> = (0..words.max(1))
        .map(|_| list[rng.gen_range(0..list.len())])
        .collect();

    SecretString::new(chosen.join("-"))
}

/// Obtain a passphrase for sealing a new envelope.
///
/// Empty input auto-generates a passphrase of `words` words and shows it
/// once; anything else must be typed twice.
pub fn passphrase_for_encryption(
    prompt: &dyn PassphrasePrompt,
    words: usize,
) -> Result<SecretString> {
    let passphrase = prompt.read_passphrase(ENCRYPT_PROMPT)?;

    if passphrase.is_empty() {
        let generated = generate_passphrase(words);
        prompt.show_generated(generated.expose())?;
        debug!("Using autogenerated passphrase of {} words", words);
        return Ok(generated);
    }

    let confirm = prompt.read_passphrase(CONFIRM_PROMPT)?;
    if confirm.expose() != passphrase.expose() {
        return Err(KeystoreError::PassphraseMismatch);
    }

    Ok(passphrase)
}
