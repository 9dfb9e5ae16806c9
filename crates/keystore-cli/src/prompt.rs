//! Terminal passphrase prompt

use keystore_core::{KeystoreError, PassphrasePrompt, Result, SecretString};

/// Reads passphrases from the controlling terminal without echo
pub struct TerminalPrompt;

impl PassphrasePrompt for TerminalPrompt {
    fn read_passphrase(&self, prompt: &str) -> Result<SecretString> {
        rpassword::prompt_password(format!("{}: ", prompt))
            .map(SecretString::new)
            .map_err(|e| KeystoreError::Prompt(e.to_string()))
    }

    fn show_generated(&self, passphrase: &str) -> Result<()> {
        println!("Using autogenerated passphrase:");
        println!("{}", passphrase);
        println!("Store it safely, it will not be shown again.");
        Ok(())
    }
}

/// Read a hex seed without echo
pub fn read_seed() -> Result<SecretString> {
    rpassword::prompt_password("Seed (hex): ")
        .map(SecretString::new)
        .map_err(|e| KeystoreError::Prompt(e.to_string()))
}
