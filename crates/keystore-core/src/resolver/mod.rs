//! Turns user-supplied recipient and identity references into envelope
//! recipients and identities

mod identity_file;

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::envelope::keys::{self, SSH_KEY_TYPES, X25519_RECIPIENT_PREFIX};
use crate::envelope::{Identity, KeyIdentity, Recipient};
use crate::error::{KeystoreError, Result};
use crate::passphrase::PassphrasePrompt;

pub use identity_file::{write_identity_file, FileIdentity};

/// Remote key-set providers that are recognised but never fetched
const REMOTE_PROVIDERS: &[&str] = &["github", "gitlab", "keybase"];

/// Where the recipients of a new envelope come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientSpec {
    /// A single recipient string, e.g. `age1...` or `ssh-ed25519 AAAA...`
    Literal(String),
    /// A file listing one recipient per line
    RecipientsFile(PathBuf),
    /// An identity file; its public halves become the recipients
    IdentityFile(PathBuf),
}

/// Parse a single recipient string
pub fn parse_recipient(s: &str) -> Result<Recipient> {
    let s = s.trim();

    if s.starts_with(X25519_RECIPIENT_PREFIX) {
        return keys::parse_x25519_recipient(s).map(Recipient::X25519);
    }

    let key_type = s.split_whitespace().next().unwrap_or_default();
    if SSH_KEY_TYPES.contains(&key_type) {
        return keys::parse_ssh_recipient(s).map(Recipient::Ssh);
    }
    if key_type.starts_with("ssh-") || key_type.starts_with("ecdsa-") {
        return Err(KeystoreError::NotImplemented(format!(
            "SSH key type {} is not supported",
            key_type
        )));
    }

    if let Some((provider, user)) = s.split_once(':') {
        if REMOTE_PROVIDERS.contains(&provider) && !user.is_empty() {
            return Err(KeystoreError::NotImplemented(format!(
                "fetching recipients from {} is not supported",
                provider
            )));
        }
    }

    Err(KeystoreError::parse(format!("unknown recipient type: {}", s)))
}

/// Parse a literal `AGE-SECRET-KEY-1...` string
pub fn parse_identity(s: &str) -> Result<Identity<'static>> {
    KeyIdentity::parse(s).map(Identity::KeyString)
}

/// Resolve a recipient spec to the recipients an envelope is sealed to.
///
/// `prompt` is only used when an identity file turns out to be
/// passphrase-protected.
pub fn resolve_recipients(
    spec: &RecipientSpec,
    prompt: &dyn PassphrasePrompt,
) -> Result<Vec<Recipient>> {
    let recipients = match spec {
        RecipientSpec::Literal(s) => vec![parse_recipient(s)?],
        RecipientSpec::RecipientsFile(path) => read_recipients_file(path)?,
        RecipientSpec::IdentityFile(path) => FileIdentity::load(path, prompt)?.recipients()?,
    };

    debug!("Resolved {} recipient(s)", recipients.len());
    Ok(recipients)
}

/// Load the identities in an identity file
pub fn resolve_identities<'p>(
    path: &Path,
    prompt: &'p dyn PassphrasePrompt,
) -> Result<Vec<Identity<'p>>> {
    Ok(vec![Identity::File(FileIdentity::load(path, prompt)?)])
}

fn read_recipients_file(path: &Path) -> Result<Vec<Recipient>> {
    let contents = std::fs::read_to_string(path)?;
    let mut recipients = Vec::new();

    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let at_line = |msg: String| format!("{}: line {}: {}", path.display(), index + 1, msg);
        let recipient = parse_recipient(line).map_err(|e| match e {
            KeystoreError::ParseError(msg) => KeystoreError::ParseError(at_line(msg)),
            KeystoreError::NotImplemented(msg) => KeystoreError::NotImplemented(at_line(msg)),
            other => other,
        })?;
        recipients.push(recipient);
    }

    if recipients.is_empty() {
        return Err(KeystoreError::parse(format!(
            "{}: no recipients found",
            path.display()
        )));
    }
    Ok(recipients)
}
