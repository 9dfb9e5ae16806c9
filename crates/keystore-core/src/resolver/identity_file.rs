//! Identity files: one `AGE-SECRET-KEY-1...` key per line, optionally
//! sealed as a whole under a passphrase, or an OpenSSH private key

use std::cell::OnceCell;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::crypto::SecretString;
use crate::envelope::keys::{self, encode_identity};
use crate::envelope::{
    self, armor, Identity, KeyIdentity, PassphraseIdentity, Recipient, X25519Identity,
};
use crate::error::{KeystoreError, Result};
use crate::passphrase::PassphrasePrompt;
use crate::store::ProtectionType;

const SSH_PRIVATE_KEY_MARKER: &str = "PRIVATE KEY-----";

/// What still has to happen before the keys of a file can be used
enum Pending {
    Ready,
    /// Passphrase-sealed list of keys, binary form
    Sealed(Vec<u8>),
    /// Passphrase-protected OpenSSH key
    EncryptedSsh(age::ssh::EncryptedKey),
}

/// Keys loaded from an identity file.
///
/// A passphrase-protected file is only decrypted the first time its keys are
/// needed; the prompt is never touched for plain files.
pub struct FileIdentity<'p> {
    path: PathBuf,
    pending: Pending,
    prompt: &'p dyn PassphrasePrompt,
    keys: OnceCell<Vec<KeyIdentity>>,
}

impl<'p> FileIdentity<'p> {
    pub fn load(path: &Path, prompt: &'p dyn PassphrasePrompt) -> Result<Self> {
        let contents = std::fs::read(path)?;
        let keys = OnceCell::new();

        let pending = if armor::is_envelope(&contents) {
            let binary = armor::decode_input(&contents)?;
            if envelope::classify(&binary)? != ProtectionType::Passphrase {
                return Err(KeystoreError::TypeMismatch(
                    "identity file is encrypted but not with a passphrase".to_string(),
                ));
            }
            debug!("Identity file {:?} is passphrase-protected", path);
            Pending::Sealed(binary)
        } else if is_ssh_private_key(&contents) {
            match load_ssh_key(&contents, path)? {
                age::ssh::Identity::Encrypted(key) => {
                    debug!("SSH key {:?} is passphrase-protected", path);
                    Pending::EncryptedSsh(key)
                }
                ready => {
                    let _ = keys.set(vec![KeyIdentity::Ssh(ready)]);
                    Pending::Ready
                }
            }
        } else {
            let text = std::str::from_utf8(&contents)
                .map_err(|_| KeystoreError::parse(format!("{}: not UTF-8", path.display())))?;
            let _ = keys.set(parse_identity_lines(text, path)?);
            Pending::Ready
        };

        Ok(Self {
            path: path.to_path_buf(),
            pending,
            prompt,
            keys,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_protected(&self) -> bool {
        !matches!(self.pending, Pending::Ready)
    }

    /// The keys in the file, decrypting it first if needed
    pub fn identities(&self) -> Result<&[KeyIdentity]> {
        if let Some(keys) = self.keys.get() {
            return Ok(keys.as_slice());
        }

        let parsed = match &self.pending {
            Pending::Ready => return Err(KeystoreError::parse("identity file has no keys")),
            Pending::Sealed(binary) => {
                let unlock = [Identity::Passphrase(PassphraseIdentity::deferred(self.prompt))];
                let plaintext = envelope::open_bytes(binary, &unlock)?;
                let text = std::str::from_utf8(plaintext.expose())
                    .map_err(|_| KeystoreError::parse("decrypted identity file is not UTF-8"))?;
                parse_identity_lines(text, &self.path)?
            }
            Pending::EncryptedSsh(key) => {
                let message = format!("Enter passphrase for {}", self.path.display());
                let passphrase = self.prompt.read_passphrase(&message)?;
                let unlocked = key.decrypt(passphrase.to_age()).map_err(|_| {
                    warn!("Wrong passphrase for SSH key {:?}", self.path);
                    KeystoreError::IncorrectIdentity
                })?;
                vec![KeyIdentity::Ssh(age::ssh::Identity::Unencrypted(unlocked))]
            }
        };

        let _ = self.keys.set(parsed);
        self.keys
            .get()
            .map(Vec::as_slice)
            .ok_or_else(|| KeystoreError::parse("identity file has no keys"))
    }

    /// Public halves of every key in the file. An encrypted SSH key stores
    /// its public half in the clear and is not decrypted.
    pub fn recipients(&self) -> Result<Vec<Recipient>> {
        if let Pending::EncryptedSsh(key) = &self.pending {
            let identity = age::ssh::Identity::Encrypted(key.clone());
            return Ok(vec![Recipient::Ssh(keys::ssh_recipient_of(identity)?)]);
        }
        self.identities()?
            .iter()
            .map(KeyIdentity::to_recipient)
            .collect()
    }
}

impl std::fmt::Debug for FileIdentity<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileIdentity")
            .field("path", &self.path)
            .field("protected", &self.is_protected())
            .finish_non_exhaustive()
    }
}

fn is_ssh_private_key(contents: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(contents) else {
        return false;
    };
    text.trim_start()
        .lines()
        .next()
        .map_or(false, |l| l.starts_with("-----BEGIN") && l.trim_end().ends_with(SSH_PRIVATE_KEY_MARKER))
}

fn load_ssh_key(contents: &[u8], path: &Path) -> Result<age::ssh::Identity> {
    let identity = age::ssh::Identity::from_buffer(contents, Some(path.display().to_string()))
        .map_err(|e| KeystoreError::parse(format!("{}: {}", path.display(), e)))?;
    if let age::ssh::Identity::Unsupported(_) = identity {
        return Err(KeystoreError::NotImplemented(format!(
            "{}: unsupported SSH key type",
            path.display()
        )));
    }
    Ok(identity)
}

/// Parse identity lines, skipping blanks and `#` comments. Errors name the
/// line but never echo its content.
pub(crate) fn parse_identity_lines(text: &str, path: &Path) -> Result<Vec<KeyIdentity>> {
    let mut keys = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let key = KeyIdentity::parse(line).map_err(|_| {
            KeystoreError::parse(format!(
                "{}: line {}: not a valid identity",
                path.display(),
                index + 1
            ))
        })?;
        keys.push(key);
    }

    if keys.is_empty() {
        return Err(KeystoreError::parse(format!(
            "{}: no identities found",
            path.display()
        )));
    }
    Ok(keys)
}

/// Write a new identity file. With a passphrase the whole file is sealed
/// under it; otherwise it is written in the clear. Existing files are never
/// overwritten.
pub fn write_identity_file(
    path: &Path,
    identity: &X25519Identity,
    passphrase: Option<SecretString>,
) -> Result<()> {
    let mut text = format!(
        "# created: {}\n# public key: {}\n",
        chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        identity.to_public()
    );
    text.push_str(encode_identity(identity).expose());
    text.push('\n');

    let contents = match passphrase {
        Some(passphrase) => {
            let sealed = envelope::seal(text.as_bytes(), &[Recipient::Passphrase(passphrase)]);
            zeroize::Zeroize::zeroize(&mut text);
            sealed?
        }
        None => text,
    };

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::AlreadyExists {
            KeystoreError::AlreadyExists(format!("{}", path.display()))
        } else {
            KeystoreError::Io(e)
        }
    })?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;

    debug!("Wrote identity file {:?}", path);
    Ok(())
}
