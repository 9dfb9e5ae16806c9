//! # keystore-core
//!
//! Encrypted account key-store:
//! - Wallet records persisted as a JSON array, written atomically under a lock
//! - age envelopes sealed to a passphrase (scrypt) or to X25519 and SSH keys
//! - Recipient and identity resolution from key strings and key files
//! - Secrets zeroized on drop

pub mod account;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod passphrase;
pub mod resolver;
pub mod settings;
pub mod store;

pub use account::{Account, DeriveAccount, Ed25519Deriver};
pub use crypto::{SecretBytes, SecretString};
pub use envelope::{
    open, seal, Identity, KeyIdentity, OpenState, Opener, Recipient, SshRecipient,
    X25519Identity, X25519Recipient,
};
pub use error::{KeystoreError, Result};
pub use passphrase::{generate_passphrase, passphrase_for_encryption, PassphrasePrompt};
pub use resolver::{
    parse_identity, parse_recipient, resolve_identities, resolve_recipients, write_identity_file,
    FileIdentity, RecipientSpec,
};
pub use settings::{Settings, SettingsManager};
pub use store::{
    AccessRequest, CreateRequest, CreatedAccount, ProtectionSpec, ProtectionType, RecordRef,
    Store, UnlockedAccount, WalletRecord,
};
