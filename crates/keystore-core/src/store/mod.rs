//! Wallet record store
//!
//! Owns the ordered collection of records backed by one JSON file. Creation
//! only changes memory; rename, passphrase rotation and delete write the file
//! before returning. Every write is locked, checked against the content seen
//! at load, and atomic.

mod file;
mod record;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::MutexGuard;

use tracing::{debug, info};

use crate::account::{generate_seed, seed_from_plaintext, Account, DeriveAccount, Ed25519Deriver};
use crate::crypto::SecretBytes;
use crate::envelope::{self, Identity, Opener, PassphraseIdentity, Recipient};
use crate::error::{KeystoreError, Result};
use crate::passphrase::{passphrase_for_encryption, PassphrasePrompt};
use crate::resolver::{resolve_recipients, RecipientSpec};
use crate::settings::Settings;

use file::Fingerprint;

pub use record::{ProtectionType, WalletRecord};

/// How a new record should be sealed
#[derive(Debug, Default, Clone)]
pub enum ProtectionSpec {
    /// Ask for a passphrase (or generate one)
    #[default]
    Passphrase,
    /// Seal to the recipients a `RecipientSpec` resolves to
    Recipients(RecipientSpec),
}

/// Parameters of a create or restore
#[derive(Debug, Default)]
pub struct CreateRequest {
    /// Seed to restore; a fresh one is generated when absent
    pub seed: Option<SecretBytes>,
    pub protection: ProtectionSpec,
    pub alias: Option<String>,
}

/// Result of a successful create. The seed is handed back once so the
/// caller can show it; it is wiped when this value is dropped.
#[derive(Debug)]
pub struct CreatedAccount {
    pub id: u64,
    pub address: String,
    pub protection: ProtectionType,
    pub seed: SecretBytes,
}

/// What the caller offers to open a record
pub enum AccessRequest<'p> {
    /// Ask for the passphrase, only once a passphrase stanza is found
    Passphrase(&'p dyn PassphrasePrompt),
    /// Try these identities
    Identities(Vec<Identity<'p>>),
}

/// Selects a record by id or by alias
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordRef {
    Id(u64),
    Alias(String),
}

impl RecordRef {
    fn matches(&self, record: &WalletRecord) -> bool {
        match self {
            RecordRef::Id(id) => record.id() == *id,
            RecordRef::Alias(alias) => record.alias() == Some(alias.as_str()),
        }
    }
}

impl std::fmt::Display for RecordRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordRef::Id(id) => write!(f, "id {}", id),
            RecordRef::Alias(alias) => write!(f, "alias '{}'", alias),
        }
    }
}

/// A decrypted account. The record stays guarded and the secret stays in
/// memory only while this value is alive.
pub struct UnlockedAccount<'s> {
    record: &'s WalletRecord,
    account: Account,
    _guard: MutexGuard<'s, ()>,
}

impl UnlockedAccount<'_> {
    pub fn id(&self) -> u64 {
        self.record.id()
    }

    pub fn alias(&self) -> Option<&str> {
        self.record.alias()
    }

    pub fn address(&self) -> &str {
        self.account.address()
    }

    pub fn seed(&self) -> &SecretBytes {
        self.account.seed()
    }

    pub fn account(&self) -> &Account {
        &self.account
    }
}

impl std::fmt::Debug for UnlockedAccount<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlockedAccount")
            .field("id", &self.id())
            .field("account", &self.account)
            .finish()
    }
}

fn normalize_alias(alias: Option<&str>) -> Option<String> {
    alias
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
}

/// The record collection and its backing file
pub struct Store {
    path: PathBuf,
    records: Vec<WalletRecord>,
    fingerprint: Fingerprint,
    high_water: u64,
    deriver: Box<dyn DeriveAccount>,
    settings: Settings,
}

impl Store {
    /// Load with the default Ed25519 accounts and default settings
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with(path, Box::new(Ed25519Deriver), Settings::default())
    }

    pub fn load_with(
        path: &Path,
        deriver: Box<dyn DeriveAccount>,
        settings: Settings,
    ) -> Result<Self> {
        let (records, fingerprint) = file::read_records(path)?;

        let mut ids = HashSet::new();
        let mut aliases = HashSet::new();
        let mut addresses = HashSet::new();
        for record in &records {
            let duplicate = if !ids.insert(record.id()) {
                Some(format!("wallet id {}", record.id()))
            } else if !addresses.insert(record.address()) {
                Some(format!("address {}", record.address()))
            } else {
                record
                    .alias()
                    .filter(|alias| !aliases.insert(*alias))
                    .map(|alias| format!("alias '{}'", alias))
            };
            if let Some(duplicate) = duplicate {
                return Err(KeystoreError::parse(format!(
                    "{}: duplicate {}",
                    path.display(),
                    duplicate
                )));
            }
        }
        let high_water = records.iter().map(WalletRecord::id).max().unwrap_or(0);

        Ok(Self {
            path: path.to_path_buf(),
            records,
            fingerprint,
            high_water,
            deriver,
            settings,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Records in insertion order
    pub fn records(&self) -> &[WalletRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn find_by_id(&self, id: u64) -> Option<&WalletRecord> {
        self.records.iter().find(|r| r.id() == id)
    }

    pub fn find_by_alias(&self, alias: &str) -> Option<&WalletRecord> {
        if alias.is_empty() {
            return None;
        }
        self.records.iter().find(|r| r.alias() == Some(alias))
    }

    /// Id the next created record will get. Ids of deleted records are
    /// never handed out again while this store is alive.
    pub fn next_id(&self) -> Result<u64> {
        let max_present = self.records.iter().map(WalletRecord::id).max().unwrap_or(0);
        max_present
            .max(self.high_water)
            .checked_add(1)
            .ok_or_else(|| KeystoreError::AlreadyExists("every wallet id is taken".to_string()))
    }

    /// Id of the record `target` selects
    pub fn resolve(&self, target: &RecordRef) -> Result<u64> {
        self.records
            .iter()
            .find(|r| target.matches(r))
            .map(WalletRecord::id)
            .ok_or_else(|| KeystoreError::NotFound(format!("wallet with {}", target)))
    }

    /// Write the whole collection to disk
    pub fn persist(&mut self) -> Result<()> {
        self.fingerprint = file::write_records(&self.path, &self.records, &self.fingerprint)?;
        Ok(())
    }

    /// Seal a new or restored seed and append it. Nothing is written to
    /// disk until [`Store::persist`].
    pub fn create(
        &mut self,
        request: CreateRequest,
        prompt: &dyn PassphrasePrompt,
    ) -> Result<CreatedAccount> {
        let alias = normalize_alias(request.alias.as_deref());
        if let Some(alias) = &alias {
            if self.find_by_alias(alias).is_some() {
                return Err(KeystoreError::AlreadyExists(format!("alias '{}'", alias)));
            }
        }

        let id = self.next_id()?;
        let seed = request.seed.unwrap_or_else(generate_seed);
        let account = self.deriver.derive_account(seed.expose())?;
        if let Some(existing) = self.records.iter().find(|r| r.address() == account.address()) {
            return Err(KeystoreError::AlreadyExists(format!(
                "address {} is already stored as wallet {}",
                account.address(),
                existing.id()
            )));
        }

        let (protection, recipients) = match &request.protection {
            ProtectionSpec::Passphrase => {
                let passphrase =
                    passphrase_for_encryption(prompt, self.settings.generated_passphrase_words)?;
                (ProtectionType::Passphrase, vec![Recipient::Passphrase(passphrase)])
            }
            ProtectionSpec::Recipients(spec) => {
                (ProtectionType::Identity, resolve_recipients(spec, prompt)?)
            }
        };
        let armor = envelope::seal(seed.expose(), &recipients)?;

        let address = account.address().to_string();
        self.records.push(WalletRecord::new(
            id,
            protection,
            address.clone(),
            armor,
            alias,
        ));
        self.high_water = id;

        info!("Created wallet {} ({}) for {}", id, protection, address);
        Ok(CreatedAccount {
            id,
            address,
            protection,
            seed,
        })
    }

    /// Decrypt a record's seed and check it still derives the stored address
    pub fn unlock(&self, id: u64, access: AccessRequest<'_>) -> Result<UnlockedAccount<'_>> {
        let record = self
            .find_by_id(id)
            .ok_or_else(|| KeystoreError::NotFound(format!("wallet {}", id)))?;

        let identities = match access {
            AccessRequest::Passphrase(prompt) => {
                vec![Identity::Passphrase(PassphraseIdentity::deferred(prompt))]
            }
            AccessRequest::Identities(identities) => identities,
        };
        if !identities
            .iter()
            .any(|i| i.protection() == record.protection())
        {
            return Err(KeystoreError::TypeMismatch(format!(
                "wallet {} is {}-protected",
                id,
                record.protection()
            )));
        }

        let guard = record.try_guard()?;

        let sealed_as = envelope::protection_kind(record.armor())?;
        if sealed_as != record.protection() {
            return Err(KeystoreError::parse(format!(
                "wallet {} is tagged {} but its armor is {}",
                id,
                record.protection(),
                sealed_as
            )));
        }

        let plaintext = Opener::new(&identities)
            .with_max_work_factor(self.settings.max_work_factor)
            .open(record.armor())?;
        let seed = seed_from_plaintext(&plaintext)?;
        let account = self.deriver.derive_account(seed.expose())?;
        if account.address() != record.address() {
            return Err(KeystoreError::Crypto(format!(
                "decrypted seed does not derive the address of wallet {}",
                id
            )));
        }

        debug!("Unlocked wallet {}", id);
        Ok(UnlockedAccount {
            record,
            account,
            _guard: guard,
        })
    }

    /// Set or clear (with an empty string) a record's alias, then persist
    pub fn rename(&mut self, id: u64, alias: &str) -> Result<()> {
        let alias = normalize_alias(Some(alias));

        if let Some(alias) = &alias {
            if let Some(other) = self.find_by_alias(alias).filter(|r| r.id() != id) {
                return Err(KeystoreError::AlreadyExists(format!(
                    "alias '{}' is used by wallet {}",
                    alias,
                    other.id()
                )));
            }
        }

        let record = self
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| KeystoreError::NotFound(format!("wallet {}", id)))?;
        let previous = std::mem::replace(&mut record.alias, alias);

        if let Err(e) = self.persist() {
            if let Some(record) = self.records.iter_mut().find(|r| r.id == id) {
                record.alias = previous;
            }
            return Err(e);
        }

        info!("Renamed wallet {}", id);
        Ok(())
    }

    /// Re-seal a passphrase record under a new passphrase, then persist.
    ///
    /// The prompt is asked for the current passphrase first, then for the new
    /// one under the same rules as creation.
    pub fn rotate_passphrase(&mut self, id: u64, prompt: &dyn PassphrasePrompt) -> Result<()> {
        let record = self
            .find_by_id(id)
            .ok_or_else(|| KeystoreError::NotFound(format!("wallet {}", id)))?;
        if record.protection() != ProtectionType::Passphrase {
            return Err(KeystoreError::TypeMismatch(format!(
                "wallet {} is {}-protected and has no passphrase",
                id,
                record.protection()
            )));
        }

        let armor = {
            let unlocked = self.unlock(id, AccessRequest::Passphrase(prompt))?;
            let passphrase =
                passphrase_for_encryption(prompt, self.settings.generated_passphrase_words)?;
            envelope::seal(unlocked.seed().expose(), &[Recipient::Passphrase(passphrase)])?
        };

        let record = self
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| KeystoreError::NotFound(format!("wallet {}", id)))?;
        let previous = std::mem::replace(&mut record.armor, armor);

        if let Err(e) = self.persist() {
            if let Some(record) = self.records.iter_mut().find(|r| r.id == id) {
                record.armor = previous;
            }
            return Err(e);
        }

        info!("Rotated passphrase of wallet {}", id);
        Ok(())
    }

    /// Remove every record matching `target`, then persist. Returns how many
    /// were removed.
    pub fn delete(&mut self, target: &RecordRef) -> Result<usize> {
        let kept: Vec<&WalletRecord> = self.records.iter().filter(|r| !target.matches(r)).collect();
        let removed = self.records.len() - kept.len();
        if removed == 0 {
            return Err(KeystoreError::NotFound(format!("wallet with {}", target)));
        }

        self.fingerprint = file::write_records(&self.path, &kept, &self.fingerprint)?;
        self.records.retain(|r| !target.matches(r));

        info!("Deleted {} wallet(s) with {}", removed, target);
        Ok(removed)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("records", &self.records.len())
            .field("next_id", &self.next_id().ok())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::X25519Identity;
    use crate::passphrase::testing::ScriptedPrompt;
    use crate::resolver::{resolve_identities, write_identity_file};
    use base64::{engine::general_purpose::STANDARD, Engine};
    use std::io::Write;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> Store {
        Store::load_with(
            &dir.path().join("wallet.json"),
            Box::new(Ed25519Deriver),
            Settings::default(),
        )
        .unwrap()
    }

    fn create_with_passphrase(store: &mut Store, pass: &str, alias: Option<&str>) -> u64 {
        let prompt = ScriptedPrompt::new(&[pass, pass]);
        store
            .create(
                CreateRequest {
                    alias: alias.map(str::to_string),
                    ..CreateRequest::default()
                },
                &prompt,
            )
            .unwrap()
            .id
    }

    /// Sealed to a throwaway key, which is much cheaper than scrypt
    fn create_keyed(store: &mut Store, alias: Option<&str>) -> u64 {
        let recipient = X25519Identity::generate().to_public().to_string();
        let prompt = ScriptedPrompt::new(&[]);
        store
            .create(
                CreateRequest {
                    alias: alias.map(str::to_string),
                    protection: ProtectionSpec::Recipients(RecipientSpec::Literal(recipient)),
                    ..CreateRequest::default()
                },
                &prompt,
            )
            .unwrap()
            .id
    }

    fn identity_file(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("key.txt");
        write_identity_file(&path, &X25519Identity::generate(), None).unwrap();
        path
    }

    fn create_with_identity(store: &mut Store, key_file: &Path) -> u64 {
        let prompt = ScriptedPrompt::new(&[]);
        store
            .create(
                CreateRequest {
                    protection: ProtectionSpec::Recipients(RecipientSpec::IdentityFile(
                        key_file.to_path_buf(),
                    )),
                    ..CreateRequest::default()
                },
                &prompt,
            )
            .unwrap()
            .id
    }

    /// Armor as the `age` tool writes it for a passphrase
    fn age_armor(plaintext: &[u8], pass: &str) -> String {
        let mut out = Vec::new();
        let armored =
            age::armor::ArmoredWriter::wrap_output(&mut out, age::armor::Format::AsciiArmor)
                .unwrap();
        let mut writer =
            age::Encryptor::with_user_passphrase(age::secrecy::Secret::new(pass.to_string()))
                .wrap_output(armored)
                .unwrap();
        writer.write_all(plaintext).unwrap();
        writer.finish().unwrap().finish().unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_ids_strictly_increase() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);

        let ids: Vec<u64> = (0..3).map(|_| create_keyed(&mut store, None)).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_passphrase_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);

        let prompt = ScriptedPrompt::new(&["pw", "pw"]);
        let created = store.create(CreateRequest::default(), &prompt).unwrap();
        assert_eq!(created.protection, ProtectionType::Passphrase);
        assert!(store.records()[0].armor().starts_with(envelope::armor::BEGIN));

        let prompt = ScriptedPrompt::new(&["pw"]);
        let unlocked = store.unlock(created.id, AccessRequest::Passphrase(&prompt)).unwrap();
        assert_eq!(unlocked.seed(), &created.seed);
        assert_eq!(unlocked.address(), created.address);
        drop(unlocked);

        let prompt = ScriptedPrompt::new(&["B"]);
        assert!(matches!(
            store.unlock(created.id, AccessRequest::Passphrase(&prompt)),
            Err(KeystoreError::IncorrectIdentity)
        ));
    }

    #[test]
    fn test_unlocks_record_written_by_earlier_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet.json");

        let seed = [7u8; 32];
        let account = Ed25519Deriver.derive_account(&seed).unwrap();
        let mut private_key = seed.to_vec();
        private_key.extend_from_slice(account.public_key());
        let plaintext = format!(r#"{{"PrivateKey":"{}"}}"#, STANDARD.encode(&private_key));

        let records = serde_json::json!([{
            "id": 3,
            "address": account.address(),
            "armor": age_armor(plaintext.as_bytes(), "pw"),
        }]);
        std::fs::write(&path, records.to_string()).unwrap();

        let store = Store::load(&path).unwrap();
        assert_eq!(store.records()[0].protection(), ProtectionType::Passphrase);

        let prompt = ScriptedPrompt::new(&["pw"]);
        let unlocked = store.unlock(3, AccessRequest::Passphrase(&prompt)).unwrap();
        assert_eq!(unlocked.seed().expose(), &seed);
        assert_eq!(unlocked.address(), account.address());
    }

    #[test]
    fn test_identity_roundtrip_and_unrelated_identity() {
        let dir = TempDir::new().unwrap();
        let key_file = identity_file(&dir);
        let mut store = open_store(&dir);
        let id = create_with_identity(&mut store, &key_file);

        let prompt = ScriptedPrompt::new(&[]);
        let identities = resolve_identities(&key_file, &prompt).unwrap();
        let unlocked = store.unlock(id, AccessRequest::Identities(identities)).unwrap();
        assert_eq!(unlocked.id(), id);
        drop(unlocked);

        let stranger = vec![Identity::KeyString(X25519Identity::generate().into())];
        assert!(matches!(
            store.unlock(id, AccessRequest::Identities(stranger)),
            Err(KeystoreError::IncorrectIdentity)
        ));
    }

    #[test]
    fn test_unlock_with_wrong_kind_never_prompts() {
        let dir = TempDir::new().unwrap();
        let key_file = identity_file(&dir);
        let mut store = open_store(&dir);
        let pass_id = create_with_passphrase(&mut store, "pw", None);
        let key_id = create_with_identity(&mut store, &key_file);

        let keys = vec![Identity::KeyString(X25519Identity::generate().into())];
        assert!(matches!(
            store.unlock(pass_id, AccessRequest::Identities(keys)),
            Err(KeystoreError::TypeMismatch(_))
        ));

        let prompt = ScriptedPrompt::new(&["pw"]);
        assert!(matches!(
            store.unlock(key_id, AccessRequest::Passphrase(&prompt)),
            Err(KeystoreError::TypeMismatch(_))
        ));
        assert_eq!(prompt.asked(), 0);
    }

    #[test]
    fn test_autogenerated_passphrase_unlocks() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);

        let prompt = ScriptedPrompt::new(&[""]);
        let created = store.create(CreateRequest::default(), &prompt).unwrap();
        let shown = prompt.shown();
        assert_eq!(shown.len(), 1);

        let prompt = ScriptedPrompt::new(&[shown[0].as_str()]);
        assert!(store.unlock(created.id, AccessRequest::Passphrase(&prompt)).is_ok());
    }

    #[test]
    fn test_duplicate_alias_leaves_store_unchanged() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);
        create_keyed(&mut store, Some("main"));

        let prompt = ScriptedPrompt::new(&["pw", "pw"]);
        let result = store.create(
            CreateRequest {
                alias: Some("main".to_string()),
                ..CreateRequest::default()
            },
            &prompt,
        );

        assert!(matches!(result, Err(KeystoreError::AlreadyExists(_))));
        assert_eq!(store.len(), 1);
        assert_eq!(store.next_id().unwrap(), 2);
        assert_eq!(prompt.asked(), 0);
    }

    #[test]
    fn test_failed_create_leaves_store_unchanged() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);

        let prompt = ScriptedPrompt::new(&["one", "two"]);
        let result = store.create(CreateRequest::default(), &prompt);

        assert!(matches!(result, Err(KeystoreError::PassphraseMismatch)));
        assert!(store.is_empty());
        assert_eq!(store.next_id().unwrap(), 1);
    }

    #[test]
    fn test_restoring_same_seed_twice_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);
        let recipient = X25519Identity::generate().to_public().to_string();
        let restore = || CreateRequest {
            seed: Some(SecretBytes::new(vec![5u8; 32])),
            protection: ProtectionSpec::Recipients(RecipientSpec::Literal(recipient.clone())),
            ..CreateRequest::default()
        };

        let prompt = ScriptedPrompt::new(&[]);
        let first = store.create(restore(), &prompt).unwrap();
        assert_eq!(first.seed.expose(), &[5u8; 32]);

        assert!(matches!(
            store.create(restore(), &prompt),
            Err(KeystoreError::AlreadyExists(_))
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_delete_then_create_does_not_reuse_id() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);
        create_keyed(&mut store, Some("a"));
        create_keyed(&mut store, Some("b"));
        store.persist().unwrap();

        assert_eq!(store.delete(&RecordRef::Id(1)).unwrap(), 1);
        let remaining: Vec<(u64, Option<&str>)> =
            store.records().iter().map(|r| (r.id(), r.alias())).collect();
        assert_eq!(remaining, vec![(2, Some("b"))]);

        assert_eq!(create_keyed(&mut store, None), 3);
    }

    #[test]
    fn test_deleting_highest_id_does_not_reuse_it() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);
        create_keyed(&mut store, None);
        create_keyed(&mut store, None);

        store.delete(&RecordRef::Id(2)).unwrap();
        assert_eq!(create_keyed(&mut store, None), 3);
    }

    #[test]
    fn test_delete_by_alias_and_missing_target() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);
        create_keyed(&mut store, Some("spare"));
        create_keyed(&mut store, None);

        assert_eq!(store.delete(&RecordRef::Alias("spare".to_string())).unwrap(), 1);
        assert!(matches!(
            store.delete(&RecordRef::Alias("spare".to_string())),
            Err(KeystoreError::NotFound(_))
        ));
        assert!(matches!(
            store.delete(&RecordRef::Id(42)),
            Err(KeystoreError::NotFound(_))
        ));

        let reloaded = Store::load(store.path()).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.records()[0].id(), 2);
    }

    #[test]
    fn test_resolve_by_id_and_alias() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);
        create_keyed(&mut store, None);
        let savings = create_keyed(&mut store, Some("savings"));

        assert_eq!(store.resolve(&RecordRef::Alias("savings".to_string())).unwrap(), savings);
        assert_eq!(store.resolve(&RecordRef::Id(1)).unwrap(), 1);
        assert!(matches!(
            store.resolve(&RecordRef::Alias("missing".to_string())),
            Err(KeystoreError::NotFound(_))
        ));
        assert!(matches!(
            store.resolve(&RecordRef::Id(7)),
            Err(KeystoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_rename() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);
        let first = create_keyed(&mut store, Some("a"));
        let second = create_keyed(&mut store, Some("b"));

        assert!(matches!(
            store.rename(second, "a"),
            Err(KeystoreError::AlreadyExists(_))
        ));
        assert!(matches!(store.rename(99, "z"), Err(KeystoreError::NotFound(_))));

        store.rename(first, "a").unwrap();
        store.rename(second, "savings").unwrap();
        store.rename(first, "").unwrap();

        let reloaded = Store::load(store.path()).unwrap();
        assert_eq!(reloaded.find_by_id(first).unwrap().alias(), None);
        assert_eq!(reloaded.find_by_alias("savings").unwrap().id(), second);
    }

    #[test]
    fn test_rotate_passphrase() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);
        let id = create_with_passphrase(&mut store, "old", Some("main"));
        let address = store.find_by_id(id).unwrap().address().to_string();
        store.persist().unwrap();

        let prompt = ScriptedPrompt::new(&["old", "new", "new"]);
        store.rotate_passphrase(id, &prompt).unwrap();
        assert_eq!(prompt.asked(), 3);

        let reloaded = Store::load(store.path()).unwrap();
        let record = reloaded.find_by_id(id).unwrap();
        assert_eq!(record.address(), address);
        assert_eq!(record.alias(), Some("main"));

        let old = ScriptedPrompt::new(&["old"]);
        assert!(matches!(
            reloaded.unlock(id, AccessRequest::Passphrase(&old)),
            Err(KeystoreError::IncorrectIdentity)
        ));
        let new = ScriptedPrompt::new(&["new"]);
        assert!(reloaded.unlock(id, AccessRequest::Passphrase(&new)).is_ok());
    }

    #[test]
    fn test_rotate_identity_record_is_type_mismatch_and_file_untouched() {
        let dir = TempDir::new().unwrap();
        let key_file = identity_file(&dir);
        let mut store = open_store(&dir);
        let id = create_with_identity(&mut store, &key_file);
        store.persist().unwrap();
        let before = std::fs::read(store.path()).unwrap();

        let prompt = ScriptedPrompt::new(&["x", "y", "y"]);
        assert!(matches!(
            store.rotate_passphrase(id, &prompt),
            Err(KeystoreError::TypeMismatch(_))
        ));
        assert_eq!(prompt.asked(), 0);
        assert_eq!(std::fs::read(store.path()).unwrap(), before);
    }

    #[test]
    fn test_persist_and_reload_preserves_records() {
        let dir = TempDir::new().unwrap();
        let key_file = identity_file(&dir);
        let mut store = open_store(&dir);
        create_with_passphrase(&mut store, "pw", Some("first"));
        create_with_identity(&mut store, &key_file);
        store.persist().unwrap();

        let reloaded = Store::load(store.path()).unwrap();
        let summary: Vec<(u64, ProtectionType, Option<&str>)> = reloaded
            .records()
            .iter()
            .map(|r| (r.id(), r.protection(), r.alias()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (1, ProtectionType::Passphrase, Some("first")),
                (2, ProtectionType::Identity, None),
            ]
        );
        assert_eq!(reloaded.records()[0].address(), store.records()[0].address());
    }

    #[test]
    fn test_duplicate_ids_on_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet.json");
        std::fs::write(
            &path,
            r#"[{"id":1,"address":"a","armor":"x"},{"id":1,"address":"b","armor":"y"}]"#,
        )
        .unwrap();

        assert!(matches!(Store::load(&path), Err(KeystoreError::ParseError(_))));
    }

    #[test]
    fn test_duplicate_aliases_and_addresses_on_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet.json");

        std::fs::write(
            &path,
            r#"[{"id":1,"address":"a","armor":"x","alias":"main"},
                {"id":2,"address":"b","armor":"y","alias":"main"}]"#,
        )
        .unwrap();
        let err = Store::load(&path).unwrap_err();
        assert!(matches!(&err, KeystoreError::ParseError(msg) if msg.contains("alias 'main'")));

        std::fs::write(
            &path,
            r#"[{"id":1,"address":"a","armor":"x"},{"id":2,"address":"a","armor":"y"}]"#,
        )
        .unwrap();
        let err = Store::load(&path).unwrap_err();
        assert!(matches!(&err, KeystoreError::ParseError(msg) if msg.contains("address a")));

        // Missing and empty aliases never collide
        std::fs::write(
            &path,
            r#"[{"id":1,"address":"a","armor":"x","alias":""},
                {"id":2,"address":"b","armor":"y","alias":""},
                {"id":3,"address":"c","armor":"z"}]"#,
        )
        .unwrap();
        assert_eq!(Store::load(&path).unwrap().len(), 3);
    }

    #[test]
    fn test_next_id_follows_loaded_max() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet.json");
        std::fs::write(
            &path,
            r#"[{"id":4,"address":"a","armor":"x"},{"id":9,"address":"b","armor":"y"}]"#,
        )
        .unwrap();

        assert_eq!(Store::load(&path).unwrap().next_id().unwrap(), 10);
    }

    #[test]
    fn test_exhausted_ids_refuse_create() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet.json");
        std::fs::write(
            &path,
            format!(r#"[{{"id":{},"address":"a","armor":"x"}}]"#, u64::MAX),
        )
        .unwrap();

        let mut store = Store::load(&path).unwrap();
        assert!(matches!(store.next_id(), Err(KeystoreError::AlreadyExists(_))));

        let prompt = ScriptedPrompt::new(&["pw", "pw"]);
        let result = store.create(CreateRequest::default(), &prompt);
        assert!(matches!(result, Err(KeystoreError::AlreadyExists(_))));
        assert_eq!(store.len(), 1);
        assert_eq!(prompt.asked(), 0);
        assert!(format!("{:?}", store).contains("next_id: None"));
    }

    #[test]
    fn test_second_unlock_of_same_record_is_busy() {
        let dir = TempDir::new().unwrap();
        let key_file = identity_file(&dir);
        let mut store = open_store(&dir);
        let id = create_with_identity(&mut store, &key_file);

        let prompt = ScriptedPrompt::new(&[]);
        let access = || AccessRequest::Identities(resolve_identities(&key_file, &prompt).unwrap());

        let held = store.unlock(id, access()).unwrap();
        assert!(matches!(store.unlock(id, access()), Err(KeystoreError::Busy(_))));
        drop(held);
        assert!(store.unlock(id, access()).is_ok());
    }

    #[test]
    fn test_concurrent_writer_is_conflict() {
        let dir = TempDir::new().unwrap();
        let mut first = open_store(&dir);
        let mut second = open_store(&dir);

        create_keyed(&mut first, None);
        first.persist().unwrap();

        create_keyed(&mut second, None);
        assert!(matches!(second.persist(), Err(KeystoreError::Conflict(_))));

        let on_disk = Store::load(first.path()).unwrap();
        assert_eq!(on_disk.len(), 1);
        assert_eq!(on_disk.records()[0].address(), first.records()[0].address());
    }

    #[test]
    fn test_failed_rename_persist_restores_alias() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);
        let id = create_keyed(&mut store, Some("before"));
        store.persist().unwrap();

        std::fs::write(store.path(), "[]").unwrap();

        assert!(matches!(store.rename(id, "after"), Err(KeystoreError::Conflict(_))));
        assert_eq!(store.find_by_id(id).unwrap().alias(), Some("before"));
    }

    #[test]
    fn test_write_failure_after_lock_keeps_file_and_memory() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);
        let id = create_keyed(&mut store, Some("before"));
        store.persist().unwrap();
        let before = std::fs::read(store.path()).unwrap();

        // Lock and fingerprint checks pass; writing the temp file does not
        let blocker = file::temp_path(store.path());
        std::fs::create_dir(&blocker).unwrap();

        assert!(matches!(store.rename(id, "after"), Err(KeystoreError::Io(_))));
        assert_eq!(store.find_by_id(id).unwrap().alias(), Some("before"));

        assert!(matches!(store.delete(&RecordRef::Id(id)), Err(KeystoreError::Io(_))));
        assert_eq!(store.len(), 1);
        assert_eq!(std::fs::read(store.path()).unwrap(), before);

        std::fs::remove_dir(&blocker).unwrap();
        store.rename(id, "after").unwrap();
        assert_eq!(Store::load(store.path()).unwrap().records()[0].alias(), Some("after"));
    }

    #[test]
    fn test_failed_rotation_write_keeps_old_passphrase() {
        let dir = TempDir::new().unwrap();
        let mut store = open_store(&dir);
        let id = create_with_passphrase(&mut store, "old", None);
        store.persist().unwrap();
        let armor = store.find_by_id(id).unwrap().armor().to_string();
        let before = std::fs::read(store.path()).unwrap();

        std::fs::create_dir(file::temp_path(store.path())).unwrap();

        let prompt = ScriptedPrompt::new(&["old", "new", "new"]);
        assert!(matches!(
            store.rotate_passphrase(id, &prompt),
            Err(KeystoreError::Io(_))
        ));
        assert_eq!(store.find_by_id(id).unwrap().armor(), armor);
        assert_eq!(std::fs::read(store.path()).unwrap(), before);
    }
}
