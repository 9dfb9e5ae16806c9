//! Subcommand handlers

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use keystore_core::envelope::keys::encode_identity;
use keystore_core::resolver::{resolve_identities, write_identity_file};
use keystore_core::{
    passphrase_for_encryption, AccessRequest, CreateRequest, Identity, ProtectionSpec,
    RecipientSpec, RecordRef, SecretBytes, SecretString, Settings, Store, X25519Identity,
};

use crate::prompt::{read_seed, TerminalPrompt};

fn protection_spec(recipients: Option<RecipientSpec>) -> ProtectionSpec {
    recipients.map_or(ProtectionSpec::Passphrase, ProtectionSpec::Recipients)
}

pub fn create(
    store: &mut Store,
    seed: Option<SecretBytes>,
    alias: Option<String>,
    recipients: Option<RecipientSpec>,
) -> Result<()> {
    let restoring = seed.is_some();
    let request = CreateRequest {
        seed,
        protection: protection_spec(recipients),
        alias,
    };

    let created = store
        .create(request, &TerminalPrompt)
        .context("Failed to create wallet")?;
    store.persist().context("Failed to save store")?;

    println!("Wallet {} ({})", created.id, created.protection);
    println!("Address: {}", created.address);
    if !restoring {
        let seed = SecretString::new(hex::encode(created.seed.expose()));
        println!("Seed: {}", seed.expose());
        println!("Store the seed safely, it will not be shown again.");
    }
    Ok(())
}

pub fn restore(
    store: &mut Store,
    seed: Option<String>,
    alias: Option<String>,
    recipients: Option<RecipientSpec>,
) -> Result<()> {
    let seed = match seed {
        Some(seed) => SecretString::new(seed),
        None => read_seed()?,
    };
    let bytes = hex::decode(seed.expose().trim()).context("Seed must be hex")?;

    create(store, Some(SecretBytes::new(bytes)), alias, recipients)
}

pub fn passwd(store: &mut Store, target: RecordRef) -> Result<()> {
    let id = store.resolve(&target)?;
    store
        .rotate_passphrase(id, &TerminalPrompt)
        .with_context(|| format!("Failed to change passphrase of wallet {}", id))?;
    println!("Passphrase of wallet {} changed", id);
    Ok(())
}

pub fn rename(store: &mut Store, target: RecordRef, new_alias: &str) -> Result<()> {
    let id = store.resolve(&target)?;
    store
        .rename(id, new_alias)
        .with_context(|| format!("Failed to rename wallet {}", id))?;
    Ok(())
}

pub fn delete(store: &mut Store, target: RecordRef) -> Result<()> {
    let removed = store
        .delete(&target)
        .with_context(|| format!("Failed to delete wallet with {}", target))?;
    println!("Deleted {} wallet(s)", removed);
    Ok(())
}

pub fn list(store: &Store) -> Result<()> {
    for record in store.records() {
        println!(
            "{}\t{}\t{}\t{}",
            record.id(),
            record.alias().unwrap_or("-"),
            record.protection(),
            record.address()
        );
    }
    Ok(())
}

pub fn show(store: &Store, target: RecordRef, identity_files: &[PathBuf]) -> Result<()> {
    let id = store.resolve(&target)?;
    let prompt = TerminalPrompt;

    let access = if identity_files.is_empty() {
        AccessRequest::Passphrase(&prompt)
    } else {
        let mut identities: Vec<Identity<'_>> = Vec::new();
        for path in identity_files {
            identities.extend(
                resolve_identities(path, &prompt)
                    .with_context(|| format!("Failed to read identity file {:?}", path))?,
            );
        }
        AccessRequest::Identities(identities)
    };

    let unlocked = store
        .unlock(id, access)
        .with_context(|| format!("Failed to unlock wallet {}", id))?;

    let seed = SecretString::new(hex::encode(unlocked.seed().expose()));
    println!("Wallet {}", unlocked.id());
    println!("Address: {}", unlocked.address());
    println!("Public key: {}", hex::encode(unlocked.account().public_key()));
    println!("Seed: {}", seed.expose());
    Ok(())
}

pub fn keygen(output: Option<&Path>, protect: bool, settings: &Settings) -> Result<()> {
    let identity = X25519Identity::generate();
    let recipient = identity.to_public();

    let Some(path) = output else {
        let encoded = encode_identity(&identity);
        println!("# public key: {}", recipient);
        println!("{}", encoded.expose());
        return Ok(());
    };

    let passphrase = if protect {
        Some(passphrase_for_encryption(
            &TerminalPrompt,
            settings.generated_passphrase_words,
        )?)
    } else {
        None
    };
    write_identity_file(path, &identity, passphrase)
        .with_context(|| format!("Failed to write identity file {:?}", path))?;

    eprintln!("Public key: {}", recipient);
    Ok(())
}
