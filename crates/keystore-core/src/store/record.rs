//! Persisted wallet records

use std::sync::{Mutex, MutexGuard, TryLockError};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{KeystoreError, Result};

/// How a record's armor is protected
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ProtectionType {
    /// Sealed under a passphrase. Older stores tag this `SCRYPT` or leave
    /// the tag out entirely.
    #[default]
    #[serde(rename = "PASSPHRASE")]
    Passphrase,
    /// Sealed to one or more public keys
    #[serde(rename = "IDENTITY")]
    Identity,
}

/// Tags are matched case-insensitively; they are always written upper-case
impl<'de> Deserialize<'de> for ProtectionType {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let tag = String::deserialize(deserializer)?;
        match tag.to_ascii_lowercase().as_str() {
            "passphrase" | "scrypt" => Ok(ProtectionType::Passphrase),
            "identity" => Ok(ProtectionType::Identity),
            _ => Err(serde::de::Error::unknown_variant(
                &tag,
                &["PASSPHRASE", "SCRYPT", "IDENTITY"],
            )),
        }
    }
}

impl std::fmt::Display for ProtectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtectionType::Passphrase => write!(f, "PASSPHRASE"),
            ProtectionType::Identity => write!(f, "IDENTITY"),
        }
    }
}

/// One stored account: its address and the sealed seed
#[derive(Debug, Serialize, Deserialize)]
pub struct WalletRecord {
    pub(crate) id: u64,
    #[serde(rename = "type", default)]
    pub(crate) protection: ProtectionType,
    pub(crate) address: String,
    pub(crate) armor: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_as_none"
    )]
    pub(crate) alias: Option<String>,
    /// Held while the record's secret is decrypted in memory
    #[serde(skip)]
    guard: Mutex<()>,
}

fn empty_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let alias = Option::<String>::deserialize(deserializer)?;
    Ok(alias.filter(|a| !a.is_empty()))
}

impl WalletRecord {
    pub(crate) fn new(
        id: u64,
        protection: ProtectionType,
        address: String,
        armor: String,
        alias: Option<String>,
    ) -> Self {
        Self {
            id,
            protection,
            address,
            armor,
            alias,
            guard: Mutex::new(()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn protection(&self) -> ProtectionType {
        self.protection
    }

    pub fn armor(&self) -> &str {
        &self.armor
    }

    /// Take the record's guard without blocking
    pub(crate) fn try_guard(&self) -> Result<MutexGuard<'_, ()>> {
        match self.guard.try_lock() {
            Ok(guard) => Ok(guard),
            // The guard protects no data, so a panic while it was held leaves nothing torn
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => Err(KeystoreError::Busy(format!(
                "wallet {} is already unlocked",
                self.id
            ))),
        }
    }
}
