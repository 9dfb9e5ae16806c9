//! Account derivation from a secret seed
//!
//! The store never interprets seeds itself; it asks a [`DeriveAccount`]
//! implementation for the public key and address.

use base64::{engine::general_purpose::STANDARD, Engine};
use ed25519_dalek::{Signer, SigningKey};
use rand::{rngs::OsRng, RngCore};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::SecretBytes;
use crate::error::{KeystoreError, Result};

pub const SEED_LEN: usize = 32;

/// Version byte prepended to the public key hash of every address
pub const ADDRESS_VERSION: u8 = 0x35;

const ADDRESS_HASH_LEN: usize = 20;
const CHECKSUM_LEN: usize = 4;

/// Maps a seed to a usable account
pub trait DeriveAccount {
    fn derive_account(&self, seed: &[u8]) -> Result<Account>;
}

/// Ed25519 keys with Base58Check addresses
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Deriver;

impl DeriveAccount for Ed25519Deriver {
    fn derive_account(&self, seed: &[u8]) -> Result<Account> {
        let bytes: &[u8; SEED_LEN] = seed.try_into().map_err(|_| {
            KeystoreError::parse(format!(
                "seed must be {} bytes, got {}",
                SEED_LEN,
                seed.len()
            ))
        })?;

        let signing_key = SigningKey::from_bytes(bytes);
        let public_key = signing_key.verifying_key().to_bytes();

        Ok(Account {
            address: address_for(&public_key),
            public_key,
            seed: SecretBytes::new(seed.to_vec()),
            signing_key,
        })
    }
}

/// Base58Check address of a public key
pub fn address_for(public_key: &[u8]) -> String {
    let digest = Sha256::digest(public_key);

    let mut payload = Vec::with_capacity(1 + ADDRESS_HASH_LEN + CHECKSUM_LEN);
    payload.push(ADDRESS_VERSION);
    payload.extend_from_slice(&digest[..ADDRESS_HASH_LEN]);

    let checksum = Sha256::digest(Sha256::digest(&payload));
    payload.extend_from_slice(&checksum[..CHECKSUM_LEN]);

    bs58::encode(payload).into_string()
}

/// Fresh random seed for a new account
pub fn generate_seed() -> SecretBytes {
    let mut seed = vec![0u8; SEED_LEN];
    OsRng.fill_bytes(&mut seed);
    SecretBytes::new(seed)
}

/// Account JSON sealed by earlier releases instead of a bare seed
#[derive(Deserialize, Zeroize, ZeroizeOnDrop)]
struct LegacyAccount {
    #[serde(rename = "PrivateKey")]
    private_key: String,
}

/// Seed held in a decrypted envelope.
///
/// Current records hold the raw seed. Older ones hold account JSON whose
/// base64 `PrivateKey` starts with the seed.
pub fn seed_from_plaintext(plaintext: &SecretBytes) -> Result<SecretBytes> {
    if plaintext.expose().first() != Some(&b'{') {
        return Ok(SecretBytes::new(plaintext.expose().to_vec()));
    }

    let legacy: LegacyAccount = serde_json::from_slice(plaintext.expose())
        .map_err(|_| KeystoreError::parse("sealed account JSON has no PrivateKey"))?;
    let mut private_key = STANDARD
        .decode(legacy.private_key.as_bytes())
        .map_err(|_| KeystoreError::parse("sealed PrivateKey is not base64"))?;

    let seed = private_key.get(..SEED_LEN).map(<[u8]>::to_vec);
    private_key.zeroize();
    seed.map(SecretBytes::new).ok_or_else(|| {
        KeystoreError::parse(format!("sealed PrivateKey is shorter than {} bytes", SEED_LEN))
    })
}

/// A derived account. The signing key and seed are wiped on drop.
pub struct Account {
    public_key: [u8; 32],
    address: String,
    seed: SecretBytes,
    signing_key: SigningKey,
}

impl Account {
    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn seed(&self) -> &SecretBytes {
        &self.seed
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.address)
            .field("seed", &"[REDACTED]")
            .finish()
    }
}
