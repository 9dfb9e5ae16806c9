//! Secret containers for account material
//!
//! Envelope cryptography itself comes from the `age` crate; this module only
//! holds decrypted secrets and passphrases and zeroes them on drop.

mod secure_memory;

pub use secure_memory::{SecretBytes, SecretString};
