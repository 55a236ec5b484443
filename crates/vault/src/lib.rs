//! Encryption-at-rest for stored credentials using AES-256-GCM.
//!
//! The key is never stored. Every blob carries its own random salt, and the
//! key is re-derived from the machine identity, the OS username and that salt
//! via PBKDF2-HMAC-SHA256. A blob written on one machine (or by one user)
//! cannot be opened on another.
//!
//! Blob layout: `[salt: 16][nonce: 12][ciphertext + tag: N + 16]`.

pub mod encryptor;
pub mod error;
pub mod gcm;
pub mod identity;
pub mod kdf;
pub mod traits;

pub use {
    encryptor::Encryptor,
    error::{Result, VaultError},
    gcm::Aes256GcmCipher,
    identity::{IdentityProvider, MACHINE_ID_ENV, StaticIdentity, SystemIdentity},
    traits::Cipher,
};
