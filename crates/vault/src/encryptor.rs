//! Identity-bound encryption service: salt, derive, seal.

use std::sync::Arc;

use crate::{
    error::{Result, VaultError},
    gcm::{Aes256GcmCipher, NONCE_LEN, TAG_LEN},
    identity::{IdentityProvider, SystemIdentity},
    kdf::{self, SALT_LEN},
    traits::Cipher,
};

/// Smallest blob that can possibly decrypt: salt, nonce and an empty-message tag.
pub const MIN_BLOB_LEN: usize = SALT_LEN + NONCE_LEN + TAG_LEN;

/// Encrypts and decrypts blobs with a key derived from machine and user identity.
///
/// Generic over [`Cipher`] but defaults to [`Aes256GcmCipher`]. Holds no key
/// material between calls.
pub struct Encryptor<C: Cipher = Aes256GcmCipher> {
    cipher: C,
    identity: Arc<dyn IdentityProvider>,
}

impl Encryptor<Aes256GcmCipher> {
    /// Encryptor bound to the running machine and user.
    pub fn new() -> Self {
        Self::with_identity(Arc::new(SystemIdentity))
    }

    /// Encryptor bound to a caller-supplied identity.
    pub fn with_identity(identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            cipher: Aes256GcmCipher,
            identity,
        }
    }
}

impl Default for Encryptor<Aes256GcmCipher> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Cipher> Encryptor<C> {
    /// Encryptor with a custom cipher.
    pub fn with_cipher(cipher: C, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { cipher, identity }
    }

    /// Seal `plaintext` into `salt || nonce || ciphertext+tag`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let salt = kdf::generate_salt()?;
        let key = kdf::derive_key(&self.identity.secret()?, &salt);
        let sealed = self.cipher.encrypt(&key, plaintext)?;

        let mut blob = Vec::with_capacity(SALT_LEN + sealed.len());
        blob.extend_from_slice(&salt);
        blob.extend_from_slice(&sealed);
        Ok(blob)
    }

    /// Open a blob produced by [`encrypt`](Self::encrypt) on this machine by this user.
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>> {
        let min = SALT_LEN + self.cipher.nonce_len() + TAG_LEN;
        if blob.len() < min {
            return Err(VaultError::TooShort {
                len: blob.len(),
                min,
            });
        }

        let (salt, sealed) = blob.split_at(SALT_LEN);
        let key = kdf::derive_key(&self.identity.secret()?, salt);
        let plaintext = self.cipher.decrypt(&key, sealed);

        #[cfg(feature = "tracing")]
        {
            if plaintext.is_err() {
                tracing::warn!(len = blob.len(), "blob failed authentication");
            }
        }

        plaintext
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticIdentity;

    fn encryptor(machine: &str, user: &str) -> Encryptor {
        Encryptor::with_identity(Arc::new(StaticIdentity::new(machine, user)))
    }

    #[test]
    fn round_trip() {
        let enc = encryptor("machine-1", "alice");
        let blob = enc.encrypt(b"{\"access_token\":\"abc\"}").unwrap();
        assert_eq!(blob.len(), MIN_BLOB_LEN + 22);
        assert_eq!(enc.decrypt(&blob).unwrap(), b"{\"access_token\":\"abc\"}");
    }

    #[test]
    fn empty_plaintext_round_trip() {
        let enc = encryptor("machine-1", "alice");
        let blob = enc.encrypt(b"").unwrap();
        assert_eq!(blob.len(), MIN_BLOB_LEN);
        assert!(enc.decrypt(&blob).unwrap().is_empty());
    }

    #[test]
    fn large_plaintext_round_trip() {
        let enc = encryptor("machine-1", "alice");
        let plaintext = vec![0xAB; 1024 * 1024 + 7];
        let blob = enc.encrypt(&plaintext).unwrap();
        assert_eq!(enc.decrypt(&blob).unwrap(), plaintext);
    }

    #[test]
    fn identical_plaintexts_produce_different_blobs() {
        let enc = encryptor("machine-1", "alice");
        let a = enc.encrypt(b"same").unwrap();
        let b = enc.encrypt(b"same").unwrap();
        assert_ne!(a[..SALT_LEN], b[..SALT_LEN]);
        assert_ne!(a, b);
    }

    #[test]
    fn corrupting_any_nonce_or_ciphertext_byte_fails() {
        let enc = encryptor("machine-1", "alice");
        let blob = enc.encrypt(b"refresh-me").unwrap();
        let last = blob.len() - 1;
        // first/last nonce byte, first ciphertext byte, first/last tag byte
        let positions = [
            SALT_LEN,
            SALT_LEN + NONCE_LEN - 1,
            SALT_LEN + NONCE_LEN,
            last - TAG_LEN + 1,
            last,
        ];
        for i in positions {
            let mut tampered = blob.clone();
            tampered[i] ^= 0x80;
            assert!(enc.decrypt(&tampered).is_err(), "byte {i} went undetected");
        }
    }

    #[test]
    fn corrupting_salt_fails() {
        let enc = encryptor("machine-1", "alice");
        let mut blob = enc.encrypt(b"token").unwrap();
        blob[3] ^= 0x01;
        assert!(enc.decrypt(&blob).is_err());
    }

    #[test]
    fn short_blobs_fail_without_panicking() {
        let enc = encryptor("machine-1", "alice");
        for len in 0..MIN_BLOB_LEN {
            let result = enc.decrypt(&vec![0u8; len]);
            assert!(matches!(result, Err(VaultError::TooShort { .. })), "len {len}");
        }
    }

    #[test]
    fn blobs_do_not_move_between_machines_or_users() {
        let blob = encryptor("machine-1", "alice").encrypt(b"token").unwrap();
        assert!(encryptor("machine-2", "alice").decrypt(&blob).is_err());
        assert!(encryptor("machine-1", "bob").decrypt(&blob).is_err());
    }

    #[test]
    fn missing_identity_refuses_to_encrypt() {
        let enc = encryptor("", "alice");
        assert!(matches!(
            enc.encrypt(b"token"),
            Err(VaultError::IdentityUnavailable(_))
        ));
    }
}
