//! AES-256-GCM implementation of the [`Cipher`] trait.

#[allow(deprecated)] // upstream generic-array 0.x deprecation
use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};

use crate::{
    error::{Result, VaultError},
    kdf::random_bytes,
    traits::Cipher,
};

/// Nonce size for AES-GCM (96 bits).
pub const NONCE_LEN: usize = 12;

/// GCM authentication tag size.
pub const TAG_LEN: usize = 16;

/// AES-256-GCM AEAD cipher.
///
/// Output layout: `[nonce: 12 bytes][ciphertext + GCM tag: N + 16 bytes]`.
pub struct Aes256GcmCipher;

impl Cipher for Aes256GcmCipher {
    fn nonce_len(&self) -> usize {
        NONCE_LEN
    }

    #[allow(deprecated)]
    fn encrypt(&self, key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| VaultError::CipherError(format!("invalid key: {e}")))?;

        let nonce_bytes: [u8; NONCE_LEN] = random_bytes()?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| VaultError::CipherError(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    #[allow(deprecated)]
    fn decrypt(&self, key: &[u8; 32], sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(VaultError::TooShort {
                len: sealed.len(),
                min: NONCE_LEN + TAG_LEN,
            });
        }

        let (nonce_bytes, ct) = sealed.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| VaultError::CipherError(format!("invalid key: {e}")))?;

        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ct)
            .map_err(|_| VaultError::CipherError("authentication failed".to_string()))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let key = [0x42u8; 32];
        let sealed = Aes256GcmCipher.encrypt(&key, b"hello lectern").unwrap();
        assert_eq!(sealed.len(), NONCE_LEN + 13 + TAG_LEN);
        let opened = Aes256GcmCipher.decrypt(&key, &sealed).unwrap();
        assert_eq!(opened, b"hello lectern");
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = Aes256GcmCipher.encrypt(&[0x42u8; 32], b"secret").unwrap();
        assert!(Aes256GcmCipher.decrypt(&[0x43u8; 32], &sealed).is_err());
    }

    #[test]
    fn tampered_nonce_fails() {
        let key = [0x42u8; 32];
        let mut sealed = Aes256GcmCipher.encrypt(&key, b"secret").unwrap();
        sealed[0] ^= 0x01;
        assert!(matches!(
            Aes256GcmCipher.decrypt(&key, &sealed),
            Err(VaultError::CipherError(_))
        ));
    }

    #[test]
    fn too_short_fails() {
        let result = Aes256GcmCipher.decrypt(&[0x42u8; 32], &[0u8; 27]);
        assert!(matches!(result, Err(VaultError::TooShort { len: 27, .. })));
    }

    #[test]
    fn nonces_differ_between_calls() {
        let key = [0x42u8; 32];
        let a = Aes256GcmCipher.encrypt(&key, b"same input").unwrap();
        let b = Aes256GcmCipher.encrypt(&key, b"same input").unwrap();
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
        assert_ne!(a, b);
    }
}
