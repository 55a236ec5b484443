//! PBKDF2-HMAC-SHA256 key derivation for identity → encryption key.

use {
    rand::{TryRngCore, rngs::OsRng},
    sha2::Sha256,
    zeroize::Zeroizing,
};

use crate::error::{Result, VaultError};

/// PBKDF2 iteration count.
pub const ITERATIONS: u32 = 100_000;

/// Salt length stored at the front of every blob.
pub const SALT_LEN: usize = 16;

/// Derived key length (AES-256).
pub const KEY_LEN: usize = 32;

/// Derive a 256-bit key from `secret` and `salt`.
pub fn derive_key(secret: &[u8], salt: &[u8]) -> Zeroizing<[u8; KEY_LEN]> {
    let mut output = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::pbkdf2_hmac::<Sha256>(secret, salt, ITERATIONS, output.as_mut());
    output
}

/// Fill an `N`-byte array from the OS entropy source.
pub fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| VaultError::Entropy(e.to_string()))?;
    Ok(bytes)
}

/// Generate a fresh random salt.
pub fn generate_salt() -> Result<[u8; SALT_LEN]> {
    random_bytes()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_key_deterministic() {
        let salt = b"test-salt-16byte";
        let key1 = derive_key(b"machine:alice", salt);
        let key2 = derive_key(b"machine:alice", salt);
        assert_eq!(*key1, *key2);
    }

    #[test]
    fn different_identities_different_keys() {
        let salt = b"test-salt-16byte";
        let key1 = derive_key(b"machine:alice", salt);
        let key2 = derive_key(b"machine:bob", salt);
        assert_ne!(*key1, *key2);
    }

    #[test]
    fn different_salts_different_keys() {
        let key1 = derive_key(b"machine:alice", b"salt-aaaaaaaaaaa");
        let key2 = derive_key(b"machine:alice", b"salt-bbbbbbbbbbb");
        assert_ne!(*key1, *key2);
    }

    #[test]
    fn matches_rfc_7914_vector() {
        // PBKDF2-HMAC-SHA256("passwd", "salt", 1) from RFC 7914 §11, truncated.
        let mut out = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(b"passwd", b"salt", 1, &mut out);
        assert_eq!(out[..4], [0x55, 0xac, 0x04, 0x6e]);
    }

    #[test]
    fn salts_are_fresh() {
        let a = generate_salt().unwrap();
        let b = generate_salt().unwrap();
        assert_eq!(a.len(), SALT_LEN);
        assert_ne!(a, b);
    }
}
