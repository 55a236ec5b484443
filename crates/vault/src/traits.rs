//! Cipher trait for swappable authenticated encryption backends.

use crate::error::Result;

/// Authenticated encryption with a caller-supplied 256-bit key.
pub trait Cipher: Send + Sync {
    /// Nonce length this cipher prepends to its output.
    fn nonce_len(&self) -> usize;

    /// Encrypt `plaintext` with `key`.
    ///
    /// Returns `[nonce || ciphertext || tag]`.
    fn encrypt(&self, key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt a blob previously produced by [`encrypt`](Self::encrypt).
    fn decrypt(&self, key: &[u8; 32], sealed: &[u8]) -> Result<Vec<u8>>;
}
