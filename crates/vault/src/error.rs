//! Vault error types.

/// Errors produced by encryption-at-rest operations.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// Encryption or decryption failed (tampered data, wrong key, foreign blob).
    #[error("cipher error: {0}")]
    CipherError(String),

    /// Blob is shorter than `salt + nonce + tag`.
    #[error("encrypted blob too short: {len} bytes (need at least {min})")]
    TooShort { len: usize, min: usize },

    /// No unique machine or user identity could be resolved.
    #[error("identity unavailable: {0}")]
    IdentityUnavailable(String),

    /// The OS entropy source failed.
    #[error("random number generator failed: {0}")]
    Entropy(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, VaultError>;
