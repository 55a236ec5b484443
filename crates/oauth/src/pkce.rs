//! PKCE verifier/challenge pairs and CSRF state tokens (RFC 7636).

use {
    base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD},
    rand::{TryRngCore, rngs::OsRng},
    sha2::{Digest, Sha256},
};

use crate::{Result, error::Context, types::PkceChallenge};

/// The only challenge method this client issues.
pub const CHALLENGE_METHOD: &str = "S256";

/// Generate a verifier from 32 OS-random bytes and its S256 challenge.
pub fn generate_pkce() -> Result<PkceChallenge> {
    let verifier = random_urlsafe()?;
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    Ok(PkceChallenge {
        verifier,
        challenge,
        method: CHALLENGE_METHOD,
    })
}

/// Generate an opaque CSRF state token.
pub fn generate_state() -> Result<String> {
    random_urlsafe()
}

fn random_urlsafe() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("OS random number generator failed")?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}
