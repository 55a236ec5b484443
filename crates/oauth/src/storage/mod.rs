//! Persistence for issued tokens, keyed by LMS instance name.

mod fallback;
mod file;
mod keychain;

use std::path::PathBuf;

use {lectern_config::StorageBackend, tracing::debug};

pub use {fallback::FallbackTokenStore, file::FileTokenStore, keychain::KeyringTokenStore};

use crate::{Error, Result, types::OAuthToken};

/// A place tokens can be saved to and loaded from.
///
/// `load` of an instance with nothing stored returns [`Error::NotFound`].
pub trait TokenStore: Send + Sync {
    fn save(&self, instance: &str, token: &OAuthToken) -> Result<()>;

    fn load(&self, instance: &str) -> Result<OAuthToken>;

    fn delete(&self, instance: &str) -> Result<()>;

    fn exists(&self, instance: &str) -> bool {
        self.load(instance).is_ok()
    }
}

/// Reject names that are empty or could escape the token directory.
pub fn validate_instance_name(instance: &str) -> Result<()> {
    if instance.trim().is_empty()
        || instance.contains('/')
        || instance.contains('\\')
        || instance.contains("..")
        || instance.contains('\0')
    {
        return Err(Error::InvalidInstanceName(instance.to_string()));
    }
    Ok(())
}

/// Build the store selected by `backend`.
///
/// `Auto` prefers the OS keyring and falls back to encrypted files in `tokens_dir`.
pub fn open_token_store(backend: StorageBackend, tokens_dir: PathBuf) -> Box<dyn TokenStore> {
    debug!(?backend, dir = %tokens_dir.display(), "opening token store");
    match backend {
        StorageBackend::Keyring => Box::new(KeyringTokenStore::new()),
        StorageBackend::File => Box::new(FileTokenStore::new(tokens_dir)),
        StorageBackend::Auto => Box::new(FallbackTokenStore::new(
            KeyringTokenStore::new(),
            FileTokenStore::new(tokens_dir),
        )),
    }
}
