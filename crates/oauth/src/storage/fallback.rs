use tracing::{debug, warn};

use super::TokenStore;
use crate::{Result, types::OAuthToken};

/// Tries `primary` first and uses `secondary` whenever the primary fails.
///
/// Once the primary has failed, the secondary's outcome is the answer.
pub struct FallbackTokenStore<P, S> {
    primary: P,
    secondary: S,
}

impl<P: TokenStore, S: TokenStore> FallbackTokenStore<P, S> {
    pub fn new(primary: P, secondary: S) -> Self {
        Self { primary, secondary }
    }

    pub fn primary(&self) -> &P {
        &self.primary
    }

    pub fn secondary(&self) -> &S {
        &self.secondary
    }
}

impl<P: TokenStore, S: TokenStore> TokenStore for FallbackTokenStore<P, S> {
    fn save(&self, instance: &str, token: &OAuthToken) -> Result<()> {
        match self.primary.save(instance, token) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(instance, error = %e, "primary token store failed, saving to fallback");
                self.secondary.save(instance, token)
            },
        }
    }

    fn load(&self, instance: &str) -> Result<OAuthToken> {
        match self.primary.load(instance) {
            Ok(token) => Ok(token),
            Err(e) => {
                if !e.is_not_found() {
                    warn!(instance, error = %e, "primary token store failed, loading from fallback");
                }
                self.secondary.load(instance)
            },
        }
    }

    fn delete(&self, instance: &str) -> Result<()> {
        let primary = self.primary.delete(instance);
        let secondary = self.secondary.delete(instance);
        match (primary, secondary) {
            (Err(e), Err(_)) => Err(e),
            (Err(e), Ok(())) | (Ok(()), Err(e)) => {
                debug!(instance, error = %e, "token delete failed in one store");
                Ok(())
            },
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    fn exists(&self, instance: &str) -> bool {
        self.primary.exists(instance) || self.secondary.exists(instance)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    use {lectern_vault::StaticIdentity, secrecy::ExposeSecret};

    use super::*;
    use crate::{Error, storage::FileTokenStore};

    #[derive(Default)]
    struct MemoryStore {
        tokens: Mutex<HashMap<String, OAuthToken>>,
    }

    impl TokenStore for MemoryStore {
        fn save(&self, instance: &str, token: &OAuthToken) -> Result<()> {
            self.tokens
                .lock()
                .unwrap()
                .insert(instance.to_string(), token.clone());
            Ok(())
        }

        fn load(&self, instance: &str) -> Result<OAuthToken> {
            self.tokens
                .lock()
                .unwrap()
                .get(instance)
                .cloned()
                .ok_or_else(|| Error::NotFound(instance.to_string()))
        }

        fn delete(&self, instance: &str) -> Result<()> {
            self.tokens.lock().unwrap().remove(instance);
            Ok(())
        }
    }

    struct FailingStore;

    impl TokenStore for FailingStore {
        fn save(&self, _: &str, _: &OAuthToken) -> Result<()> {
            Err(Error::message("backend unavailable"))
        }

        fn load(&self, _: &str) -> Result<OAuthToken> {
            Err(Error::message("backend unavailable"))
        }

        fn delete(&self, _: &str) -> Result<()> {
            Err(Error::message("backend unavailable"))
        }
    }

    #[test]
    fn failing_primary_falls_through() {
        let store = FallbackTokenStore::new(FailingStore, MemoryStore::default());
        store.save("school", &OAuthToken::new("acc")).unwrap();

        let back = store.load("school").unwrap();
        assert_eq!(back.access_token.expose_secret(), "acc");
        assert!(store.exists("school"));
        assert!(store.secondary().exists("school"));
    }

    #[test]
    fn encrypted_file_fallback_keeps_the_whole_token() {
        let tmp = tempfile::tempdir().unwrap();
        let files = FileTokenStore::with_identity(
            tmp.path(),
            Arc::new(StaticIdentity::new("machine-a", "alice")),
        );
        let store = FallbackTokenStore::new(FailingStore, files);

        store
            .save("a", &OAuthToken::new("acc-a").with_refresh_token("ref-a"))
            .unwrap();
        store.save("b", &OAuthToken::new("acc-b")).unwrap();

        let a = store.load("a").unwrap();
        assert_eq!(a.access_token.expose_secret(), "acc-a");
        assert_eq!(a.refresh_token(), Some("ref-a"));
        assert!(store.exists("a"));
        assert!(tmp.path().join("a.token.enc").exists());

        store.delete("a").unwrap();
        assert!(!store.exists("a"));
        assert!(store.load("a").unwrap_err().is_not_found());
        assert_eq!(store.load("b").unwrap().access_token.expose_secret(), "acc-b");
    }

    #[test]
    fn healthy_primary_wins() {
        let store = FallbackTokenStore::new(MemoryStore::default(), MemoryStore::default());
        store.save("school", &OAuthToken::new("acc")).unwrap();
        assert!(store.primary().exists("school"));
        assert!(!store.secondary().exists("school"));
    }

    #[test]
    fn load_misses_in_primary_check_secondary() {
        let store = FallbackTokenStore::new(MemoryStore::default(), MemoryStore::default());
        store
            .secondary()
            .save("school", &OAuthToken::new("old"))
            .unwrap();
        assert_eq!(
            store.load("school").unwrap().access_token.expose_secret(),
            "old"
        );
        assert!(store.load("other").unwrap_err().is_not_found());
    }

    #[test]
    fn delete_succeeds_if_either_store_does() {
        let store = FallbackTokenStore::new(FailingStore, MemoryStore::default());
        store.save("school", &OAuthToken::new("acc")).unwrap();
        store.delete("school").unwrap();
        assert!(!store.exists("school"));

        let broken = FallbackTokenStore::new(FailingStore, FailingStore);
        assert!(broken.delete("school").is_err());
        assert!(broken.save("school", &OAuthToken::new("acc")).is_err());
        assert!(!broken.exists("school"));
    }
}
