use {
    keyring::Entry,
    secrecy::ExposeSecret,
    tracing::{debug, warn},
};

use super::{TokenStore, validate_instance_name};
use crate::{Error, Result, types::OAuthToken};

/// Keyring service every entry is filed under.
pub const KEYRING_SERVICE: &str = "lectern";

/// Stores tokens in the OS credential store (Keychain, Secret Service,
/// Credential Manager) as compact JSON, one entry per instance.
#[derive(Debug, Clone)]
pub struct KeyringTokenStore {
    service: String,
}

impl KeyringTokenStore {
    pub fn new() -> Self {
        Self::with_service(KEYRING_SERVICE)
    }

    /// Use a different service name, mostly to keep tests apart from real entries.
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, instance: &str) -> Result<Entry> {
        validate_instance_name(instance)?;
        Ok(Entry::new(&self.service, instance)?)
    }
}

impl Default for KeyringTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStore for KeyringTokenStore {
    fn save(&self, instance: &str, token: &OAuthToken) -> Result<()> {
        let json = serde_json::to_string(token)?;
        self.entry(instance)?.set_password(&json).inspect_err(|e| {
            warn!(instance, error = %e, "keyring write failed");
        })?;
        debug!(instance, "token saved to keyring");
        Ok(())
    }

    fn load(&self, instance: &str) -> Result<OAuthToken> {
        match self.entry(instance)?.get_password() {
            Ok(json) => {
                let token: OAuthToken = serde_json::from_str(&json)?;
                if token.access_token.expose_secret().is_empty() {
                    return Err(Error::message("stored token has no access token"));
                }
                Ok(token)
            },
            Err(keyring::Error::NoEntry) => Err(Error::NotFound(instance.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, instance: &str) -> Result<()> {
        match self.entry(instance)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => {
                debug!(instance, "token removed from keyring");
                Ok(())
            },
            Err(e) => Err(e.into()),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    // The mock builder hands out independent in-memory credentials, so every
    // `Entry` starts empty and nothing written survives past its entry.
    fn mock_store() -> KeyringTokenStore {
        keyring::set_default_credential_builder(keyring::mock::default_credential_builder());
        KeyringTokenStore::with_service("lectern-test")
    }

    #[test]
    fn missing_entry_is_not_found() {
        let store = mock_store();
        let err = store.load("school").unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(err, Error::NotFound(name) if name == "school"));
        assert!(!store.exists("school"));
    }

    #[test]
    fn delete_of_missing_entry_succeeds() {
        let store = mock_store();
        store.delete("school").unwrap();
        store.delete("school").unwrap();
    }

    #[test]
    fn save_writes_through_the_credential_store() {
        let store = mock_store();
        store
            .save("school", &OAuthToken::new("acc").with_refresh_token("ref"))
            .unwrap();
    }

    #[test]
    fn rejects_invalid_instance_names() {
        let store = mock_store();
        assert!(matches!(
            store.load("../evil"),
            Err(Error::InvalidInstanceName(_))
        ));
        assert!(matches!(
            store.save("", &OAuthToken::new("acc")),
            Err(Error::InvalidInstanceName(_))
        ));
    }
}
