//! A bearer-token source that refreshes shortly before expiry.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    secrecy::ExposeSecret,
    tokio::sync::Mutex,
    tracing::{debug, warn},
};

use crate::{Error, Result, storage::TokenStore, types::OAuthToken};

/// Tokens expiring within this window are refreshed before use.
pub const REFRESH_BUFFER: Duration = Duration::from_secs(5 * 60);

/// Upper bound on one refresh round trip.
pub const REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// Performs the refresh-token grant.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, token: &OAuthToken) -> Result<OAuthToken>;
}

/// Hands out a valid access token, refreshing and persisting it when it is
/// about to expire.
///
/// Callers share one source; the lock serializes them so at most one refresh
/// is in flight.
pub struct AutoRefreshTokenSource {
    current: Mutex<OAuthToken>,
    store: Arc<dyn TokenStore>,
    instance: String,
    refresher: Arc<dyn TokenRefresher>,
    refresh_timeout: Duration,
}

impl AutoRefreshTokenSource {
    pub fn new(
        token: OAuthToken,
        store: Arc<dyn TokenStore>,
        instance: impl Into<String>,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Self {
        Self {
            current: Mutex::new(token),
            store,
            instance: instance.into(),
            refresher,
            refresh_timeout: REFRESH_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Current token, refreshed first if it expires within [`REFRESH_BUFFER`].
    pub async fn token(&self) -> Result<OAuthToken> {
        let mut current = self.current.lock().await;
        if !needs_refresh(&current) {
            return Ok(current.clone());
        }
        if current.refresh_token().is_none() {
            return Err(Error::ReauthRequired);
        }

        debug!(instance = %self.instance, "access token near expiry, refreshing");
        let fresh = tokio::time::timeout(self.refresh_timeout, self.refresher.refresh(&current))
            .await
            .map_err(|_| Error::TimedOut("token refresh"))??;

        *current = fresh.clone();
        // Stores do blocking I/O (keyring, PBKDF2); keep it off the async workers.
        // The lock stays held so saves land in refresh order.
        let store = Arc::clone(&self.store);
        let instance = self.instance.clone();
        let token = fresh.clone();
        match tokio::task::spawn_blocking(move || store.save(&instance, &token)).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => {
                warn!(instance = %self.instance, error = %e, "failed to persist refreshed token");
            },
            Err(e) => {
                warn!(instance = %self.instance, error = %e, "token persistence task failed");
            },
        }
        Ok(fresh)
    }

    /// Bearer string of [`token`](Self::token).
    pub async fn access_token(&self) -> Result<String> {
        let token = self.token().await?;
        Ok(token.access_token.expose_secret().clone())
    }

    /// Whether the held token would be refreshed on next use. Never refreshes.
    pub async fn is_expired(&self) -> bool {
        needs_refresh(&*self.current.lock().await)
    }
}

fn needs_refresh(token: &OAuthToken) -> bool {
    chrono::Duration::from_std(REFRESH_BUFFER).is_ok_and(|buffer| token.expires_within(buffer))
}
