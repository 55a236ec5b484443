use {
    chrono::{DateTime, Duration, Utc},
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// An OAuth bearer token as issued by the LMS token endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthToken {
    #[serde(serialize_with = "serialize_secret")]
    pub access_token: Secret<String>,
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub refresh_token: Option<Secret<String>>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// When the access token stops working. `None` means it never expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl OAuthToken {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: Secret::new(access_token.into()),
            refresh_token: None,
            token_type: default_token_type(),
            expiry: None,
        }
    }

    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(Secret::new(refresh_token.into()));
        self
    }

    #[must_use]
    pub fn with_expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// The refresh token, treating an empty string as absent.
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token
            .as_ref()
            .map(|s| s.expose_secret().as_str())
            .filter(|s| !s.is_empty())
    }

    /// True once the expiry has passed.
    pub fn is_expired(&self) -> bool {
        self.expires_within(Duration::zero())
    }

    /// True if the token expires within `buffer` from now.
    pub fn expires_within(&self, buffer: Duration) -> bool {
        self.expiry.is_some_and(|exp| exp <= Utc::now() + buffer)
    }

    /// `Authorization` header value.
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token.expose_secret())
    }
}

impl std::fmt::Debug for OAuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthToken")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("token_type", &self.token_type)
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// PKCE verifier/challenge pair for one authorization round trip.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
    pub method: &'static str,
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

/// Serialize a `Secret<String>` by exposing its inner value.
/// Use only for fields that must round-trip through storage.
pub fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

/// Serialize an `Option<Secret<String>>` by exposing its inner value.
pub fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}
