use lectern_common::FromMessage;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing base URL or client ID; raised before any network I/O.
    #[error("invalid OAuth configuration: {0}")]
    Config(String),

    /// Callback `state` did not match the one issued for this attempt.
    #[error("OAuth state mismatch: possible CSRF attack, restart the login")]
    CsrfMismatch,

    #[error("authorization code missing from callback")]
    MissingCode,

    #[error("authorization code required")]
    CodeRequired,

    /// The authorization server denied the request (`error=` on the callback).
    #[error("authorization denied: {0}")]
    Denied(String),

    #[error("token endpoint returned {status}: {body}")]
    Endpoint { status: u16, body: String },

    #[error("authorization code exchange failed: {source}")]
    Exchange {
        #[source]
        source: Box<Error>,
    },

    #[error("token refresh failed: {source}; run `lectern auth login` again")]
    Refresh {
        #[source]
        source: Box<Error>,
    },

    #[error("no refresh token available; run `lectern auth login` to re-authenticate")]
    ReauthRequired,

    #[error("{0} timed out")]
    TimedOut(&'static str),

    #[error("authentication cancelled")]
    Cancelled,

    #[error("no stored token for instance {0}")]
    NotFound(String),

    #[error("invalid instance name: {0:?}")]
    InvalidInstanceName(String),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error(transparent)]
    Vault(#[from] lectern_vault::VaultError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Url(#[from] url::ParseError),

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    pub(crate) fn exchange(source: Error) -> Self {
        Self::Exchange {
            source: Box::new(source),
        }
    }

    pub(crate) fn refresh(source: Error) -> Self {
        Self::Refresh {
            source: Box::new(source),
        }
    }

    /// True for a normal "nothing stored" miss, as opposed to a backend failure.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

lectern_common::impl_context!();
