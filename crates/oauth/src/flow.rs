use std::{
    io::{BufRead, Write},
    sync::Arc,
    time::Duration,
};

use {
    async_trait::async_trait,
    lectern_config::{AuthConfig, InstanceConfig},
    reqwest::StatusCode,
    secrecy::{ExposeSecret, Secret},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    url::Url,
};

pub use lectern_config::FlowMode;

use crate::{
    Error, Result,
    callback_server::{CALLBACK_PATH, CallbackParams, CallbackServer},
    error::Context,
    exchange::TokenClient,
    pkce::{generate_pkce, generate_state},
    token_source::TokenRefresher,
    types::{OAuthToken, PkceChallenge},
};

/// Authorization endpoint path relative to the instance base URL.
pub const AUTHORIZE_PATH: &str = "/login/oauth2/auth";

/// Resource probed by [`OAuthFlow::validate_token`].
pub const CURRENT_USER_PATH: &str = "/api/v1/users/self";

/// Redirect URI telling the server to display the code instead of redirecting.
pub const OOB_REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";

pub const DEFAULT_CALLBACK_PORT: u16 = 8080;

/// Upper bound on one local-callback attempt.
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Inputs for one login attempt.
#[derive(Clone)]
pub struct FlowConfig {
    pub base_url: String,
    pub client_id: String,
    /// Only confidential clients have one.
    pub client_secret: Option<Secret<String>>,
    pub scopes: Vec<String>,
    pub mode: FlowMode,
    /// Defaults to [`DEFAULT_CALLBACK_PORT`].
    pub callback_port: Option<u16>,
}

impl FlowConfig {
    pub fn from_instance(instance: &InstanceConfig, auth: &AuthConfig) -> Self {
        Self {
            base_url: instance.base_url.clone(),
            client_id: instance.client_id.clone(),
            client_secret: instance.client_secret.clone(),
            scopes: auth.scopes.clone(),
            mode: auth.mode,
            callback_port: Some(auth.callback_port),
        }
    }
}

/// Where an attempt is in its round trip. Logged on each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    AwaitingUserAction,
    ExchangingCode,
    Authenticated,
    Failed,
}

/// The human side of the flow: seeing the URL and pasting codes.
pub trait Operator: Send + Sync {
    /// Show the authorization URL, optionally opening it in a browser.
    /// Failing to open a browser is not an error.
    fn present_url(&self, url: &str, open_browser: bool);

    /// Block until the operator pastes an authorization code.
    fn read_code(&self) -> std::io::Result<String>;
}

/// Talks to the operator on stderr/stdin and opens the system browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalOperator;

impl Operator for TerminalOperator {
    fn present_url(&self, url: &str, open_browser: bool) {
        eprintln!("Open this URL to authorize lectern:\n\n  {url}\n");
        if open_browser && let Err(e) = open::that_detached(url) {
            warn!(error = %e, "could not open browser");
        }
    }

    fn read_code(&self) -> std::io::Result<String> {
        eprint!("Paste the authorization code: ");
        std::io::stderr().flush()?;
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim().to_string())
    }
}

/// OAuth 2.0 authorization code flow with PKCE against one LMS instance.
///
/// The PKCE pair and CSRF state are generated once, at construction, and
/// belong to this attempt only.
pub struct OAuthFlow {
    base_url: String,
    client_id: String,
    scopes: Vec<String>,
    mode: FlowMode,
    callback_port: u16,
    redirect_uri: String,
    pkce: PkceChallenge,
    state: String,
    http: reqwest::Client,
    tokens: TokenClient,
    operator: Arc<dyn Operator>,
}

impl OAuthFlow {
    pub fn new(config: FlowConfig) -> Result<Self> {
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::Config("base URL is required".into()));
        }
        Url::parse(&base_url)?;
        if config.client_id.trim().is_empty() {
            return Err(Error::Config("client ID is required".into()));
        }

        let callback_port = config.callback_port.unwrap_or(DEFAULT_CALLBACK_PORT);
        let http = reqwest::Client::new();
        let tokens = TokenClient::new(
            http.clone(),
            &base_url,
            config.client_id.clone(),
            config.client_secret,
        );

        Ok(Self {
            redirect_uri: format!("http://localhost:{callback_port}{CALLBACK_PATH}"),
            base_url,
            client_id: config.client_id,
            scopes: config.scopes,
            mode: config.mode,
            callback_port,
            pkce: generate_pkce()?,
            state: generate_state()?,
            http,
            tokens,
            operator: Arc::new(TerminalOperator),
        })
    }

    /// Replace the terminal operator (tests, embedding).
    #[must_use]
    pub fn with_operator(mut self, operator: Arc<dyn Operator>) -> Self {
        self.operator = operator;
        self
    }

    pub fn mode(&self) -> FlowMode {
        self.mode
    }

    /// Redirect URL used by the local callback mode.
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// CSRF state issued for this attempt.
    pub fn csrf_state(&self) -> &str {
        &self.state
    }

    /// Build the authorization URL for `redirect_uri`.
    ///
    /// Carries the PKCE challenge, never the verifier.
    pub fn authorization_url(&self, redirect_uri: &str) -> Result<String> {
        let mut url = Url::parse(&format!("{}{AUTHORIZE_PATH}", self.base_url))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("state", &self.state)
            .append_pair("code_challenge", &self.pkce.challenge)
            .append_pair("code_challenge_method", self.pkce.method);

        if !self.scopes.is_empty() {
            url.query_pairs_mut()
                .append_pair("scope", &self.scopes.join(" "));
        }

        Ok(url.to_string())
    }

    /// Run the flow in the configured mode.
    pub async fn authenticate(&self, cancel: &CancellationToken) -> Result<OAuthToken> {
        transition(FlowState::Idle, self.mode);
        let result = match self.mode {
            FlowMode::Local => self.authenticate_local(cancel).await,
            FlowMode::Oob => self.authenticate_oob(cancel).await,
            FlowMode::Auto => match self.authenticate_local(cancel).await {
                Ok(token) => Ok(token),
                Err(Error::Cancelled) => Err(Error::Cancelled),
                Err(e) => {
                    warn!(error = %e, "local callback login failed, falling back to manual code entry");
                    self.authenticate_oob(cancel).await
                },
            },
        };

        match &result {
            Ok(_) => transition(FlowState::Authenticated, self.mode),
            Err(e) => {
                debug!(error = %e, "OAuth flow failed");
                transition(FlowState::Failed, self.mode);
            },
        }
        result
    }

    async fn authenticate_local(&self, cancel: &CancellationToken) -> Result<OAuthToken> {
        let mut server = CallbackServer::start(self.callback_port, CallbackParams {
            expected_state: self.state.clone(),
            verifier: self.pkce.verifier.clone(),
            redirect_uri: self.redirect_uri.clone(),
            tokens: self.tokens.clone(),
        })
        .await?;

        let result = match self.authorization_url(&self.redirect_uri) {
            Ok(url) => {
                transition(FlowState::AwaitingUserAction, FlowMode::Local);
                self.operator.present_url(&url, true);
                server.wait(cancel, ATTEMPT_TIMEOUT).await
            },
            Err(e) => Err(e),
        };

        server.shutdown().await;
        result
    }

    async fn authenticate_oob(&self, cancel: &CancellationToken) -> Result<OAuthToken> {
        let url = self.authorization_url(OOB_REDIRECT_URI)?;
        transition(FlowState::AwaitingUserAction, FlowMode::Oob);
        self.operator.present_url(&url, false);

        // The blocking read cannot be interrupted; on cancellation it is left
        // behind and the caller decides whether to exit.
        let operator = Arc::clone(&self.operator);
        let read = tokio::task::spawn_blocking(move || operator.read_code());
        let code = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            joined = read => joined.context("reading authorization code")??,
        };
        let code = code.trim();
        if code.is_empty() {
            return Err(Error::CodeRequired);
        }

        tokio::select! {
            result = self.exchange_code(code, OOB_REDIRECT_URI) => result,
            _ = cancel.cancelled() => Err(Error::Cancelled),
        }
    }

    /// Exchange an authorization code obtained for `redirect_uri`.
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<OAuthToken> {
        transition(FlowState::ExchangingCode, self.mode);
        self.tokens
            .exchange_code(code, redirect_uri, &self.pkce.verifier)
            .await
            .map_err(Error::exchange)
    }

    /// Refresh `token`, keeping its refresh token when the server omits a new one.
    pub async fn refresh_token(&self, token: &OAuthToken) -> Result<OAuthToken> {
        let refresh = token.refresh_token().ok_or(Error::ReauthRequired)?;
        let mut fresh = self.tokens.refresh(refresh).await.map_err(Error::refresh)?;
        if fresh.refresh_token().is_none() {
            fresh.refresh_token = token.refresh_token.clone();
        }
        info!("access token refreshed");
        Ok(fresh)
    }

    /// Ask the server whether `token` still works.
    ///
    /// A non-200 answer is `Ok(false)`; only transport failures are errors.
    pub async fn validate_token(&self, token: Option<&OAuthToken>) -> Result<bool> {
        let Some(token) = token else {
            return Ok(false);
        };
        if token.is_expired() {
            return Ok(false);
        }

        let resp = self
            .http
            .get(format!("{}{CURRENT_USER_PATH}", self.base_url))
            .bearer_auth(token.access_token.expose_secret())
            .send()
            .await?;
        debug!(status = resp.status().as_u16(), "token validation probe");
        Ok(resp.status() == StatusCode::OK)
    }
}

#[async_trait]
impl TokenRefresher for OAuthFlow {
    async fn refresh(&self, token: &OAuthToken) -> Result<OAuthToken> {
        self.refresh_token(token).await
    }
}

fn transition(state: FlowState, mode: FlowMode) {
    debug!(?state, %mode, "OAuth flow state");
}
