use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    axum::{
        Router,
        extract::{Query, State},
        http::StatusCode,
        response::Html,
        routing::get,
    },
    tokio::{net::TcpListener, sync::mpsc, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{Error, Result, error::Context, exchange::TokenClient, types::OAuthToken};

/// Fixed path the authorization server redirects to.
pub const CALLBACK_PATH: &str = "/oauth/callback";

/// How long the listener may take to drain after the attempt concludes.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// What the callback handler needs to finish the round trip on its own.
pub struct CallbackParams {
    pub expected_state: String,
    pub verifier: String,
    pub redirect_uri: String,
    pub tokens: TokenClient,
}

struct CallbackState {
    params: CallbackParams,
    consumed: AtomicBool,
    token_tx: mpsc::Sender<OAuthToken>,
    error_tx: mpsc::Sender<Error>,
}

impl CallbackState {
    fn fail(&self, error: Error) {
        let _ = self.error_tx.try_send(error);
    }
}

/// Short-lived local HTTP listener that receives the OAuth redirect,
/// verifies it and exchanges the code.
///
/// Listens on `127.0.0.1` and, when available, `[::1]` on the same port, so
/// the `localhost` redirect lands whichever loopback the browser resolves.
/// The listener stops when [`shutdown`](Self::shutdown) is awaited or, failing
/// that, when the server is dropped.
pub struct CallbackServer {
    addr: SocketAddr,
    ipv6_addr: Option<SocketAddr>,
    token_rx: mpsc::Receiver<OAuthToken>,
    error_rx: mpsc::Receiver<Error>,
    stop: CancellationToken,
    handle: Option<JoinHandle<std::io::Result<()>>>,
}

impl CallbackServer {
    /// Bind the loopback interfaces on `port` and start serving `GET /oauth/callback`.
    pub async fn start(port: u16, params: CallbackParams) -> Result<Self> {
        let (token_tx, token_rx) = mpsc::channel(1);
        let (error_tx, error_rx) = mpsc::channel(1);
        let state = Arc::new(CallbackState {
            params,
            consumed: AtomicBool::new(false),
            token_tx,
            error_tx,
        });

        let app = Router::new()
            .route(CALLBACK_PATH, get(handle_callback))
            .with_state(state);

        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .with_context(|| format!("cannot listen on port {port}"))?;
        let addr = listener.local_addr()?;
        let ipv6 = match TcpListener::bind(("::1", addr.port())).await {
            Ok(l) => Some(l),
            Err(e) => {
                debug!(port = addr.port(), error = %e, "IPv6 loopback unavailable for OAuth callback");
                None
            },
        };
        let ipv6_addr = ipv6.as_ref().and_then(|l| l.local_addr().ok());

        let stop = CancellationToken::new();
        let v4 = axum::serve(listener, app.clone()).with_graceful_shutdown(stop.clone().cancelled_owned());
        let v6 = ipv6.map(|l| axum::serve(l, app).with_graceful_shutdown(stop.clone().cancelled_owned()));
        let handle = tokio::spawn(async move {
            match v6 {
                Some(v6) => tokio::try_join!(v4.into_future(), v6.into_future()).map(|_| ()),
                None => v4.await,
            }
        });

        debug!(%addr, ?ipv6_addr, "OAuth callback server listening");
        Ok(Self {
            addr,
            ipv6_addr,
            token_rx,
            error_rx,
            stop,
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// The `[::1]` listener, if the host has IPv6 loopback.
    pub fn ipv6_addr(&self) -> Option<SocketAddr> {
        self.ipv6_addr
    }

    /// Wait for the first of: a token, a failure, cancellation, or `timeout`.
    pub async fn wait(
        &mut self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<OAuthToken> {
        tokio::select! {
            Some(token) = self.token_rx.recv() => Ok(token),
            Some(err) = self.error_rx.recv() => Err(err),
            _ = cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(timeout) => Err(Error::TimedOut("waiting for the OAuth callback")),
        }
    }

    /// Stop accepting connections and wait up to five seconds for in-flight
    /// requests to drain.
    pub async fn shutdown(mut self) {
        self.stop.cancel();
        let Some(handle) = self.handle.take() else {
            return;
        };
        let abort = handle.abort_handle();
        match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
            Ok(Ok(Ok(()))) => debug!(addr = %self.addr, "OAuth callback server stopped"),
            Ok(Ok(Err(e))) => warn!(error = %e, "OAuth callback server failed"),
            Ok(Err(e)) => warn!(error = %e, "OAuth callback server task panicked"),
            Err(_) => {
                warn!("OAuth callback server did not stop in time, aborting");
                abort.abort();
            },
        }
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn handle_callback(
    State(state): State<Arc<CallbackState>>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Html<String>) {
    if state.consumed.swap(true, Ordering::SeqCst) {
        return page(
            StatusCode::BAD_REQUEST,
            "Authentication failed",
            "This login link has already been used.",
        );
    }

    if params.get("state").map(String::as_str) != Some(state.params.expected_state.as_str()) {
        warn!("OAuth callback rejected: state mismatch");
        state.fail(Error::CsrfMismatch);
        return page(
            StatusCode::BAD_REQUEST,
            "Authentication failed",
            "State mismatch. Restart the login from the terminal.",
        );
    }

    if let Some(error) = params.get("error") {
        let detail = params
            .get("error_description")
            .map_or_else(|| error.clone(), |d| format!("{error}: {d}"));
        state.fail(Error::Denied(detail));
        return page(
            StatusCode::BAD_REQUEST,
            "Authentication denied",
            "Authorization was not granted.",
        );
    }

    let Some(code) = params.get("code").filter(|c| !c.is_empty()) else {
        state.fail(Error::MissingCode);
        return page(
            StatusCode::BAD_REQUEST,
            "Authentication failed",
            "The callback did not include an authorization code.",
        );
    };

    debug!("exchanging authorization code");
    let p = &state.params;
    match p
        .tokens
        .exchange_code(code, &p.redirect_uri, &p.verifier)
        .await
    {
        Ok(token) => {
            info!("OAuth code exchange succeeded");
            let _ = state.token_tx.try_send(token);
            page(
                StatusCode::OK,
                "Authentication successful!",
                "You can close this window and return to the terminal.",
            )
        },
        Err(e) => {
            state.fail(Error::exchange(e));
            page(
                StatusCode::BAD_GATEWAY,
                "Authentication failed",
                "The authorization code could not be exchanged for a token.",
            )
        },
    }
}

fn page(status: StatusCode, title: &str, body: &str) -> (StatusCode, Html<String>) {
    (status, Html(format!("<h1>{title}</h1><p>{body}</p>")))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> CallbackParams {
        CallbackParams {
            expected_state: "expected".into(),
            verifier: "verifier".into(),
            redirect_uri: "http://localhost:8080/oauth/callback".into(),
            tokens: TokenClient::new(reqwest::Client::new(), "http://127.0.0.1:9", "cid", None),
        }
    }

    async fn get_status(url: String) -> u16 {
        reqwest::get(url).await.unwrap().status().as_u16()
    }

    #[tokio::test]
    async fn answers_on_both_loopbacks() {
        let mut server = CallbackServer::start(0, params()).await.unwrap();
        let port = server.local_addr().port();

        let target = match server.ipv6_addr() {
            Some(v6) => {
                assert_eq!(v6.port(), port);
                format!("http://[::1]:{port}{CALLBACK_PATH}?state=forged&code=c")
            },
            None => format!("http://127.0.0.1:{port}{CALLBACK_PATH}?state=forged&code=c"),
        };
        assert_eq!(get_status(target).await, 400);

        let err = server
            .wait(&CancellationToken::new(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CsrfMismatch));
        server.shutdown().await;
    }

    #[tokio::test]
    async fn first_callback_consumes_the_state() {
        let mut server = CallbackServer::start(0, params()).await.unwrap();
        let base = format!("http://127.0.0.1:{}{CALLBACK_PATH}", server.local_addr().port());

        assert_eq!(get_status(format!("{base}?state=forged&code=c")).await, 400);
        assert_eq!(get_status(format!("{base}?state=expected&code=c")).await, 400);

        let err = server
            .wait(&CancellationToken::new(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CsrfMismatch));
        let second = server
            .wait(&CancellationToken::new(), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(second, Error::TimedOut(_)));
        server.shutdown().await;
    }

    #[tokio::test]
    async fn busy_port_is_an_error() {
        let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = holder.local_addr().unwrap().port();
        let err = CallbackServer::start(port, params()).await.err().unwrap();
        assert!(err.to_string().contains(&format!("cannot listen on port {port}")));
    }
}
