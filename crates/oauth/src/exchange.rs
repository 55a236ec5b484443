//! Token endpoint client: authorization-code exchange and refresh grants.

use {
    chrono::{DateTime, Duration, Utc},
    secrecy::{ExposeSecret, Secret},
    tracing::debug,
};

use crate::{Error, Result, types::OAuthToken};

/// Token endpoint path relative to the instance base URL.
pub const TOKEN_PATH: &str = "/login/oauth2/token";

/// Posts grants to `<base_url>/login/oauth2/token`.
///
/// Cheap to clone; the callback handler holds its own copy.
#[derive(Clone)]
pub struct TokenClient {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: Option<Secret<String>>,
}

impl TokenClient {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        client_id: impl Into<String>,
        client_secret: Option<Secret<String>>,
    ) -> Self {
        Self {
            http,
            token_url: format!("{base_url}{TOKEN_PATH}"),
            client_id: client_id.into(),
            client_secret,
        }
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// Exchange an authorization code, proving possession of the PKCE verifier.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        verifier: &str,
    ) -> Result<OAuthToken> {
        let form = self.form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("code_verifier", verifier),
        ]);
        self.post(form).await
    }

    /// Trade a refresh token for a new access token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<OAuthToken> {
        let form = self.form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ]);
        self.post(form).await
    }

    fn form(&self, grant: &[(&str, &str)]) -> Vec<(String, String)> {
        let mut form: Vec<(String, String)> = grant
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        form.push(("client_id".to_string(), self.client_id.clone()));
        if let Some(secret) = &self.client_secret {
            form.push((
                "client_secret".to_string(),
                secret.expose_secret().clone(),
            ));
        }
        form
    }

    async fn post(&self, form: Vec<(String, String)>) -> Result<OAuthToken> {
        let resp = self.http.post(&self.token_url).form(&form).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), "token endpoint rejected grant");
            return Err(Error::Endpoint {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp.json::<serde_json::Value>().await?;
        parse_token_response(&body)
    }
}

fn parse_token_response(resp: &serde_json::Value) -> Result<OAuthToken> {
    let access_token = resp["access_token"]
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::message("missing access_token in response"))?;

    let mut token = OAuthToken::new(access_token);
    if let Some(refresh) = resp["refresh_token"].as_str() {
        token = token.with_refresh_token(refresh);
    }
    if let Some(kind) = resp["token_type"].as_str() {
        token.token_type = kind.to_string();
    }
    if let Some(secs) = resp["expires_in"].as_i64() {
        token = token.with_expiry(expiry_after(secs)?);
    }
    Ok(token)
}

/// `now + secs`, rejecting lifetimes that are negative or past chrono's range.
fn expiry_after(secs: i64) -> Result<DateTime<Utc>> {
    if secs < 0 {
        return Err(Error::message(format!("negative expires_in: {secs}")));
    }
    Duration::try_seconds(secs)
        .and_then(|d| Utc::now().checked_add_signed(d))
        .ok_or_else(|| Error::message(format!("expires_in out of range: {secs}")))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {mockito::Matcher, serde_json::json};

    use super::*;

    #[test]
    fn parses_full_response() {
        let token = parse_token_response(&json!({
            "access_token": "acc",
            "token_type": "Bearer",
            "refresh_token": "ref",
            "expires_in": 3600,
            "user": {"id": 42, "name": "Student"}
        }))
        .unwrap();
        assert_eq!(token.access_token.expose_secret(), "acc");
        assert_eq!(token.refresh_token(), Some("ref"));
        let remaining = token.expiry.unwrap() - Utc::now();
        assert!(remaining > Duration::minutes(59) && remaining <= Duration::hours(1));
    }

    #[test]
    fn missing_expiry_never_expires() {
        let token = parse_token_response(&json!({"access_token": "acc"})).unwrap();
        assert!(token.expiry.is_none());
        assert_eq!(token.token_type, "Bearer");
    }

    #[test]
    fn out_of_range_lifetimes_are_errors() {
        for secs in [i64::MAX, 9_000_000_000_000, -5] {
            let err = parse_token_response(&json!({"access_token": "a", "expires_in": secs}))
                .unwrap_err();
            assert!(matches!(err, Error::Message { .. }), "{secs}: {err}");
        }
    }

    #[test]
    fn zero_lifetime_is_already_expired() {
        let token = parse_token_response(&json!({"access_token": "a", "expires_in": 0})).unwrap();
        assert!(token.is_expired());
    }

    #[test]
    fn rejects_response_without_access_token() {
        assert!(parse_token_response(&json!({"error": "invalid_grant"})).is_err());
    }

    #[tokio::test]
    async fn exchange_sends_verifier_and_secret() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", TOKEN_PATH)
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), "the-code".into()),
                Matcher::UrlEncoded("code_verifier".into(), "the-verifier".into()),
                Matcher::UrlEncoded("client_id".into(), "cid".into()),
                Matcher::UrlEncoded("client_secret".into(), "csecret".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"acc","refresh_token":"ref","expires_in":3600}"#)
            .create_async()
            .await;

        let client = TokenClient::new(
            reqwest::Client::new(),
            &server.url(),
            "cid",
            Some(Secret::new("csecret".into())),
        );
        let token = client
            .exchange_code("the-code", "http://localhost:8080/oauth/callback", "the-verifier")
            .await
            .unwrap();
        assert_eq!(token.access_token.expose_secret(), "acc");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_surfaces_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", TOKEN_PATH)
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let client = TokenClient::new(reqwest::Client::new(), &server.url(), "cid", None);
        let err = client.refresh("stale").await.unwrap_err();
        match err {
            Error::Endpoint { status, body } => {
                assert_eq!(status, 400);
                assert!(body.contains("invalid_grant"));
            },
            other => panic!("unexpected error: {other}"),
        }
    }
}
