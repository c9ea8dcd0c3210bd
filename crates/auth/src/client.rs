//! OAuth2 client-credentials grant.
//!
//! [`AuthClient`] drives the exchange and its retry policy; the HTTP round
//! trip sits behind [`TokenTransport`] so tests can script the server.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::backoff::RetryConfig;
use crate::credentials::{AccessToken, ClientCredentials};
use crate::AuthError;

/// Lifetime assumed when the server omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// Per-request HTTP timeout.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A boxed future returned by [`TokenTransport`].
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<TokenResponse, AuthError>> + Send + 'a>>;

/// Successful token endpoint response (RFC 6749 §5.1).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".into()
}

/// Error response body (RFC 6749 §5.2).
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Performs one token request against the authorization server.
pub trait TokenTransport: Send + Sync + 'static {
    fn request_token<'a>(
        &'a self,
        credentials: &'a ClientCredentials,
        scope: Option<&'a str>,
    ) -> TransportFuture<'a>;
}

/// Token transport over HTTPS using `reqwest`.
pub struct HttpTokenTransport {
    http: reqwest::Client,
    token_url: String,
}

impl HttpTokenTransport {
    /// Creates a transport posting to `token_url`.
    pub fn new(token_url: impl Into<String>, request_timeout: Duration) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| AuthError::Network(e.to_string()))?;
        Ok(Self {
            http,
            token_url: token_url.into(),
        })
    }
}

impl TokenTransport for HttpTokenTransport {
    fn request_token<'a>(
        &'a self,
        credentials: &'a ClientCredentials,
        scope: Option<&'a str>,
    ) -> TransportFuture<'a> {
        Box::pin(async move {
            let mut form = vec![("grant_type", "client_credentials")];
            if let Some(scope) = scope {
                form.push(("scope", scope));
            }

            let resp = self
                .http
                .post(&self.token_url)
                .basic_auth(
                    credentials.client_id().as_str(),
                    Some(credentials.client_secret().expose()),
                )
                .form(&form)
                .send()
                .await
                .map_err(|e| AuthError::Network(e.without_url().to_string()))?;

            let status = resp.status().as_u16();
            let body = resp
                .bytes()
                .await
                .map_err(|e| AuthError::Network(e.without_url().to_string()))?;
            classify_response(status, &body)
        })
    }
}

/// Maps a token endpoint status and body onto the auth error taxonomy.
pub(crate) fn classify_response(status: u16, body: &[u8]) -> Result<TokenResponse, AuthError> {
    if (200..300).contains(&status) {
        return serde_json::from_slice(body)
            .map_err(|e| AuthError::ServerRejected(format!("malformed token response: {e}")));
    }

    let oauth_error = serde_json::from_slice::<OAuthErrorBody>(body).ok();
    let detail = match &oauth_error {
        Some(e) => match &e.error_description {
            Some(desc) => format!("{} ({desc})", e.error),
            None => e.error.clone(),
        },
        None => format!("HTTP {status}"),
    };

    let invalid_client = oauth_error
        .as_ref()
        .is_some_and(|e| matches!(e.error.as_str(), "invalid_client" | "unauthorized_client"));

    match status {
        401 => Err(AuthError::InvalidCredentials(detail)),
        400 if invalid_client => Err(AuthError::InvalidCredentials(detail)),
        408 | 429 | 500..=599 => Err(AuthError::Network(detail)),
        _ => Err(AuthError::ServerRejected(detail)),
    }
}

/// Exchanges client credentials for access tokens.
#[derive(Clone)]
pub struct AuthClient {
    transport: Arc<dyn TokenTransport>,
    retry: RetryConfig,
    scope: Option<String>,
    default_lifetime: Duration,
}

impl AuthClient {
    /// Creates a client over the given transport with default retry policy.
    pub fn new(transport: impl TokenTransport) -> Self {
        Self {
            transport: Arc::new(transport),
            retry: RetryConfig::default(),
            scope: None,
            default_lifetime: DEFAULT_TOKEN_LIFETIME,
        }
    }

    /// Creates a client posting to an HTTP token endpoint.
    pub fn http(token_url: impl Into<String>) -> Result<Self, AuthError> {
        Ok(Self::new(HttpTokenTransport::new(
            token_url,
            DEFAULT_REQUEST_TIMEOUT,
        )?))
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_default_lifetime(mut self, lifetime: Duration) -> Self {
        self.default_lifetime = lifetime;
        self
    }

    /// Performs the client-credentials grant.
    ///
    /// `Network` failures are retried with exponential backoff up to
    /// `RetryConfig::max_attempts`; every other failure returns at once.
    pub async fn exchange(&self, credentials: &ClientCredentials) -> Result<AccessToken, AuthError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            debug!(attempt, client_id = credentials.client_id().as_str(), "requesting access token");

            match self
                .transport
                .request_token(credentials, self.scope.as_deref())
                .await
            {
                Ok(resp) => {
                    return AccessToken::from_response(resp, Utc::now(), self.default_lifetime);
                }
                Err(AuthError::Network(reason)) if attempt < max_attempts => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "token request failed, retrying: {reason}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(attempt, "token request failed: {e}");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays canned outcomes in order; the last one repeats.
    struct ScriptedTransport {
        outcomes: Mutex<VecDeque<Result<TokenResponse, AuthError>>>,
        calls: Arc<AtomicUsize>,
        seen_scope: Arc<Mutex<Option<String>>>,
    }

    impl ScriptedTransport {
        fn new(outcomes: Vec<Result<TokenResponse, AuthError>>) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    outcomes: Mutex::new(outcomes.into()),
                    calls: Arc::clone(&calls),
                    seen_scope: Arc::new(Mutex::new(None)),
                },
                calls,
            )
        }
    }

    impl TokenTransport for ScriptedTransport {
        fn request_token<'a>(
            &'a self,
            _credentials: &'a ClientCredentials,
            scope: Option<&'a str>,
        ) -> TransportFuture<'a> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.seen_scope.lock().unwrap() = scope.map(str::to_string);
            let mut outcomes = self.outcomes.lock().unwrap();
            let next = if outcomes.len() > 1 {
                outcomes.pop_front().unwrap()
            } else {
                outcomes.front().cloned().unwrap()
            };
            Box::pin(async move { next })
        }
    }

    fn ok_response() -> Result<TokenResponse, AuthError> {
        Ok(TokenResponse {
            access_token: "tok".into(),
            token_type: "Bearer".into(),
            expires_in: Some(300),
            scope: None,
        })
    }

    fn creds() -> ClientCredentials {
        ClientCredentials::from_parts("device-1", "secret").unwrap()
    }

    #[tokio::test]
    async fn exchange_success() {
        let (transport, calls) = ScriptedTransport::new(vec![ok_response()]);
        let client = AuthClient::new(transport);
        let token = client.exchange(&creds()).await.unwrap();
        assert_eq!(token.secret(), "tok");
        assert!(token.expires_at() > Utc::now());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exchange_passes_scope() {
        let (transport, _calls) = ScriptedTransport::new(vec![ok_response()]);
        let seen = Arc::clone(&transport.seen_scope);
        let client = AuthClient::new(transport).with_scope("ota");
        client.exchange(&creds()).await.unwrap();
        assert_eq!(seen.lock().unwrap().as_deref(), Some("ota"));
    }

    #[tokio::test(start_paused = true)]
    async fn network_errors_are_retried() {
        let (transport, calls) = ScriptedTransport::new(vec![
            Err(AuthError::Network("connection refused".into())),
            Err(AuthError::Network("connection reset".into())),
            ok_response(),
        ]);
        let client = AuthClient::new(transport);
        let token = client.exchange(&creds()).await.unwrap();
        assert_eq!(token.secret(), "tok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn network_retries_are_bounded() {
        let (transport, calls) =
            ScriptedTransport::new(vec![Err(AuthError::Network("down".into()))]);
        let client = AuthClient::new(transport).with_retry(RetryConfig {
            max_attempts: 3,
            ..RetryConfig::default()
        });
        let err = client.exchange(&creds()).await.unwrap_err();
        assert!(matches!(err, AuthError::Network(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn invalid_credentials_are_not_retried() {
        let (transport, calls) =
            ScriptedTransport::new(vec![Err(AuthError::InvalidCredentials("nope".into()))]);
        let client = AuthClient::new(transport);
        let err = client.exchange(&creds()).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn server_rejection_is_not_retried() {
        let (transport, calls) =
            ScriptedTransport::new(vec![Err(AuthError::ServerRejected("HTTP 403".into()))]);
        let client = AuthClient::new(transport);
        let err = client.exchange(&creds()).await.unwrap_err();
        assert!(matches!(err, AuthError::ServerRejected(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn classify_success_body() {
        let body = br#"{"access_token":"a","token_type":"bearer","expires_in":60}"#;
        let resp = classify_response(200, body).unwrap();
        assert_eq!(resp.access_token, "a");
        assert_eq!(resp.expires_in, Some(60));
    }

    #[test]
    fn classify_success_defaults_token_type() {
        let resp = classify_response(200, br#"{"access_token":"a"}"#).unwrap();
        assert_eq!(resp.token_type, "Bearer");
        assert!(resp.expires_in.is_none());
    }

    #[test]
    fn classify_malformed_success_is_rejection() {
        let err = classify_response(200, b"<html>").unwrap_err();
        assert!(matches!(err, AuthError::ServerRejected(_)));
    }

    #[test]
    fn classify_invalid_client() {
        let body = br#"{"error":"invalid_client","error_description":"unknown client"}"#;
        let err = classify_response(400, body).unwrap_err();
        assert_eq!(
            err,
            AuthError::InvalidCredentials("invalid_client (unknown client)".into())
        );
        assert!(matches!(
            classify_response(401, b"").unwrap_err(),
            AuthError::InvalidCredentials(_)
        ));
    }

    #[test]
    fn classify_retryable_statuses() {
        for status in [408, 429, 500, 502, 503] {
            assert!(
                classify_response(status, b"").unwrap_err().is_retryable(),
                "status {status} should be retryable"
            );
        }
    }

    #[test]
    fn classify_other_client_errors_are_rejections() {
        let body = br#"{"error":"invalid_scope"}"#;
        assert_eq!(
            classify_response(400, body).unwrap_err(),
            AuthError::ServerRejected("invalid_scope".into())
        );
        assert!(matches!(
            classify_response(403, b"").unwrap_err(),
            AuthError::ServerRejected(_)
        ));
    }
}
