//! Owner of the current access token.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::AuthError;
use crate::client::AuthClient;
use crate::credentials::{AccessToken, Auth, AuthState, ClientCredentials};

const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_EXPIRY_SKEW: Duration = Duration::from_secs(30);

struct Inner {
    auth: Auth,
    credentials: Option<ClientCredentials>,
    /// Number of exchanges attempted so far.
    attempts: u64,
    /// Outcome of the most recent failed exchange, tagged with its attempt number.
    last_failure: Option<(u64, AuthError)>,
    /// Failure that needs operator intervention before retrying.
    latched: Option<AuthError>,
}

/// Holds the access token and refreshes it on demand.
///
/// Concurrent [`authorize`](Self::authorize) calls that find no usable token
/// share a single exchange: the first caller performs it while the others wait
/// on `refresh_lock` and then observe its outcome.
pub struct CredentialStore {
    client: AuthClient,
    inner: RwLock<Inner>,
    refresh_lock: Mutex<()>,
    refresh_timeout: Duration,
    expiry_skew: Duration,
}

impl CredentialStore {
    pub fn new(client: AuthClient, credentials: Option<ClientCredentials>) -> Self {
        let auth = match &credentials {
            Some(creds) => Auth::Credentials(creds.clone()),
            None => Auth::Unauthenticated,
        };
        Self {
            client,
            inner: RwLock::new(Inner {
                auth,
                credentials,
                attempts: 0,
                last_failure: None,
                latched: None,
            }),
            refresh_lock: Mutex::new(()),
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
            expiry_skew: DEFAULT_EXPIRY_SKEW,
        }
    }

    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// Treat tokens as expired this long before their actual expiry.
    pub fn with_expiry_skew(mut self, skew: Duration) -> Self {
        self.expiry_skew = skew;
        self
    }

    /// Returns a valid token, refreshing it first if needed.
    pub async fn authorize(&self) -> Result<AccessToken, AuthError> {
        let seen = {
            let inner = self.inner.read().await;
            if let Some(result) = self.ready(&inner) {
                return result;
            }
            inner.attempts
        };

        let _guard = self.refresh_lock.lock().await;

        {
            let inner = self.inner.read().await;
            if let Some(result) = self.ready(&inner) {
                return result;
            }
            // Another caller ran an exchange while we waited; share its failure.
            if inner.attempts != seen {
                if let Some((attempt, err)) = &inner.last_failure {
                    if *attempt == inner.attempts {
                        return Err(err.clone());
                    }
                }
            }
        }

        self.exchange_locked().await
    }

    /// Forces a new exchange, regardless of the current token.
    pub async fn refresh(&self) -> Result<AccessToken, AuthError> {
        let _guard = self.refresh_lock.lock().await;
        if let Some(err) = &self.inner.read().await.latched {
            return Err(err.clone());
        }
        self.exchange_locked().await
    }

    /// Drops the current token so the next `authorize()` fetches a new one.
    pub async fn invalidate(&self) {
        let mut inner = self.inner.write().await;
        inner.auth = match &inner.credentials {
            Some(creds) => Auth::Credentials(creds.clone()),
            None => Auth::Unauthenticated,
        };
        inner.last_failure = None;
        info!("access token invalidated");
    }

    /// Installs a new credential pair and clears any latched failure.
    pub async fn set_credentials(&self, credentials: ClientCredentials) {
        let mut inner = self.inner.write().await;
        info!(
            client_id = credentials.client_id().as_str(),
            "client credentials updated"
        );
        inner.auth = Auth::Credentials(credentials.clone());
        inner.credentials = Some(credentials);
        inner.last_failure = None;
        inner.latched = None;
    }

    pub async fn state(&self) -> AuthState {
        AuthState::from(&self.inner.read().await.auth)
    }

    /// A usable token or a terminal error, if either is known without an exchange.
    fn ready(&self, inner: &Inner) -> Option<Result<AccessToken, AuthError>> {
        if let Auth::Token(token) = &inner.auth {
            if token.is_valid_at(Utc::now(), self.expiry_skew) {
                return Some(Ok(token.clone()));
            }
        }
        if let Some(err) = &inner.latched {
            return Some(Err(err.clone()));
        }
        if inner.credentials.is_none() {
            return Some(Err(AuthError::InvalidCredentials(
                "no client credentials configured".into(),
            )));
        }
        None
    }

    /// Runs one exchange and records its outcome. Caller holds `refresh_lock`.
    async fn exchange_locked(&self) -> Result<AccessToken, AuthError> {
        let Some(credentials) = self.inner.read().await.credentials.clone() else {
            return Err(AuthError::InvalidCredentials(
                "no client credentials configured".into(),
            ));
        };

        debug!("refreshing access token");
        let outcome =
            match tokio::time::timeout(self.refresh_timeout, self.client.exchange(&credentials))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(AuthError::Network("token request timed out".into())),
            };

        let mut inner = self.inner.write().await;
        inner.attempts += 1;
        match outcome {
            Ok(token) => {
                info!(expires_at = %token.expires_at(), "access token obtained");
                inner.auth = Auth::Token(token.clone());
                inner.last_failure = None;
                Ok(token)
            }
            Err(err) => {
                warn!("access token refresh failed: {err}");
                // A stale token must not be handed out after a failed refresh.
                inner.auth = Auth::Credentials(credentials);
                if !err.is_retryable() {
                    inner.latched = Some(err.clone());
                }
                inner.last_failure = Some((inner.attempts, err.clone()));
                Err(err)
            }
        }
    }
}
