//! OAuth2 client-credentials authentication for the transfer agent.
//!
//! [`AuthClient`] performs the grant against the authorization server and
//! [`CredentialStore`] owns the resulting [`AccessToken`], refreshing it
//! transparently when it expires.

mod backoff;
mod client;
mod credentials;
mod store;

pub use backoff::RetryConfig;
pub use client::{AuthClient, HttpTokenTransport, TokenResponse, TokenTransport, TransportFuture};
pub use credentials::{AccessToken, Auth, AuthState, ClientCredentials, ClientId, ClientSecret};
pub use store::CredentialStore;

/// Errors produced while obtaining an access token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The client id/secret pair was refused. Needs operator intervention.
    #[error("invalid client credentials: {0}")]
    InvalidCredentials(String),

    /// Transport failure or timeout. Retryable.
    #[error("network error: {0}")]
    Network(String),

    /// The server refused the grant for another reason. Fatal for the session.
    #[error("authorization server rejected the request: {0}")]
    ServerRejected(String),
}

impl AuthError {
    /// Returns `true` if the exchange may be retried with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}
