use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::AuthError;
use crate::client::TokenResponse;

/// OAuth2 client identifier.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Result<Self, AuthError> {
        let id = id.into();
        if id.is_empty() {
            return Err(AuthError::InvalidCredentials(
                "client id must not be empty".into(),
            ));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ClientId").field(&self.0).finish()
    }
}

/// OAuth2 client secret. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientSecret(String);

impl ClientSecret {
    pub fn new(secret: impl Into<String>) -> Result<Self, AuthError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(AuthError::InvalidCredentials(
                "client secret must not be empty".into(),
            ));
        }
        Ok(Self(secret))
    }

    /// Returns the raw secret, for the token request only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ClientSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ClientSecret(<redacted>)")
    }
}

/// The id/secret pair presented to the authorization server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    client_id: ClientId,
    client_secret: ClientSecret,
}

impl ClientCredentials {
    pub fn new(client_id: ClientId, client_secret: ClientSecret) -> Self {
        Self {
            client_id,
            client_secret,
        }
    }

    /// Validates and pairs raw strings.
    pub fn from_parts(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, AuthError> {
        Ok(Self::new(
            ClientId::new(client_id)?,
            ClientSecret::new(client_secret)?,
        ))
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn client_secret(&self) -> &ClientSecret {
        &self.client_secret
    }
}

/// A bearer token returned by a successful exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    token: String,
    token_type: String,
    scope: Option<String>,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            token_type: "Bearer".into(),
            scope: None,
            expires_at,
        }
    }

    /// Builds a token from the endpoint response, issued at `now`.
    ///
    /// `default_lifetime` applies when the server omits `expires_in`.
    pub fn from_response(
        resp: TokenResponse,
        now: DateTime<Utc>,
        default_lifetime: Duration,
    ) -> Result<Self, AuthError> {
        if resp.access_token.is_empty() {
            return Err(AuthError::ServerRejected(
                "token response carried an empty access_token".into(),
            ));
        }
        let lifetime = resp
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(default_lifetime);
        let expires_at = chrono::Duration::from_std(lifetime)
            .ok()
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| AuthError::ServerRejected("token lifetime out of range".into()))?;
        Ok(Self {
            token: resp.access_token,
            token_type: resp.token_type,
            scope: resp.scope,
            expires_at,
        })
    }

    /// Returns the raw bearer value.
    pub fn secret(&self) -> &str {
        &self.token
    }

    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// `true` if the token is still usable at `now` with `skew` to spare.
    pub fn is_valid_at(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        chrono::Duration::from_std(skew)
            .ok()
            .and_then(|skew| now.checked_add_signed(skew))
            .is_some_and(|deadline| deadline < self.expires_at)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// The authentication mode currently active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    /// Credentials are configured but no token has been obtained yet.
    Credentials(ClientCredentials),
    /// A token obtained through a successful exchange.
    Token(AccessToken),
    Unauthenticated,
}

/// Secret-free summary of [`Auth`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Credentials,
    Token { expires_at: DateTime<Utc> },
    Unauthenticated,
}

impl From<&Auth> for AuthState {
    fn from(auth: &Auth) -> Self {
        match auth {
            Auth::Credentials(_) => Self::Credentials,
            Auth::Token(t) => Self::Token {
                expires_at: t.expires_at(),
            },
            Auth::Unauthenticated => Self::Unauthenticated,
        }
    }
}
