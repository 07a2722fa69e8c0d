//! Token types and the token source abstraction.
//!
//! This module provides:
//! - [`AccessToken`] - a cached bearer credential with an absolute expiry
//! - [`TokenGrant`] - the parsed body of a successful token-endpoint response
//! - [`TokenSource`] - trait implemented by each OAuth2 grant
//! - [`AuthError`] - failures while obtaining a token

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::secret::Secret;

/// Lifetime assumed when a token endpoint omits `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Error type for token acquisition.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The token endpoint could not be reached or returned an unusable response.
    #[error("token fetch failed: {message}")]
    TokenFetchFailed { message: String },

    /// The token endpoint rejected the client or grant.
    #[error("invalid credentials: {message}")]
    InvalidCredentials { message: String },

    /// A user-delegated flow has neither an authorization code nor a refresh token.
    #[error("authorization required: {message}")]
    AuthorizationRequired { message: String },

    /// The authorization redirect carried an error or failed validation.
    #[error("authorization denied: {message}")]
    AuthorizationDenied { message: String },
}

/// An access token held by a [`TokenCache`](crate::TokenCache).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    /// The token value sent in the auth header.
    pub value: Secret,

    /// When the token endpoint says this token stops working.
    pub expires_at: DateTime<Utc>,

    /// Scopes granted with this token.
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl AccessToken {
    /// Create a token expiring at `expires_at`.
    pub fn new(value: impl Into<Secret>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            expires_at,
            scopes: Vec::new(),
        }
    }

    /// Attach granted scopes.
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Build a token from a grant received at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TokenFetchFailed`] if `expires_in` puts the expiry
    /// outside the representable date range.
    pub fn from_grant(grant: &TokenGrant, now: DateTime<Utc>) -> Result<Self, AuthError> {
        let lifetime = match grant.expires_in {
            Some(expires_in) => Duration::from_std(expires_in).ok(),
            None => Some(Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS)),
        };

        let expires_at = lifetime
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| AuthError::TokenFetchFailed {
                message: format!("token lifetime out of range: {:?}", grant.expires_in),
            })?;

        Ok(Self {
            value: grant.access_token.clone(),
            expires_at,
            scopes: grant.scopes.clone(),
        })
    }

    /// Whether the token may still be sent at `now`.
    ///
    /// A token is usable only while `now < expires_at - safety_margin`.
    pub fn is_usable(&self, now: DateTime<Utc>, safety_margin: Duration) -> bool {
        self.expires_at
            .checked_sub_signed(safety_margin)
            .is_some_and(|deadline| now < deadline)
    }

    /// Expose the raw token value.
    pub fn expose(&self) -> &str {
        self.value.expose()
    }
}

/// A successful token-endpoint response.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: Secret,
    pub expires_in: Option<StdDuration>,
    pub refresh_token: Option<Secret>,
    pub scopes: Vec<String>,
}

impl TokenGrant {
    pub fn new(access_token: impl Into<Secret>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_in: None,
            refresh_token: None,
            scopes: Vec::new(),
        }
    }

    pub fn with_expires_in(mut self, expires_in: StdDuration) -> Self {
        self.expires_in = Some(expires_in);
        self
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<Secret>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }
}

/// A way of obtaining tokens from an authorization server.
///
/// Implementations perform exactly one token-endpoint request per call and
/// hold no cached token themselves; caching is the job of
/// [`TokenCache`](crate::TokenCache).
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Short name used in log lines (e.g. `"client_credentials"`).
    fn grant_name(&self) -> &'static str;

    /// Request a new token.
    ///
    /// `refresh_token` is the most recent refresh token the cache holds, if any.
    /// Sources that do not use refresh tokens ignore it.
    async fn request_token(&self, refresh_token: Option<&Secret>) -> Result<TokenGrant, AuthError>;
}

#[async_trait]
impl<T: TokenSource + ?Sized> TokenSource for Arc<T> {
    fn grant_name(&self) -> &'static str {
        (**self).grant_name()
    }

    async fn request_token(&self, refresh_token: Option<&Secret>) -> Result<TokenGrant, AuthError> {
        (**self).request_token(refresh_token).await
    }
}

#[async_trait]
impl<T: TokenSource + ?Sized> TokenSource for Box<T> {
    fn grant_name(&self) -> &'static str {
        (**self).grant_name()
    }

    async fn request_token(&self, refresh_token: Option<&Secret>) -> Result<TokenGrant, AuthError> {
        (**self).request_token(refresh_token).await
    }
}
