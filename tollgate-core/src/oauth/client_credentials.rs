//! Client Credentials grant.
//!
//! Issues `POST <token_url>` with `Authorization: Basic base64(id:secret)` and
//! a form body of `grant_type=client_credentials` (plus `scope` when configured).
//! The id and secret are Base64-encoded as-is, not form-encoded first.
//! The grant is idempotent, so a duplicated request is wasteful but harmless.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;

use super::{DEFAULT_TOKEN_TIMEOUT, grant_from_response, parse_token_response, with_timeout};
use crate::secret::Secret;
use crate::token::{AuthError, TokenGrant, TokenSource};

/// Token source for the `client_credentials` grant.
pub struct ClientCredentialsSource {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: Secret,
    scopes: Vec<String>,
    timeout: Duration,
}

impl ClientCredentialsSource {
    /// Create a source for the given token endpoint and credential pair.
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<Secret>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scopes: Vec::new(),
            timeout: DEFAULT_TOKEN_TIMEOUT,
        }
    }

    /// Request these scopes with every token.
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Bound the duration of each token request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl std::fmt::Debug for ClientCredentialsSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentialsSource")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret)
            .field("scopes", &self.scopes)
            .finish()
    }
}

#[async_trait]
impl TokenSource for ClientCredentialsSource {
    fn grant_name(&self) -> &'static str {
        "client_credentials"
    }

    async fn request_token(&self, _refresh_token: Option<&Secret>) -> Result<TokenGrant, AuthError> {
        let mut form = vec![("grant_type", "client_credentials".to_string())];
        if !self.scopes.is_empty() {
            form.push(("scope", self.scopes.join(" ")));
        }

        let request = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(self.client_secret.expose()))
            .header(ACCEPT, "application/json")
            .form(&form);

        let response = with_timeout(self.timeout, async {
            let response = request.send().await.map_err(|e| AuthError::TokenFetchFailed {
                message: format!("request failed: {}", e),
            })?;

            let status = response.status();
            let body = response.bytes().await.map_err(|e| AuthError::TokenFetchFailed {
                message: format!("failed to read token response: {}", e),
            })?;

            parse_token_response(status, &body)
        })
        .await?;

        tracing::debug!("Client credentials token issued by {}", self.token_url);

        Ok(grant_from_response(&response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_secret() {
        let source = ClientCredentialsSource::new("https://example.com/token", "id", "s3cret");
        let debug = format!("{:?}", source);
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("s3cret"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_fetch_failure() {
        let source = ClientCredentialsSource::new("http://127.0.0.1:1/token", "id", "secret")
            .with_timeout(Duration::from_secs(5));

        let result = source.request_token(None).await;
        assert!(matches!(result, Err(AuthError::TokenFetchFailed { .. })));
    }
}
