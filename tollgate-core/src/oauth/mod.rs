//! OAuth 2.0 token sources.
//!
//! This module provides the two grants used by the integrations:
//! - [`client_credentials`] - an application authenticating as itself
//! - [`pkce`] - Authorization Code flow with PKCE for user-delegated access
//!
//! The PKCE grant goes through the `oauth2` crate's request builders. The
//! client-credentials grant posts its form with `reqwest` so the Basic
//! credentials are sent unencoded; both parse the endpoint's reply with the
//! `oauth2` response types and translate its errors into [`AuthError`].

pub mod client_credentials;
pub mod pkce;

pub use client_credentials::ClientCredentialsSource;
pub use pkce::{AuthorizationRequest, PkceConfig, PkceFlow, PkceSource};

use std::future::Future;
use std::time::Duration;

use oauth2::{
    AuthUrl, ClientId, RedirectUrl, RequestTokenError, TokenResponse, TokenUrl,
    basic::{BasicClient, BasicErrorResponse, BasicErrorResponseType, BasicTokenResponse},
};
use reqwest::StatusCode;

use crate::secret::Secret;
use crate::token::{AuthError, TokenGrant};

/// Default timeout for token-endpoint requests.
pub const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(30);

/// Create an OAuth2 client for a public (secretless) PKCE client.
///
/// Without a secret, `oauth2` sends `client_id` in the form body. The token
/// URL stands in for the authorization endpoint when `auth_url` is `None`.
pub fn create_oauth_client(
    token_url: &str,
    auth_url: Option<&str>,
    client_id: &str,
    redirect_uri: Option<&str>,
) -> Result<BasicClient, AuthError> {
    let token_url = TokenUrl::new(token_url.to_string()).map_err(|e| {
        AuthError::TokenFetchFailed {
            message: format!("invalid token URL: {}", e),
        }
    })?;

    let auth_url = AuthUrl::new(auth_url.unwrap_or(token_url.as_str()).to_string()).map_err(|e| {
        AuthError::TokenFetchFailed {
            message: format!("invalid authorization URL: {}", e),
        }
    })?;

    let mut client = BasicClient::new(
        ClientId::new(client_id.to_string()),
        None,
        auth_url,
        Some(token_url),
    );

    if let Some(redirect) = redirect_uri {
        let redirect_url = RedirectUrl::new(redirect.to_string()).map_err(|e| {
            AuthError::TokenFetchFailed {
                message: format!("invalid redirect URI: {}", e),
            }
        })?;
        client = client.set_redirect_uri(redirect_url);
    }

    Ok(client)
}

/// Convert a token-endpoint response into a [`TokenGrant`].
pub(crate) fn grant_from_response(response: &BasicTokenResponse) -> TokenGrant {
    TokenGrant {
        access_token: Secret::new(response.access_token().secret().as_str()),
        expires_in: response.expires_in(),
        refresh_token: response
            .refresh_token()
            .map(|token| Secret::new(token.secret().as_str())),
        scopes: response
            .scopes()
            .map(|s| s.iter().map(|scope| scope.to_string()).collect())
            .unwrap_or_default(),
    }
}

/// Parse a token-endpoint reply received outside the `oauth2` request builders.
///
/// Non-2xx bodies in the RFC 6749 error shape go through [`map_token_error`];
/// anything else is a [`AuthError::TokenFetchFailed`] carrying the status.
pub(crate) fn parse_token_response(
    status: StatusCode,
    body: &[u8],
) -> Result<BasicTokenResponse, AuthError> {
    if status.is_success() {
        return serde_json::from_slice(body).map_err(|e| AuthError::TokenFetchFailed {
            message: format!(
                "malformed token response: {} (body: {})",
                e,
                String::from_utf8_lossy(body)
            ),
        });
    }

    match serde_json::from_slice::<BasicErrorResponse>(body) {
        Ok(error) => Err(map_token_error(
            RequestTokenError::<reqwest::Error, _>::ServerResponse(error),
        )),
        Err(_) => Err(AuthError::TokenFetchFailed {
            message: format!(
                "token endpoint returned {}: {}",
                status,
                String::from_utf8_lossy(body).trim()
            ),
        }),
    }
}

/// Translate an `oauth2` request failure into an [`AuthError`].
///
/// Rejections of the client or grant become [`AuthError::InvalidCredentials`];
/// everything else is a [`AuthError::TokenFetchFailed`].
pub(crate) fn map_token_error<RE>(err: RequestTokenError<RE, BasicErrorResponse>) -> AuthError
where
    RE: std::error::Error + 'static,
{
    match err {
        RequestTokenError::ServerResponse(response) => {
            let code: &str = response.error().as_ref();
            let message = match response.error_description() {
                Some(description) => format!("{}: {}", code, description),
                None => code.to_string(),
            };

            match response.error() {
                BasicErrorResponseType::InvalidClient
                | BasicErrorResponseType::InvalidGrant
                | BasicErrorResponseType::UnauthorizedClient => {
                    AuthError::InvalidCredentials { message }
                }
                _ => AuthError::TokenFetchFailed { message },
            }
        }
        RequestTokenError::Request(e) => AuthError::TokenFetchFailed {
            message: format!("request failed: {}", e),
        },
        RequestTokenError::Parse(e, body) => AuthError::TokenFetchFailed {
            message: format!(
                "malformed token response: {} (body: {})",
                e,
                String::from_utf8_lossy(&body)
            ),
        },
        RequestTokenError::Other(message) => AuthError::TokenFetchFailed { message },
    }
}

/// Run a token request with an upper bound on its duration.
pub(crate) async fn with_timeout<T, F>(timeout: Duration, request: F) -> Result<T, AuthError>
where
    F: Future<Output = Result<T, AuthError>>,
{
    match tokio::time::timeout(timeout, request).await {
        Ok(result) => result,
        Err(_) => Err(AuthError::TokenFetchFailed {
            message: format!("token request timed out after {:?}", timeout),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_oauth_client() {
        let client = create_oauth_client("https://example.com/token", None, "test-client-id", None);
        assert!(client.is_ok());
    }

    #[test]
    fn test_create_oauth_client_with_redirect() {
        let client = create_oauth_client(
            "https://example.com/token",
            Some("https://example.com/authorize"),
            "test-client-id",
            Some("http://127.0.0.1:8888/callback"),
        );
        assert!(client.is_ok());
    }

    #[test]
    fn test_create_oauth_client_invalid_urls() {
        let client = create_oauth_client("not a valid url", None, "id", None);
        assert!(matches!(client, Err(AuthError::TokenFetchFailed { .. })));

        let client = create_oauth_client(
            "https://example.com/token",
            None,
            "id",
            Some("::not-a-redirect::"),
        );
        assert!(client.is_err());
    }

    #[test]
    fn test_parse_token_response() {
        let body = br#"{"access_token":"T1","token_type":"Bearer","expires_in":3600,"refresh_token":"R1"}"#;
        let response = parse_token_response(StatusCode::OK, body).unwrap();
        let grant = grant_from_response(&response);

        assert_eq!(grant.access_token.expose(), "T1");
        assert_eq!(grant.expires_in, Some(Duration::from_secs(3600)));
        assert_eq!(grant.refresh_token.unwrap().expose(), "R1");
    }

    #[test]
    fn test_parse_token_error_response() {
        let body = br#"{"error":"invalid_grant","error_description":"Invalid refresh token"}"#;
        match parse_token_response(StatusCode::BAD_REQUEST, body) {
            Err(AuthError::InvalidCredentials { message }) => {
                assert_eq!(message, "invalid_grant: Invalid refresh token");
            }
            other => panic!("expected InvalidCredentials, got {:?}", other),
        }

        match parse_token_response(StatusCode::BAD_GATEWAY, b"upstream down\n") {
            Err(AuthError::TokenFetchFailed { message }) => {
                assert!(message.contains("502"));
                assert!(message.ends_with("upstream down"));
            }
            other => panic!("expected TokenFetchFailed, got {:?}", other),
        }

        assert!(matches!(
            parse_token_response(StatusCode::OK, br#"{"token_type":"Bearer"}"#),
            Err(AuthError::TokenFetchFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result: Result<(), AuthError> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        match result {
            Err(AuthError::TokenFetchFailed { message }) => assert!(message.contains("timed out")),
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
