//! Authorization Code flow with PKCE (Proof Key for Code Exchange).
//!
//! # Flow Overview
//!
//! 1. [`PkceFlow::authorization_request`] generates a code verifier, its S256
//!    challenge and a CSRF state, and builds the `/authorize` URL
//! 2. The user authorizes in a browser and is redirected with `?code=...`
//! 3. [`parse_callback`] (or [`listen_for_callback`]) extracts the code
//! 4. [`PkceSource::set_authorization`] hands code + verifier to the source
//! 5. The next [`TokenCache`](crate::TokenCache) fetch exchanges the code;
//!    later fetches use the refresh token
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//! use tollgate_core::oauth::pkce::{PkceConfig, PkceFlow, PkceSource, listen_for_callback};
//! use tollgate_core::TokenCache;
//!
//! let config = PkceConfig::spotify("my-client-id", "http://127.0.0.1:8888/callback");
//! let flow = PkceFlow::new(config.clone());
//! let request = flow.authorization_request(vec!["user-read-private".to_string()])?;
//! println!("Visit: {}", request.url);
//!
//! let code = listen_for_callback(8888, &request.state).await?;
//! let source = Arc::new(PkceSource::new(config));
//! source.set_authorization(code, request.verifier);
//!
//! let cache = TokenCache::new(source);
//! let token = cache.get_valid_token().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use oauth2::{
    AuthorizationCode, CsrfToken, PkceCodeChallenge, PkceCodeVerifier, RefreshToken, Scope,
    reqwest::async_http_client,
};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

use super::{DEFAULT_TOKEN_TIMEOUT, create_oauth_client, grant_from_response, map_token_error, with_timeout};
use crate::secret::Secret;
use crate::token::{AuthError, TokenGrant, TokenSource};

/// Spotify's authorization endpoint.
pub const SPOTIFY_AUTH_URL: &str = "https://accounts.spotify.com/authorize";

/// Spotify's token endpoint.
pub const SPOTIFY_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Endpoints and client identity for a public (secretless) PKCE client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceConfig {
    pub client_id: String,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_uri: String,
    pub timeout: Duration,
}

impl PkceConfig {
    pub fn new(
        client_id: impl Into<String>,
        auth_url: impl Into<String>,
        token_url: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            auth_url: auth_url.into(),
            token_url: token_url.into(),
            redirect_uri: redirect_uri.into(),
            timeout: DEFAULT_TOKEN_TIMEOUT,
        }
    }

    /// Configuration for the Spotify accounts service.
    pub fn spotify(client_id: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self::new(client_id, SPOTIFY_AUTH_URL, SPOTIFY_TOKEN_URL, redirect_uri)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A prepared authorization redirect.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// URL the user must visit.
    pub url: Url,

    /// CSRF state expected back on the redirect.
    pub state: String,

    /// Code verifier to present when exchanging the code.
    pub verifier: Secret,
}

/// Builds authorization URLs for a PKCE client.
#[derive(Debug, Clone)]
pub struct PkceFlow {
    config: PkceConfig,
}

impl PkceFlow {
    pub fn new(config: PkceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PkceConfig {
        &self.config
    }

    /// Build an authorization URL with a fresh verifier, S256 challenge and state.
    ///
    /// The URL carries `client_id`, `response_type=code`, `redirect_uri`,
    /// `scope`, `code_challenge_method=S256`, `code_challenge` and `state`.
    pub fn authorization_request(&self, scopes: Vec<String>) -> Result<AuthorizationRequest, AuthError> {
        let client = create_oauth_client(
            &self.config.token_url,
            Some(&self.config.auth_url),
            &self.config.client_id,
            Some(&self.config.redirect_uri),
        )?;

        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();

        let (url, csrf_state) = client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(scopes.into_iter().map(Scope::new))
            .set_pkce_challenge(challenge)
            .url();

        Ok(AuthorizationRequest {
            url,
            state: csrf_state.secret().to_string(),
            verifier: Secret::new(verifier.secret().as_str()),
        })
    }
}

/// Extract the authorization code from a redirect URL.
///
/// Works for both loopback (`http://127.0.0.1:8888/callback?...`) and custom
/// scheme (`myapp://callback?...`) redirects.
///
/// # Errors
///
/// - [`AuthError::AuthorizationDenied`] if the provider returned `error=...`,
///   the state does not match, or no code is present
pub fn parse_callback(callback_url: &str, expected_state: &str) -> Result<String, AuthError> {
    let url = Url::parse(callback_url).map_err(|e| AuthError::AuthorizationDenied {
        message: format!("invalid callback URL: {}", e),
    })?;

    let mut code = None;
    let mut state = None;
    let mut error = None;

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(err) = error {
        return Err(AuthError::AuthorizationDenied {
            message: format!("provider returned error: {}", err),
        });
    }

    if state.as_deref() != Some(expected_state) {
        return Err(AuthError::AuthorizationDenied {
            message: "state parameter mismatch".to_string(),
        });
    }

    code.ok_or_else(|| AuthError::AuthorizationDenied {
        message: "callback carried no authorization code".to_string(),
    })
}

/// Accept loopback connections on `port` until one carries a valid callback.
///
/// Requests without a query string (favicon probes and the like) are answered
/// with 400 and ignored. A callback carrying an error or a bad state ends the
/// wait with that error.
pub async fn listen_for_callback(port: u16, expected_state: &str) -> Result<String, AuthError> {
    let addr = format!("127.0.0.1:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| AuthError::AuthorizationDenied {
            message: format!("failed to bind to {}: {}", addr, e),
        })?;

    tracing::info!("Listening for OAuth callback on {}", addr);

    loop {
        let (mut socket, _) = listener
            .accept()
            .await
            .map_err(|e| AuthError::AuthorizationDenied {
                message: format!("failed to accept connection: {}", e),
            })?;

        let mut buffer = [0; 4096];
        let n = socket
            .read(&mut buffer)
            .await
            .map_err(|e| AuthError::AuthorizationDenied {
                message: format!("failed to read request: {}", e),
            })?;

        let request = String::from_utf8_lossy(&buffer[..n]);
        let target = request
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .filter(|target| target.contains('?'));

        let Some(target) = target else {
            let _ = socket
                .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n")
                .await;
            continue;
        };

        let result = parse_callback(&format!("http://{}{}", addr, target), expected_state);
        let page: &[u8] = match &result {
            Ok(_) => b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n\
                <html><body><h1>Authorization complete</h1>\
                <p>You can close this window.</p></body></html>",
            Err(_) => b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n\
                <html><body><h1>Authorization failed</h1></body></html>",
        };
        let _ = socket.write_all(page).await;

        return result;
    }
}

struct PendingExchange {
    code: String,
    verifier: Secret,
}

/// Token source for a PKCE client.
///
/// The first fetch after [`set_authorization`](Self::set_authorization)
/// exchanges the code (`grant_type=authorization_code`). The pending code is
/// taken before the request is sent, so it is consumed by that attempt whether
/// it succeeds, fails, or is cancelled by dropping the fetch future; codes are
/// single-use, and a consumed code needs a fresh authorization. Subsequent
/// fetches use `grant_type=refresh_token`.
pub struct PkceSource {
    config: PkceConfig,
    pending: Mutex<Option<PendingExchange>>,
}

impl PkceSource {
    pub fn new(config: PkceConfig) -> Self {
        Self {
            config,
            pending: Mutex::new(None),
        }
    }

    /// Queue an authorization code for exchange on the next fetch.
    pub fn set_authorization(&self, code: impl Into<String>, verifier: Secret) {
        *self.pending.lock() = Some(PendingExchange {
            code: code.into(),
            verifier,
        });
    }

    /// Whether an authorization code is waiting to be exchanged.
    pub fn has_pending_authorization(&self) -> bool {
        self.pending.lock().is_some()
    }

    pub fn config(&self) -> &PkceConfig {
        &self.config
    }

    async fn exchange_code(&self, pending: PendingExchange) -> Result<TokenGrant, AuthError> {
        let client = create_oauth_client(
            &self.config.token_url,
            Some(&self.config.auth_url),
            &self.config.client_id,
            Some(&self.config.redirect_uri),
        )?;

        let request = client
            .exchange_code(AuthorizationCode::new(pending.code.clone()))
            .set_pkce_verifier(PkceCodeVerifier::new(pending.verifier.expose().to_string()));

        let response = with_timeout(self.config.timeout, async {
            request
                .request_async(async_http_client)
                .await
                .map_err(map_token_error)
        })
        .await?;

        tracing::info!("Exchanged authorization code for tokens");
        Ok(grant_from_response(&response))
    }

    async fn refresh(&self, refresh_token: &Secret) -> Result<TokenGrant, AuthError> {
        let client = create_oauth_client(
            &self.config.token_url,
            Some(&self.config.auth_url),
            &self.config.client_id,
            None,
        )?;

        let refresh_token = RefreshToken::new(refresh_token.expose().to_string());
        let request = client.exchange_refresh_token(&refresh_token);

        let response = with_timeout(self.config.timeout, async {
            request
                .request_async(async_http_client)
                .await
                .map_err(map_token_error)
        })
        .await?;

        tracing::info!("Refreshed access token");
        Ok(grant_from_response(&response))
    }
}

impl std::fmt::Debug for PkceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkceSource")
            .field("config", &self.config)
            .field("pending_authorization", &self.has_pending_authorization())
            .finish()
    }
}

#[async_trait]
impl TokenSource for PkceSource {
    fn grant_name(&self) -> &'static str {
        "pkce"
    }

    async fn request_token(&self, refresh_token: Option<&Secret>) -> Result<TokenGrant, AuthError> {
        let pending = self.pending.lock().take();

        match (pending, refresh_token) {
            (Some(pending), _) => self.exchange_code(pending).await,
            (None, Some(refresh_token)) => self.refresh(refresh_token).await,
            (None, None) => Err(AuthError::AuthorizationRequired {
                message: "no authorization code or refresh token; run the authorization flow"
                    .to_string(),
            }),
        }
    }
}
