//! Authenticated REST client.
//!
//! [`ApiClient`] performs one logical API call: it attaches a token from a
//! shared [`TokenCache`], classifies the response, and recovers from a single
//! authentication failure by invalidating the cache and retrying once.
//! Non-auth failures are never retried.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::decode::{DecodeError, ResponseDecoder, decode_json};
use crate::token::{AccessToken, TokenSource};
use crate::token_cache::TokenCache;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Attempts per call: the original request plus one retry after an auth failure.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// Upper bound on the length of error body excerpts.
const MAX_ERROR_DETAIL_CHARS: usize = 512;

/// Errors returned by [`ApiClient`].
#[derive(Debug, Error)]
pub enum ApiError {
    /// No usable token could be obtained, or the server rejected the token
    /// on every attempt.
    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    DecodingFailed(#[from] DecodeError),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited{}", retry_after_suffix(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

fn retry_after_suffix(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(delay) => format!(" (retry after {}s)", delay.as_secs()),
        None => String::new(),
    }
}

impl ApiError {
    /// HTTP status carried by this error, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpError { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }
}

/// How the access token is presented to a data endpoint.
///
/// `format` must contain the `{token}` placeholder, e.g. `Bearer {token}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthHeader {
    pub name: String,
    pub format: String,
}

impl AuthHeader {
    /// `Authorization: Bearer <token>`.
    pub fn bearer() -> Self {
        Self::custom("Authorization", "Bearer {token}")
    }

    /// `<name>: <token>` with no scheme prefix.
    pub fn raw(name: impl Into<String>) -> Self {
        Self::custom(name, "{token}")
    }

    pub fn custom(name: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            format: format.into(),
        }
    }

    /// Render the header value for `token`.
    pub fn render(&self, token: &str) -> String {
        self.format.replace("{token}", token)
    }

    fn to_header(&self, token: &AccessToken) -> Result<(HeaderName, HeaderValue), ApiError> {
        let name = HeaderName::from_bytes(self.name.as_bytes())
            .map_err(|e| ApiError::InvalidRequest(format!("invalid header name {:?}: {}", self.name, e)))?;
        let mut value = HeaderValue::from_str(&self.render(token.expose()))
            .map_err(|_| ApiError::InvalidRequest(format!("invalid value for header {:?}", self.name)))?;
        value.set_sensitive(true);
        Ok((name, value))
    }
}

impl Default for AuthHeader {
    fn default() -> Self {
        Self::bearer()
    }
}

/// Request payload.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

/// Description of one API call.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    /// Path relative to the client's base URL, or an absolute `http(s)` URL.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    /// Overrides [`ApiClientConfig::timeout`].
    pub timeout: Option<Duration>,
    /// Overrides [`ApiClientConfig::auth_header`].
    pub auth_header: Option<AuthHeader>,
}

impl RequestSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            timeout: None,
            auth_header: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Append a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Append a query parameter when `value` is present.
    pub fn query_opt<V: ToString>(self, key: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(value) => self.query(key, value),
            None => self,
        }
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.body = Some(RequestBody::Form(fields));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_auth_header(mut self, header: AuthHeader) -> Self {
        self.auth_header = Some(header);
        self
    }
}

/// Configuration for an [`ApiClient`].
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    pub base_url: String,
    pub auth_header: AuthHeader,
    pub timeout: Duration,
    pub max_attempts: u32,
}

impl ApiClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth_header: AuthHeader::bearer(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_auth_header(mut self, header: AuthHeader) -> Self {
        self.auth_header = header;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Total attempts per call, at least 1.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }
}

/// HTTP client that authenticates every request with a cached token.
pub struct ApiClient<S: TokenSource> {
    http: reqwest::Client,
    config: ApiClientConfig,
    base_url: Url,
    tokens: Arc<TokenCache<S>>,
}

impl<S: TokenSource> ApiClient<S> {
    /// Create a client. The base URL must be an absolute `http(s)` URL.
    pub fn new(config: ApiClientConfig, tokens: Arc<TokenCache<S>>) -> Result<Self, ApiError> {
        let base_url = parse_http_url(&config.base_url)?;

        let http = reqwest::Client::builder()
            .user_agent(concat!("tollgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::NetworkError(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            config,
            base_url,
            tokens,
        })
    }

    pub fn config(&self) -> &ApiClientConfig {
        &self.config
    }

    /// The token cache shared by this client.
    pub fn tokens(&self) -> &Arc<TokenCache<S>> {
        &self.tokens
    }

    /// Perform one logical call and decode a 2xx body with `decode`.
    ///
    /// A 401 or 403 invalidates the cached token and retries with a fresh one
    /// until `max_attempts` is reached, after which the call fails with
    /// [`ApiError::AuthenticationFailed`]. Every other failure is returned as is.
    #[instrument(skip(self, spec, decode), fields(method = %spec.method, path = %spec.path))]
    pub async fn execute<T, F>(&self, spec: &RequestSpec, decode: F) -> Result<T, ApiError>
    where
        F: FnOnce(&[u8]) -> Result<T, DecodeError>,
    {
        let url = self.resolve_url(spec)?;
        let auth_header = spec.auth_header.as_ref().unwrap_or(&self.config.auth_header);
        let timeout = spec.timeout.unwrap_or(self.config.timeout);
        let mut attempt = 1;

        loop {
            let token = match self.tokens.get_valid_token().await {
                Ok(token) => token,
                Err(e) => {
                    warn!("No usable {} token: {}", self.tokens.source().grant_name(), e);
                    return Err(ApiError::AuthenticationFailed);
                }
            };

            let response = self.send(spec, &url, auth_header, &token, timeout).await?;
            let status = response.status();

            if status.is_success() {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| transport_error(e, timeout))?;
                debug!("{} {} -> {} ({} bytes)", spec.method, url, status, body.len());
                return decode(&body).map_err(ApiError::from);
            }

            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                if attempt < self.config.max_attempts {
                    info!(
                        "{} {} rejected with {}, refreshing token (attempt {}/{})",
                        spec.method, url, status, attempt, self.config.max_attempts
                    );
                    self.tokens.invalidate();
                    attempt += 1;
                    continue;
                }

                warn!("{} {} still rejected with {} after token refresh", spec.method, url, status);
                return Err(ApiError::AuthenticationFailed);
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.trim().parse::<u64>().ok())
                    .map(Duration::from_secs);
                warn!("{} {} rate limited", spec.method, url);
                return Err(ApiError::RateLimited { retry_after });
            }

            let body = match response.text().await {
                Ok(body) => error_detail(&body),
                Err(e) => {
                    debug!("Failed to read error body of {} {}: {}", spec.method, url, e);
                    format!("failed to read response body: {}", e)
                }
            };
            return Err(ApiError::HttpError {
                status: status.as_u16(),
                body,
            });
        }
    }

    /// Perform a call and decode the body as `T`.
    pub async fn execute_json<T: DeserializeOwned>(&self, spec: &RequestSpec) -> Result<T, ApiError> {
        self.execute(spec, decode_json::<T>).await
    }

    /// Perform a call and decode a bare or wrapped record list.
    pub async fn execute_list<T: DeserializeOwned>(
        &self,
        spec: &RequestSpec,
        decoder: &ResponseDecoder,
    ) -> Result<Vec<T>, ApiError> {
        self.execute(spec, |body| decoder.decode_list(body)).await
    }

    /// Perform a call whose 2xx body is ignored.
    pub async fn execute_empty(&self, spec: &RequestSpec) -> Result<(), ApiError> {
        self.execute(spec, |_| Ok(())).await
    }

    async fn send(
        &self,
        spec: &RequestSpec,
        url: &Url,
        auth_header: &AuthHeader,
        token: &AccessToken,
        timeout: Duration,
    ) -> Result<reqwest::Response, ApiError> {
        let (name, value) = auth_header.to_header(token)?;

        let mut request = self
            .http
            .request(spec.method.clone(), url.clone())
            .header(name, value)
            .timeout(timeout);

        request = match &spec.body {
            Some(RequestBody::Json(body)) => request.json(body),
            Some(RequestBody::Form(fields)) => request.form(fields),
            None => request,
        };

        request.send().await.map_err(|e| transport_error(e, timeout))
    }

    fn resolve_url(&self, spec: &RequestSpec) -> Result<Url, ApiError> {
        let mut url = if is_absolute(&spec.path) {
            parse_http_url(&spec.path)?
        } else {
            let joined = format!(
                "{}/{}",
                self.base_url.as_str().trim_end_matches('/'),
                spec.path.trim_start_matches('/')
            );
            Url::parse(&joined).map_err(|e| ApiError::InvalidUrl(format!("{}: {}", joined, e)))?
        };

        if !spec.query.is_empty() {
            url.query_pairs_mut().extend_pairs(spec.query.iter());
        }

        Ok(url)
    }
}

impl<S: TokenSource> std::fmt::Debug for ApiClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("auth_header", &self.config.auth_header.name)
            .field("timeout", &self.config.timeout)
            .field("max_attempts", &self.config.max_attempts)
            .finish()
    }
}

fn is_absolute(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

fn parse_http_url(raw: &str) -> Result<Url, ApiError> {
    let url = Url::parse(raw).map_err(|e| ApiError::InvalidUrl(format!("{}: {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ApiError::InvalidUrl(format!("{}: unsupported scheme {:?}", raw, other))),
    }
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout(timeout)
    } else if err.is_builder() {
        ApiError::InvalidRequest(err.to_string())
    } else {
        ApiError::NetworkError(err.to_string())
    }
}

/// Extract a human-readable excerpt from an error body.
///
/// Structured messages win over raw text: the `{"error": {"message": ..}}`
/// shape, then OAuth-style `error_description` and `error`, then a top-level
/// `message`. The result is truncated to 512 characters.
pub fn error_detail(body: &str) -> String {
    let detail = match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => structured_message(&value).unwrap_or_else(|| body.trim().to_string()),
        Err(_) => body.trim().to_string(),
    };

    if detail.chars().count() > MAX_ERROR_DETAIL_CHARS {
        detail.chars().take(MAX_ERROR_DETAIL_CHARS).collect()
    } else {
        detail
    }
}

fn structured_message(value: &serde_json::Value) -> Option<String> {
    if let Some(message) = value.as_str() {
        return Some(message.to_string());
    }

    let nested = value
        .get("error")
        .and_then(|error| error.get("message"))
        .and_then(|message| message.as_str());

    nested
        .or_else(|| value.get("error_description").and_then(|v| v.as_str()))
        .or_else(|| value.get("error").and_then(|v| v.as_str()))
        .or_else(|| value.get("message").and_then(|v| v.as_str()))
        .map(str::to_string)
}
