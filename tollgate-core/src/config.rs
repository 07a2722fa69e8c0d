//! Per-integration configuration.
//!
//! An [`IntegrationConfig`] describes one upstream API: which grant it uses,
//! where its token and data endpoints live, and how the token is presented.
//! It is plain serde data so the CLI can load it from TOML.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::client::{ApiClientConfig, AuthHeader, DEFAULT_MAX_ATTEMPTS};
use crate::oauth::{ClientCredentialsSource, PkceConfig, PkceSource};
use crate::secret::Secret;
use crate::token::TokenSource;
use crate::token_cache::{DEFAULT_SAFETY_MARGIN_SECS, TokenCache};

/// Error type for configuration problems.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required field `{field}`")]
    MissingField { field: &'static str },

    #[error("invalid URL in `{field}`: {message}")]
    InvalidUrl { field: &'static str, message: String },

    #[error("invalid value for `{field}`: {message}")]
    InvalidValue { field: &'static str, message: String },

    #[error("environment variable {variable} is not set")]
    MissingSecret { variable: String },
}

/// OAuth2 grant used to obtain tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantKind {
    #[default]
    ClientCredentials,
    Pkce,
}

impl std::fmt::Display for GrantKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClientCredentials => write!(f, "client_credentials"),
            Self::Pkce => write!(f, "pkce"),
        }
    }
}

/// Configuration for one API integration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationConfig {
    #[serde(default)]
    pub grant: GrantKind,

    /// Base URL of the data endpoints.
    pub base_url: String,

    pub token_url: String,

    /// Authorization endpoint (PKCE only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,

    pub client_id: String,

    /// Inline client secret. Prefer `client_secret_env`.
    #[serde(default, skip_serializing)]
    pub client_secret: Option<Secret>,

    /// Name of an environment variable holding the client secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret_env: Option<String>,

    /// Redirect URI registered for the PKCE client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,

    #[serde(default)]
    pub scopes: Vec<String>,

    #[serde(default = "default_auth_header_name")]
    pub auth_header_name: String,

    /// Header value template; `{token}` is replaced with the access token.
    #[serde(default = "default_auth_header_format")]
    pub auth_header_format: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_safety_margin_secs")]
    pub safety_margin_secs: u64,
}

fn default_auth_header_name() -> String {
    "Authorization".to_string()
}

fn default_auth_header_format() -> String {
    "Bearer {token}".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

/// Largest accepted `safety_margin_secs` (one day).
pub const MAX_SAFETY_MARGIN_SECS: u64 = 86_400;

fn default_safety_margin_secs() -> u64 {
    DEFAULT_SAFETY_MARGIN_SECS as u64
}

impl IntegrationConfig {
    /// A client-credentials integration with default header and timing settings.
    pub fn client_credentials(
        base_url: impl Into<String>,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<Secret>,
    ) -> Self {
        Self {
            grant: GrantKind::ClientCredentials,
            base_url: base_url.into(),
            token_url: token_url.into(),
            auth_url: None,
            client_id: client_id.into(),
            client_secret: Some(client_secret.into()),
            client_secret_env: None,
            redirect_uri: None,
            scopes: Vec::new(),
            auth_header_name: default_auth_header_name(),
            auth_header_format: default_auth_header_format(),
            timeout_secs: default_timeout_secs(),
            safety_margin_secs: default_safety_margin_secs(),
        }
    }

    /// A PKCE integration for a public client.
    pub fn pkce(
        base_url: impl Into<String>,
        auth_url: impl Into<String>,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            grant: GrantKind::Pkce,
            base_url: base_url.into(),
            token_url: token_url.into(),
            auth_url: Some(auth_url.into()),
            client_id: client_id.into(),
            client_secret: None,
            client_secret_env: None,
            redirect_uri: Some(redirect_uri.into()),
            scopes: Vec::new(),
            auth_header_name: default_auth_header_name(),
            auth_header_format: default_auth_header_format(),
            timeout_secs: default_timeout_secs(),
            safety_margin_secs: default_safety_margin_secs(),
        }
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn with_auth_header(mut self, header: AuthHeader) -> Self {
        self.auth_header_name = header.name;
        self.auth_header_format = header.format;
        self
    }

    /// Check that every field the configured grant needs is present and well formed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_url("base_url", &self.base_url)?;
        check_url("token_url", &self.token_url)?;
        if let Some(auth_url) = &self.auth_url {
            check_url("auth_url", auth_url)?;
        }

        if self.client_id.trim().is_empty() {
            return Err(ConfigError::MissingField { field: "client_id" });
        }
        if self.auth_header_name.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "auth_header_name",
            });
        }
        if !self.auth_header_format.contains("{token}") {
            return Err(ConfigError::InvalidValue {
                field: "auth_header_format",
                message: "must contain the {token} placeholder".to_string(),
            });
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "timeout_secs",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.safety_margin_secs > MAX_SAFETY_MARGIN_SECS {
            return Err(ConfigError::InvalidValue {
                field: "safety_margin_secs",
                message: format!("must be at most {}", MAX_SAFETY_MARGIN_SECS),
            });
        }

        match self.grant {
            GrantKind::ClientCredentials => {
                if self.client_secret.is_none() && self.client_secret_env.is_none() {
                    return Err(ConfigError::MissingField {
                        field: "client_secret",
                    });
                }
            }
            GrantKind::Pkce => {
                if self.auth_url.is_none() {
                    return Err(ConfigError::MissingField { field: "auth_url" });
                }
                if self.redirect_uri.is_none() {
                    return Err(ConfigError::MissingField {
                        field: "redirect_uri",
                    });
                }
            }
        }

        Ok(())
    }

    /// Resolve the client secret, reading `client_secret_env` if needed.
    pub fn client_secret(&self) -> Result<Secret, ConfigError> {
        if let Some(secret) = &self.client_secret {
            return Ok(secret.clone());
        }

        match &self.client_secret_env {
            Some(variable) => std::env::var(variable)
                .map(Secret::new)
                .map_err(|_| ConfigError::MissingSecret {
                    variable: variable.clone(),
                }),
            None => Err(ConfigError::MissingField {
                field: "client_secret",
            }),
        }
    }

    pub fn auth_header(&self) -> AuthHeader {
        AuthHeader::custom(&self.auth_header_name, &self.auth_header_format)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Safety margin for the token cache, capped at [`MAX_SAFETY_MARGIN_SECS`].
    pub fn safety_margin(&self) -> chrono::Duration {
        let secs = self.safety_margin_secs.min(MAX_SAFETY_MARGIN_SECS);
        i64::try_from(secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or_else(|| chrono::Duration::seconds(DEFAULT_SAFETY_MARGIN_SECS))
    }

    /// Settings for an [`ApiClient`](crate::ApiClient) talking to this integration.
    pub fn api_client_config(&self) -> ApiClientConfig {
        ApiClientConfig::new(&self.base_url)
            .with_auth_header(self.auth_header())
            .with_timeout(self.timeout())
            .with_max_attempts(DEFAULT_MAX_ATTEMPTS)
    }

    /// Build the client-credentials token source.
    pub fn client_credentials_source(&self) -> Result<ClientCredentialsSource, ConfigError> {
        Ok(
            ClientCredentialsSource::new(&self.token_url, &self.client_id, self.client_secret()?)
                .with_scopes(self.scopes.clone())
                .with_timeout(self.timeout()),
        )
    }

    /// PKCE endpoints for this integration.
    pub fn pkce_config(&self) -> Result<PkceConfig, ConfigError> {
        let auth_url = self
            .auth_url
            .as_ref()
            .ok_or(ConfigError::MissingField { field: "auth_url" })?;
        let redirect_uri = self
            .redirect_uri
            .as_ref()
            .ok_or(ConfigError::MissingField {
                field: "redirect_uri",
            })?;

        Ok(
            PkceConfig::new(&self.client_id, auth_url, &self.token_url, redirect_uri)
                .with_timeout(self.timeout()),
        )
    }

    pub fn pkce_source(&self) -> Result<PkceSource, ConfigError> {
        Ok(PkceSource::new(self.pkce_config()?))
    }

    /// Build the token source for the configured grant.
    pub fn token_source(&self) -> Result<Arc<dyn TokenSource>, ConfigError> {
        Ok(match self.grant {
            GrantKind::ClientCredentials => Arc::new(self.client_credentials_source()?),
            GrantKind::Pkce => Arc::new(self.pkce_source()?),
        })
    }

    /// Wrap `source` in a cache using this integration's safety margin.
    pub fn token_cache<S: TokenSource>(&self, source: S) -> TokenCache<S> {
        TokenCache::new(source).with_safety_margin(self.safety_margin())
    }
}

fn check_url(field: &'static str, raw: &str) -> Result<(), ConfigError> {
    if raw.trim().is_empty() {
        return Err(ConfigError::MissingField { field });
    }

    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        field,
        message: format!("{}: {}", raw, e),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::InvalidUrl {
            field,
            message: format!("{}: unsupported scheme {:?}", raw, other),
        }),
    }
}
