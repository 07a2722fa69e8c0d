//! # Tollgate Core
//!
//! Shared plumbing for thin clients over OAuth2-protected REST APIs.
//!
//! This crate provides:
//! - [`TokenCache`] - a single-slot access token cache with lazy refresh
//! - [`ApiClient`] - authenticated requests with one retry after an auth failure
//! - [`ResponseDecoder`] - list decoding that tolerates bare and wrapped arrays
//! - Token sources for the client-credentials and PKCE grants
//! - Typed wrappers for the Fannie Mae and Spotify endpoints
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tollgate_core::{ApiClient, ApiClientConfig, AuthHeader, RequestSpec, TokenCache};
//! use tollgate_core::oauth::ClientCredentialsSource;
//!
//! async fn fetch() -> Result<serde_json::Value, tollgate_core::ApiError> {
//!     let source = ClientCredentialsSource::new("https://auth.example.com/token", "id", "secret");
//!     let tokens = Arc::new(TokenCache::new(source));
//!     let config = ApiClientConfig::new("https://api.example.com")
//!         .with_auth_header(AuthHeader::raw("x-public-access-token"));
//!     let client = ApiClient::new(config, tokens)?;
//!     client.execute_json(&RequestSpec::get("/v1/things")).await
//! }
//! ```

pub mod clock;
pub mod secret;
pub mod store;
pub mod token;
pub mod token_cache;
pub mod oauth;
pub mod decode;
pub mod client;
pub mod config;
pub mod integrations;
pub mod error;

// Re-export commonly used types at crate root
pub use clock::{Clock, ManualClock, SystemClock};

pub use secret::Secret;

pub use store::{
    MemoryStore,
    StoreError,
    StoredTokens,
    TokenStore,
    create_store,
};

#[cfg(feature = "keyring-store")]
pub use store::KeyringStore;

pub use token::{
    AccessToken,
    AuthError,
    TokenGrant,
    TokenSource,
};

pub use token_cache::{TokenCache, DEFAULT_SAFETY_MARGIN_SECS};

pub use oauth::{ClientCredentialsSource, PkceFlow, PkceSource};

pub use decode::{DecodeError, ResponseDecoder};

pub use client::{
    ApiClient,
    ApiClientConfig,
    ApiError,
    AuthHeader,
    RequestBody,
    RequestSpec,
};

pub use config::{ConfigError, GrantKind, IntegrationConfig};

pub use integrations::{FannieMaeApi, SpotifyApi};

pub use error::TollgateError;
