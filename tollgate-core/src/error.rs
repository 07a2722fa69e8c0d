//! Top-level error types for Tollgate.

use thiserror::Error;

use crate::client::ApiError;
use crate::config::ConfigError;
use crate::decode::DecodeError;
use crate::store::StoreError;
use crate::token::AuthError;

/// Top-level error type encompassing all Tollgate errors.
#[derive(Debug, Error)]
pub enum TollgateError {
    /// Error while obtaining a token.
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    /// Error from an API call.
    #[error("api error: {0}")]
    Api(#[from] ApiError),

    /// Error decoding a response body outside of an API call.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Error from token persistence.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}
