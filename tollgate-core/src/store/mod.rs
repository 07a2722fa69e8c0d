//! Token persistence between process runs.
//!
//! A [`TokenCache`](crate::TokenCache) with a store attached writes its
//! [`StoredTokens`] after every successful fetch and deletes them on logout.
//! [`MemoryStore`] backs the tests; [`KeyringStore`] (feature `keyring-store`)
//! backs the CLI. [`create_store`] picks one.
//!
//! Each integration persists under its own key (the CLI uses the integration
//! name). One key holds the whole token set as JSON.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::secret::Secret;
use crate::token::AccessToken;

mod memory;
#[cfg(feature = "keyring-store")]
mod keyring;

pub use memory::MemoryStore;
#[cfg(feature = "keyring-store")]
pub use keyring::KeyringStore;

/// Error type for token store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    BackendError { message: String },

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The keyring backend is not available.
    #[error("keyring not available: {message}")]
    KeyringUnavailable { message: String },
}

/// Everything a [`TokenCache`](crate::TokenCache) needs to resume after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTokens {
    pub access_token: Option<Secret>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub refresh_token: Option<Secret>,
}

impl StoredTokens {
    pub fn new(access: Option<&AccessToken>, refresh_token: Option<&Secret>) -> Self {
        Self {
            access_token: access.map(|t| t.value.clone()),
            expires_at: access.map(|t| t.expires_at),
            scopes: access.map(|t| t.scopes.clone()).unwrap_or_default(),
            refresh_token: refresh_token.cloned(),
        }
    }

    /// Rebuild the access token, if both value and expiry were stored.
    pub fn access(&self) -> Option<AccessToken> {
        match (&self.access_token, self.expires_at) {
            (Some(value), Some(expires_at)) => Some(
                AccessToken::new(value.clone(), expires_at).with_scopes(self.scopes.clone()),
            ),
            _ => None,
        }
    }
}

/// Abstraction over token persistence backends.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Load the token set stored under `key`.
    ///
    /// Returns `Ok(None)` if nothing is stored.
    async fn load(&self, key: &str) -> Result<Option<StoredTokens>, StoreError>;

    /// Store a token set, replacing any previous value.
    async fn save(&self, key: &str, tokens: &StoredTokens) -> Result<(), StoreError>;

    /// Remove the token set under `key`.
    ///
    /// Returns `Ok(())` even if the key didn't exist.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Create a token store with automatic backend selection.
///
/// If `prefer_keyring` is `true` and the `keyring-store` feature is enabled,
/// tries the OS keyring first and falls back to [`MemoryStore`] with a warning.
pub fn create_store(prefer_keyring: bool) -> Box<dyn TokenStore> {
    #[cfg(feature = "keyring-store")]
    if prefer_keyring {
        match KeyringStore::try_new("tollgate") {
            Ok(store) => {
                tracing::info!("Using OS keyring for token storage");
                return Box::new(store);
            }
            Err(e) => {
                tracing::warn!(
                    "Keyring unavailable ({}), falling back to memory store. \
                     Tokens will not persist across restarts.",
                    e
                );
            }
        }
    }

    #[cfg(not(feature = "keyring-store"))]
    if prefer_keyring {
        tracing::warn!(
            "Keyring storage requested but keyring-store feature not enabled. \
             Using memory store."
        );
    }

    Box::new(MemoryStore::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_stored_tokens_round_trip_access() {
        let expires_at = Utc::now() + Duration::hours(1);
        let access = AccessToken::new("a", expires_at).with_scopes(vec!["read".to_string()]);
        let refresh = Secret::new("r");

        let stored = StoredTokens::new(Some(&access), Some(&refresh));
        assert_eq!(stored.access(), Some(access));
        assert_eq!(stored.refresh_token, Some(refresh));
    }

    #[test]
    fn test_stored_tokens_refresh_only() {
        let stored = StoredTokens::new(None, Some(&Secret::new("r")));
        assert!(stored.access().is_none());
        assert!(stored.scopes.is_empty());
    }

    #[test]
    fn test_create_store_memory() {
        // Without keyring preference we always get an in-memory store.
        let _store = create_store(false);
    }
}
