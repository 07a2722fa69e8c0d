//! Single-slot access token cache with lazy refresh.
//!
//! [`TokenCache`] owns one [`TokenSource`] and at most one [`AccessToken`].
//! [`get_valid_token`](TokenCache::get_valid_token) returns the cached token
//! without I/O while it is usable, and otherwise asks the source for a new one.
//!
//! # Refresh coordination
//!
//! Refreshes are serialised behind an async mutex. A caller that finds the
//! cache stale takes the lock, re-checks the slot, and only then hits the
//! token endpoint, so concurrent callers share one in-flight request instead
//! of each exchanging credentials. This matters for PKCE, where the
//! authorization code is single-use.
//!
//! The token slot is only written after a complete, successful response.
//! A cancelled or failed fetch leaves the previous state untouched.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use tollgate_core::{ClientCredentialsSource, TokenCache};
//!
//! let source = ClientCredentialsSource::new(
//!     "https://auth.example.com/as/token",
//!     "client-id",
//!     "client-secret",
//! );
//! let cache = TokenCache::new(source);
//!
//! let token = cache.get_valid_token().await?;
//! println!("expires at {}", token.expires_at);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use chrono::Duration;
use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::secret::Secret;
use crate::store::{StoreError, StoredTokens, TokenStore};
use crate::token::{AccessToken, AuthError, TokenSource};

/// Default safety margin in seconds.
///
/// Tokens are treated as expired this long before their real expiry so a
/// request in flight does not race the server's clock.
pub const DEFAULT_SAFETY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Default)]
struct CacheState {
    access: Option<AccessToken>,
    refresh_token: Option<Secret>,
}

struct Persistence {
    store: Arc<dyn TokenStore>,
    key: String,
}

/// Access token cache for one API integration.
///
/// # Type Parameters
///
/// * `S` - The token source (grant) used to obtain new tokens
pub struct TokenCache<S: TokenSource> {
    source: S,
    state: RwLock<CacheState>,
    refresh_lock: Mutex<()>,
    safety_margin: Duration,
    clock: Arc<dyn Clock>,
    persistence: Option<Persistence>,
}

impl<S: TokenSource> TokenCache<S> {
    /// Create an empty cache using the system clock and the default safety margin.
    pub fn new(source: S) -> Self {
        Self {
            source,
            state: RwLock::new(CacheState::default()),
            refresh_lock: Mutex::new(()),
            safety_margin: Duration::seconds(DEFAULT_SAFETY_MARGIN_SECS),
            clock: Arc::new(SystemClock),
            persistence: None,
        }
    }

    /// Override the safety margin.
    pub fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = margin;
        self
    }

    /// Use a custom clock for expiry decisions.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Persist the token set to `store` under `key` after every successful fetch.
    pub fn with_store(mut self, store: Arc<dyn TokenStore>, key: impl Into<String>) -> Self {
        self.persistence = Some(Persistence {
            store,
            key: key.into(),
        });
        self
    }

    /// The token source backing this cache.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// The configured safety margin.
    pub fn safety_margin(&self) -> Duration {
        self.safety_margin
    }

    /// Return a usable token, fetching a new one if the cache is empty or stale.
    ///
    /// # Errors
    ///
    /// Returns the source's [`AuthError`] if a fetch was needed and failed.
    /// The cache keeps whatever it held before the failed fetch.
    pub async fn get_valid_token(&self) -> Result<AccessToken, AuthError> {
        if let Some(token) = self.usable_token() {
            tracing::debug!("Using cached {} token", self.source.grant_name());
            return Ok(token);
        }

        let _refresh = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited for the lock.
        if let Some(token) = self.usable_token() {
            tracing::debug!(
                "Using {} token refreshed by a concurrent caller",
                self.source.grant_name()
            );
            return Ok(token);
        }

        let refresh_token = self.state.read().refresh_token.clone();

        tracing::info!("Requesting new {} token", self.source.grant_name());

        let grant = match self.source.request_token(refresh_token.as_ref()).await {
            Ok(grant) => grant,
            Err(e) => {
                tracing::warn!("Failed to obtain {} token: {}", self.source.grant_name(), e);
                return Err(e);
            }
        };

        let token = match AccessToken::from_grant(&grant, self.clock.now()) {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!("Rejected {} token: {}", self.source.grant_name(), e);
                return Err(e);
            }
        };
        let snapshot = {
            let mut state = self.state.write();
            state.access = Some(token.clone());
            if let Some(new_refresh) = grant.refresh_token {
                state.refresh_token = Some(new_refresh);
            }
            StoredTokens::new(state.access.as_ref(), state.refresh_token.as_ref())
        };

        tracing::info!(
            "Obtained {} token expiring at {}",
            self.source.grant_name(),
            token.expires_at
        );

        self.persist(&snapshot).await;

        Ok(token)
    }

    /// Drop the cached access token so the next call fetches a new one.
    ///
    /// The refresh token, if any, is kept for the next fetch.
    pub fn invalidate(&self) {
        self.state.write().access = None;
        tracing::debug!("Invalidated cached {} token", self.source.grant_name());
    }

    /// Forget every token and remove the persisted copy (logout).
    pub async fn clear(&self) -> Result<(), StoreError> {
        {
            let mut state = self.state.write();
            state.access = None;
            state.refresh_token = None;
        }

        if let Some(persistence) = &self.persistence {
            persistence.store.remove(&persistence.key).await?;
        }

        tracing::info!("Cleared {} tokens", self.source.grant_name());
        Ok(())
    }

    /// Load a previously persisted token set into the cache.
    ///
    /// Returns `true` if something was restored.
    pub async fn restore(&self) -> Result<bool, StoreError> {
        let Some(persistence) = &self.persistence else {
            return Ok(false);
        };

        let Some(stored) = persistence.store.load(&persistence.key).await? else {
            return Ok(false);
        };

        let mut state = self.state.write();
        state.access = stored.access();
        state.refresh_token = stored.refresh_token.clone();

        tracing::debug!("Restored {} tokens from {}", self.source.grant_name(), persistence.key);
        Ok(true)
    }

    /// Seed the cache with an externally obtained token.
    pub fn set_token(&self, token: AccessToken) {
        self.state.write().access = Some(token);
    }

    /// The cached access token, usable or not.
    pub fn current_token(&self) -> Option<AccessToken> {
        self.state.read().access.clone()
    }

    /// Whether a refresh token is available.
    pub fn has_refresh_token(&self) -> bool {
        self.state.read().refresh_token.is_some()
    }

    fn usable_token(&self) -> Option<AccessToken> {
        let now = self.clock.now();
        self.state
            .read()
            .access
            .as_ref()
            .filter(|token| token.is_usable(now, self.safety_margin))
            .cloned()
    }

    async fn persist(&self, snapshot: &StoredTokens) {
        if let Some(persistence) = &self.persistence {
            if let Err(e) = persistence.store.save(&persistence.key, snapshot).await {
                tracing::warn!("Failed to persist tokens to {}: {}", persistence.key, e);
            }
        }
    }
}

impl<S: TokenSource> std::fmt::Debug for TokenCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("TokenCache")
            .field("grant", &self.source.grant_name())
            .field("has_access_token", &state.access.is_some())
            .field("has_refresh_token", &state.refresh_token.is_some())
            .field("safety_margin", &self.safety_margin)
            .finish()
    }
}
