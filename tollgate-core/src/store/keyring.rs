//! OS keyring-backed token storage.

use async_trait::async_trait;
use keyring::Entry;

use super::{StoreError, StoredTokens, TokenStore};

/// OS keyring-backed token store.
///
/// Uses the platform's native keyring service (Keychain on macOS, Secret
/// Service on Linux, Credential Manager on Windows). Each key maps to one
/// keyring entry holding the token set as JSON.
pub struct KeyringStore {
    service_name: String,
}

impl KeyringStore {
    /// Try to create a new keyring store.
    ///
    /// Returns an error if the keyring backend is not available on this platform.
    pub fn try_new(service_name: &str) -> Result<Self, StoreError> {
        let probe = format!("{}/__probe__", service_name);
        match Entry::new(&probe, "availability_check") {
            Ok(_) => Ok(Self {
                service_name: service_name.to_string(),
            }),
            Err(e) => Err(StoreError::KeyringUnavailable {
                message: e.to_string(),
            }),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, StoreError> {
        Entry::new(&self.service_name, key).map_err(|e| StoreError::BackendError {
            message: format!("failed to create keyring entry: {}", e),
        })
    }
}

impl std::fmt::Debug for KeyringStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyringStore")
            .field("service_name", &self.service_name)
            .finish()
    }
}

#[async_trait]
impl TokenStore for KeyringStore {
    async fn load(&self, key: &str) -> Result<Option<StoredTokens>, StoreError> {
        match self.entry(key)?.get_password() {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StoreError::BackendError {
                message: format!("keyring read failed for {}: {}", key, e),
            }),
        }
    }

    async fn save(&self, key: &str, tokens: &StoredTokens) -> Result<(), StoreError> {
        let json = serde_json::to_string(tokens)?;
        self.entry(key)?
            .set_password(&json)
            .map_err(|e| StoreError::BackendError {
                message: format!("keyring write failed for {}: {}", key, e),
            })
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StoreError::BackendError {
                message: format!("keyring delete failed for {}: {}", key, e),
            }),
        }
    }
}
