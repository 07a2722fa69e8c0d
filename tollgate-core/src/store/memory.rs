//! In-memory token storage.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{StoreError, StoredTokens, TokenStore};

/// In-memory token store for testing and short-lived processes.
///
/// Values are kept as serialized JSON so the store exercises the same
/// encoding path as persistent backends.
pub struct MemoryStore {
    data: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("keys_count", &self.len())
            .finish()
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<StoredTokens>, StoreError> {
        let data = self.data.read();
        match data.get(key) {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, key: &str, tokens: &StoredTokens) -> Result<(), StoreError> {
        let json = serde_json::to_string(tokens)?;
        self.data.write().insert(key.to_string(), json);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.data.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::Secret;

    #[tokio::test]
    async fn test_memory_store_save_load_remove() {
        let store = MemoryStore::new();
        let tokens = StoredTokens::new(None, Some(&Secret::new("refresh")));

        store.save("tollgate/spotify", &tokens).await.unwrap();
        assert_eq!(store.len(), 1);

        let loaded = store.load("tollgate/spotify").await.unwrap();
        assert_eq!(loaded, Some(tokens));

        store.remove("tollgate/spotify").await.unwrap();
        assert!(store.load("tollgate/spotify").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_remove_missing_is_ok() {
        let store = MemoryStore::new();
        assert!(store.remove("nothing-here").await.is_ok());
    }
}
