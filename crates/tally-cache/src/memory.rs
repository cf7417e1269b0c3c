//! In-memory backing store

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::cache::SetOptions;
use crate::error::CacheError;
use crate::store::CacheStore;

/// A process-local backing store.
///
/// Entries live until removed; `ttl` is not supported and silently
/// ignored.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn retrieve(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn store(
        &self,
        key: &str,
        value: Option<String>,
        _options: &SetOptions,
    ) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        match value {
            Some(value) => {
                entries.insert(key.to_string(), value);
            }
            None => {
                entries.remove(key);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stores_and_retrieves() {
        let store = MemoryStore::new();

        store
            .store("k", Some("\"v\"".to_string()), &SetOptions::default())
            .await
            .unwrap();

        assert_eq!(
            store.retrieve("k").await.unwrap(),
            Some("\"v\"".to_string())
        );
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn none_value_deletes() {
        let store = MemoryStore::new();

        store
            .store("k", Some("1".to_string()), &SetOptions::default())
            .await
            .unwrap();
        store.store("k", None, &SetOptions::default()).await.unwrap();

        assert_eq!(store.retrieve("k").await.unwrap(), None);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let store = MemoryStore::new();
        assert_eq!(store.retrieve("absent").await.unwrap(), None);
    }
}
