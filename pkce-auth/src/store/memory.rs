//! In-process store, used in tests and by clients that never leave the process.

use async_trait::async_trait;
use dashmap::DashMap;

use super::KeyValueStore;
use crate::error::Error;

/// `KeyValueStore` backed by a concurrent hash map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        self.entries.remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, Error> {
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn take(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.entries.remove(key).map(|(_, v)| v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new();
        store.set("pkce:google", "value").await.unwrap();
        assert_eq!(
            store.get("pkce:google").await.unwrap(),
            Some("value".to_string())
        );

        store.delete("pkce:google").await.unwrap();
        assert!(store.get("pkce:google").await.unwrap().is_none());
        // Deleting again is fine
        store.delete("pkce:google").await.unwrap();
    }

    #[tokio::test]
    async fn test_take_removes_value() {
        let store = MemoryStore::new();
        store.set("k", "v").await.unwrap();
        assert_eq!(store.take("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(store.take("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_keys_by_prefix() {
        let store = MemoryStore::new();
        store.set("pkce:google", "a").await.unwrap();
        store.set("pkce:github", "b").await.unwrap();
        store.set("other", "c").await.unwrap();

        let mut keys = store.keys("pkce:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["pkce:github", "pkce:google"]);
    }
}
