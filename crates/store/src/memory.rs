//! In-memory key/value store.

use crate::KeyValueStore;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory key/value store.
///
/// Values live in a `HashMap` behind a [`RwLock`], so all trait methods can
/// operate on `&self` without external synchronisation. Nothing survives the
/// process; use [`SqliteStore`](crate::SqliteStore) for crash recovery.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}
impl MemoryStore {
    /// Create a store pre-populated with raw (JSON) values.
    pub fn with_entries(entries: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>) -> Self {
        let entries = entries.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Self { entries: RwLock::new(entries) }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set_raw(&self, key: &str, value: String) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = MemoryStore::default();
        store.set_raw("k", "1".to_string()).await.unwrap();
        assert_eq!(store.get_raw("k").await.unwrap().as_deref(), Some("1"));
        store.set_raw("k", "2".to_string()).await.unwrap();
        assert_eq!(store.get_raw("k").await.unwrap().as_deref(), Some("2"));
        store.remove("k").await.unwrap();
        assert_eq!(store.get_raw("k").await.unwrap(), None);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_remove_missing_is_ok() {
        let store = MemoryStore::default();
        assert!(store.remove("missing").await.is_ok());
    }

    #[tokio::test]
    async fn test_with_entries() {
        let store = MemoryStore::with_entries([("a", "1"), ("b", "2")]);
        assert_eq!(store.len().await, 2);
        assert_eq!(store.get_raw("b").await.unwrap().as_deref(), Some("2"));
    }
}
