//! Persisted key/value store.
//!
//! The rename engine persists a single document per operation (its progress
//! through a batch) so that an interrupted batch can be resumed later. This
//! crate provides the storage abstraction for that document and two
//! implementations:
//!
//! - [`SqliteStore`]: durable, survives process restarts.
//! - [`MemoryStore`]: ephemeral, for tests and for callers that persist
//!   elsewhere.
//!
//! Values are stored as JSON text; the [`TypedStore`] extension trait
//! (implemented for every [`KeyValueStore`]) handles encoding and decoding.

pub mod error;
mod memory;
mod sqlite;

pub use crate::memory::MemoryStore;
pub use crate::sqlite::SqliteStore;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

pub type StoreHandle = Arc<dyn KeyValueStore + Send + Sync>;

/// Raw key/value storage.
///
/// Implementations assume a single writer per key; there is no locking or
/// compare-and-swap protocol.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch the raw value stored under `key`.
    async fn get_raw(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set_raw(&self, key: &str, value: String) -> Result<()>;

    /// Remove `key`. Removing a key that doesn't exist is not an error.
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Typed access to a [`KeyValueStore`], encoding values as JSON.
///
/// # Examples
///
/// ```
/// use relabel_store::{MemoryStore, TypedStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = MemoryStore::default();
/// store.set("answer", &42_u32).await.unwrap();
/// assert_eq!(store.get::<u32>("answer").await.unwrap(), Some(42));
/// # }
/// ```
#[async_trait]
pub trait TypedStore {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>>;
    async fn set<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<()>;
}

#[async_trait]
impl<S: KeyValueStore + ?Sized> TypedStore for S {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.get_raw(key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw).map(Some).or_raise(|| ErrorKind::InvalidData(key.to_string()))
    }

    async fn set<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value).or_raise(|| ErrorKind::Serialize(key.to_string()))?;
        self.set_raw(key, raw).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Progress {
        done: Vec<usize>,
        label: String,
    }

    #[tokio::test]
    async fn test_typed_round_trip_through_handle() {
        let store: StoreHandle = Arc::new(MemoryStore::default());
        let value = Progress { done: vec![0, 2], label: "batch".to_string() };
        store.set("progress", &value).await.unwrap();
        assert_eq!(store.get::<Progress>("progress").await.unwrap(), Some(value));
    }

    #[tokio::test]
    async fn test_typed_get_missing_key() {
        let store = MemoryStore::default();
        assert_eq!(store.get::<Progress>("nothing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_typed_get_corrupt_value() {
        let store = MemoryStore::default();
        store.set_raw("progress", "{not json".to_string()).await.unwrap();
        let err = store.get::<Progress>("progress").await.unwrap_err();
        assert_eq!(*err, ErrorKind::InvalidData("progress".to_string()));
    }
}
