//! Key-value persistence abstraction
//!
//! `KeyValueStore` is the only seam between the dispatcher and durable
//! storage. Methods return boxed futures so the trait stays dyn-compatible and
//! can be shared as `Arc<dyn KeyValueStore>`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::Mutex;

use crate::error::Result;

/// Boxed future returned by every `KeyValueStore` operation.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Durable string key-value storage.
///
/// Every operation is a suspension point. Implementations must make
/// `set_many` all-or-nothing with respect to readers of the same instance.
pub trait KeyValueStore: Send + Sync {
    /// Read a single value. Missing keys are `Ok(None)`.
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

    /// Write a single value, replacing any previous one.
    fn set<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, ()>;

    /// Remove all listed keys. Keys that are not present are ignored.
    fn remove<'a>(&'a self, keys: &'a [&'a str]) -> StoreFuture<'a, ()>;

    /// Write several values in one operation.
    fn set_many<'a>(&'a self, pairs: Vec<(&'a str, String)>) -> StoreFuture<'a, ()>;
}

/// In-process store. Contents are lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move { Ok(self.entries.lock().await.get(key).cloned()) })
    }

    fn set<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.entries.lock().await.insert(key.to_string(), value);
            Ok(())
        })
    }

    fn remove<'a>(&'a self, keys: &'a [&'a str]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut entries = self.entries.lock().await;
            for key in keys {
                entries.remove(*key);
            }
            Ok(())
        })
    }

    fn set_many<'a>(&'a self, pairs: Vec<(&'a str, String)>) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut entries = self.entries.lock().await;
            for (key, value) in pairs {
                entries.insert(key.to_string(), value);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_missing_key_is_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get("access_token").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_then_get() {
        let store = MemoryStore::new();
        store.set("user_id", "u-42".into()).await.unwrap();
        assert_eq!(store.get("user_id").await.unwrap().as_deref(), Some("u-42"));
    }

    #[tokio::test]
    async fn set_many_writes_every_pair() {
        let store = MemoryStore::new();
        store
            .set_many(vec![("a", "1".into()), ("b", "2".into())])
            .await
            .unwrap();
        assert_eq!(store.len().await, 2);
        assert_eq!(store.get("b").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn remove_ignores_unknown_keys() {
        let store = MemoryStore::new();
        store.set("a", "1".into()).await.unwrap();
        store.remove(&["a", "never-set"]).await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn usable_as_trait_object() {
        let store: std::sync::Arc<dyn KeyValueStore> = std::sync::Arc::new(MemoryStore::new());
        store.set("k", "v".into()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }
}
