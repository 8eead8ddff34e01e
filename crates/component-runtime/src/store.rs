//! Store collaborator.
//!
//! A key/value store the runtime owns alongside its registry. The runtime only
//! drives its lifecycle (`initialize` during runtime initialization, `start` after
//! plugins, `stop` after services); components use it through
//! [`Runtime::store`](crate::Runtime::store).

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::context::Context;
use crate::error::BoxError;

#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, BoxError>;

    async fn set(&self, key: &str, value: Value) -> Result<(), BoxError>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool, BoxError>;

    async fn keys(&self) -> Result<Vec<String>, BoxError>;

    async fn initialize(&self, _ctx: &Context) -> Result<(), BoxError> {
        Ok(())
    }

    async fn start(&self, _ctx: &Context) -> Result<(), BoxError> {
        Ok(())
    }

    async fn stop(&self, _ctx: &Context) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Process-local [`Store`]. Contents are lost when it is dropped.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    data: RwLock<HashMap<String, Value>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, BoxError> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), BoxError> {
        self.data.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, BoxError> {
        Ok(self.data.write().remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>, BoxError> {
        let mut keys: Vec<_> = self.data.read().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_get_delete() {
        let store = InMemoryStore::new();
        store.set("b", json!(2)).await.unwrap();
        store.set("a", json!({"n": 1})).await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some(json!({"n": 1})));
        assert_eq!(store.keys().await.unwrap(), vec!["a", "b"]);
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert_eq!(store.get("a").await.unwrap(), None);
    }
}
