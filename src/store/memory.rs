//! In-memory document store used by tests and local development.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{DocStore, Document, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection; test helper.
    pub async fn count(&self, collection: &str) -> usize {
        let guard = self.collections.read().await;
        guard.get(collection).map(|c| c.len()).unwrap_or(0)
    }
}

#[async_trait]
impl DocStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let guard = self.collections.read().await;
        Ok(guard.get(collection).and_then(|c| c.get(id)).cloned())
    }

    async fn put(&self, collection: &str, id: &str, doc: Value) -> Result<(), StoreError> {
        let mut guard = self.collections.write().await;
        guard.entry(collection.to_string()).or_default().insert(id.to_string(), doc);
        Ok(())
    }

    async fn insert(&self, collection: &str, doc: Value) -> Result<String, StoreError> {
        let id = Uuid::new_v4().simple().to_string();
        self.put(collection, &id, doc).await?;
        Ok(id)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let mut guard = self.collections.write().await;
        if let Some(coll) = guard.get_mut(collection) {
            coll.remove(id);
        }
        Ok(())
    }

    async fn find_eq(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Document>, StoreError> {
        let guard = self.collections.read().await;
        let Some(coll) = guard.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(coll
            .iter()
            .filter(|(_, doc)| doc.get(field) == Some(value))
            .map(|(id, doc)| Document { id: id.clone(), data: doc.clone() })
            .collect())
    }

    async fn find_contains(
        &self,
        collection: &str,
        field: &str,
        needle: &str,
    ) -> Result<Vec<Document>, StoreError> {
        let guard = self.collections.read().await;
        let Some(coll) = guard.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(coll
            .iter()
            .filter(|(_, doc)| {
                doc.get(field)
                    .and_then(Value::as_array)
                    .map(|arr| arr.iter().any(|v| v.as_str() == Some(needle)))
                    .unwrap_or(false)
            })
            .map(|(id, doc)| Document { id: id.clone(), data: doc.clone() })
            .collect())
    }
}
