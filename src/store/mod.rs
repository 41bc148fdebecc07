//! Document store seam.
//!
//! Every operation receives an explicit `&dyn DocStore` rather than reaching
//! for a global handle, so the whole service can run against the in-memory
//! backend in tests and development.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

// Collection names. Document ids are either caller-supplied natural keys
// (uid, groupId, tierId) or store-generated UUIDs.
pub const TIERS: &str = "tiers";
pub const USERS: &str = "users";
pub const GROUPS: &str = "groups";
pub const SECTIONS: &str = "sections";
pub const SUBJECTS: &str = "subjects";
pub const ENTITIES: &str = "entities";
pub const METADATA: &str = "metadata";
pub const ENTITY_ANALYTICS: &str = "entity_analytics";
pub const USER_ANALYTICS: &str = "user_analytics";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },
    #[error("document serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(collection: &str, id: &str) -> Self {
        StoreError::NotFound { collection: collection.to_string(), id: id.to_string() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// A raw document together with its store id.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

#[async_trait]
pub trait DocStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError>;

    /// Create or replace a document under a caller-supplied id.
    async fn put(&self, collection: &str, id: &str, doc: Value) -> Result<(), StoreError>;

    /// Create a document under a store-generated id and return that id.
    async fn insert(&self, collection: &str, doc: Value) -> Result<String, StoreError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    /// All documents whose `field` equals `value`.
    async fn find_eq(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Document>, StoreError>;

    /// All documents whose array `field` contains the string `needle`.
    async fn find_contains(
        &self,
        collection: &str,
        field: &str,
        needle: &str,
    ) -> Result<Vec<Document>, StoreError>;
}

/// Fetch and deserialize a document, failing with `NotFound` when absent.
pub async fn fetch<T: DeserializeOwned>(
    store: &dyn DocStore,
    collection: &str,
    id: &str,
) -> Result<T, StoreError> {
    let value = store
        .get(collection, id)
        .await?
        .ok_or_else(|| StoreError::not_found(collection, id))?;
    Ok(serde_json::from_value(value)?)
}

/// Fetch and deserialize a document when present.
pub async fn fetch_opt<T: DeserializeOwned>(
    store: &dyn DocStore,
    collection: &str,
    id: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(collection, id).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Serialize and store a document under the given id.
pub async fn save<T: Serialize>(
    store: &dyn DocStore,
    collection: &str,
    id: &str,
    doc: &T,
) -> Result<(), StoreError> {
    store.put(collection, id, serde_json::to_value(doc)?).await
}

/// Deserialize a query result set, skipping documents that no longer parse.
pub fn decode_all<T: DeserializeOwned>(docs: Vec<Document>) -> Vec<T> {
    docs.into_iter()
        .filter_map(|doc| match serde_json::from_value(doc.data) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!("skipping undecodable document {}: {}", doc.id, e);
                None
            }
        })
        .collect()
}
