use serde::{Deserialize, Serialize};

use crate::store::{self, DocStore, StoreError, METADATA};
use crate::types::now_millis;

/// Document kinds a metadata record can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MetadataKind {
    #[default]
    Group,
    Section,
    Subject,
    Entity,
    User,
}

/// Lightweight search record kept alongside the main document, so lookup
/// surfaces can render a name without loading the full record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Metadata {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: MetadataKind,
    pub email: String,
    pub phone: String,
    pub description: String,
    pub subscription_status: String,
    pub created_at: i64,
    pub updated_at: i64,
}

pub async fn get(store: &dyn DocStore, id: &str) -> Result<Metadata, StoreError> {
    store::fetch(store, METADATA, id).await
}

pub async fn set(store: &dyn DocStore, metadata: &mut Metadata) -> Result<(), StoreError> {
    if metadata.created_at == 0 {
        metadata.created_at = now_millis();
    }
    metadata.updated_at = now_millis();
    store::save(store, METADATA, &metadata.id.clone(), metadata).await
}

pub async fn remove(store: &dyn DocStore, id: &str) -> Result<(), StoreError> {
    store.delete(METADATA, id).await
}
