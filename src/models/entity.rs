use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::storage::FileStore;
use crate::store::{self, DocStore, StoreError, ENTITIES};
use crate::types::{now_millis, ContentType};

/// A piece of content inside a subject: a video, document, image or a
/// divider row that only structures the list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Entity {
    pub entity_id: String,
    pub group_id: String,
    pub section_ids: Vec<String>,
    pub subject_id: String,
    /// Denormalized from the owning subject; refreshed on subject rename.
    pub subject_name: String,
    pub author: String,
    pub divider: bool,
    pub title: String,
    pub description: String,
    pub duration: i64,
    pub content_length: i64,
    pub content_provider: String,
    pub content_name: String,
    pub content_url: String,
    pub content_type: ContentType,
    /// Bytes; counted against the group's storage quota.
    pub content_size: i64,
    pub thumbnail_name: String,
    pub thumbnail_image_url: String,
    pub other_urls: Vec<String>,
    /// Position within the subject. New entities append after the current
    /// maximum.
    pub order: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Entity {
    pub fn normalize(&mut self) {
        super::dedup_in_place(&mut self.section_ids);
        if self.created_at == 0 {
            self.created_at = now_millis();
        }
    }
}

pub async fn get(store: &dyn DocStore, entity_id: &str) -> Result<Entity, StoreError> {
    store::fetch(store, ENTITIES, entity_id).await
}

pub async fn save(store: &dyn DocStore, entity: &mut Entity) -> Result<(), StoreError> {
    entity.normalize();
    entity.updated_at = now_millis();
    store::save(store, ENTITIES, &entity.entity_id.clone(), entity).await
}

/// Insert at the end of the subject's ordering and return the new id. The
/// first entity of a subject sits at order 0.
pub async fn add(store: &dyn DocStore, mut entity: Entity) -> Result<String, StoreError> {
    entity.order = match max_order(store, &entity.subject_id).await? {
        Some(last) => last + 1,
        None => 0,
    };
    entity.normalize();
    entity.updated_at = now_millis();
    let id = store.insert(ENTITIES, serde_json::to_value(&entity)?).await?;
    entity.entity_id = id.clone();
    save(store, &mut entity).await?;
    Ok(id)
}

/// Delete the entity document and release its content blobs.
pub async fn remove(
    store: &dyn DocStore,
    files: &dyn FileStore,
    entity: &Entity,
) -> Result<(), StoreError> {
    for name in [&entity.content_name, &entity.thumbnail_name] {
        if name.is_empty() {
            continue;
        }
        if let Err(err) = files.remove_file(name, entity.content_type, &entity.group_id).await {
            tracing::warn!(entity_id = %entity.entity_id, %err, "content blob not released");
        }
    }
    store.delete(ENTITIES, &entity.entity_id).await
}

/// Delete every entity under a subject, returning the deleted documents so
/// callers can settle storage and analytics.
pub async fn remove_all(
    store: &dyn DocStore,
    files: &dyn FileStore,
    subject_id: &str,
) -> Result<Vec<Entity>, StoreError> {
    let entities = get_all_by_order(store, subject_id).await?;
    for entity in &entities {
        remove(store, files, entity).await?;
    }
    Ok(entities)
}

/// The subject's entities sorted ascending by `order`.
pub async fn get_all_by_order(
    store: &dyn DocStore,
    subject_id: &str,
) -> Result<Vec<Entity>, StoreError> {
    let docs = store.find_eq(ENTITIES, "subjectId", &json!(subject_id)).await?;
    let mut entities: Vec<Entity> = store::decode_all(docs);
    entities.sort_by_key(|e| e.order);
    Ok(entities)
}

/// The highest order within a subject, `None` when it has no entities yet.
pub async fn max_order(
    store: &dyn DocStore,
    subject_id: &str,
) -> Result<Option<i64>, StoreError> {
    let entities = get_all_by_order(store, subject_id).await?;
    Ok(entities.last().map(|e| e.order))
}

/// Persist a batch of reordered entities as supplied by the caller.
pub async fn update_batch(
    store: &dyn DocStore,
    entities: Vec<Entity>,
) -> Result<(), StoreError> {
    for mut entity in entities {
        save(store, &mut entity).await?;
    }
    Ok(())
}

/// Refresh the denormalized subject name on each of the subject's entities.
pub async fn rename_subject(
    store: &dyn DocStore,
    subject_id: &str,
    subject_name: &str,
) -> Result<(), StoreError> {
    let entities = get_all_by_order(store, subject_id).await?;
    for mut entity in entities {
        entity.subject_name = subject_name.to_string();
        save(store, &mut entity).await?;
    }
    Ok(())
}
