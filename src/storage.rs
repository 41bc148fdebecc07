//! Content blob storage seam.
//!
//! Entity documents reference uploaded content by name; deleting an entity
//! releases its blobs. Removal is best effort: a failed delete is logged and
//! the document cascade continues, leaving an orphaned blob rather than a
//! dangling document.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::types::ContentType;

#[derive(Debug, thiserror::Error)]
#[error("file storage error: {0}")]
pub struct FileError(pub String);

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn remove_file(
        &self,
        name: &str,
        content_type: ContentType,
        group_id: &str,
    ) -> Result<(), FileError>;
}

/// Accepts every delete without touching any backing store. Used when no
/// blob storage is configured and by tests that assert which files were
/// released.
#[derive(Default)]
pub struct NullFileStore {
    removed: Mutex<Vec<String>>,
}

impl NullFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn removed(&self) -> Vec<String> {
        self.removed.lock().await.clone()
    }
}

#[async_trait]
impl FileStore for NullFileStore {
    async fn remove_file(
        &self,
        name: &str,
        _content_type: ContentType,
        group_id: &str,
    ) -> Result<(), FileError> {
        self.removed.lock().await.push(format!("{group_id}/{name}"));
        Ok(())
    }
}
