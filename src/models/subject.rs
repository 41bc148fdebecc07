use serde::{Deserialize, Serialize};
use serde_json::json;

use super::RoleLists;
use crate::store::{self, DocStore, StoreError, SUBJECTS};
use crate::types::{now_millis, Role};

/// Course document. `section_id` is empty for group-level subjects;
/// `section_ids` carries the owning section's full ancestor chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Subject {
    pub subject_id: String,
    pub group_id: String,
    pub section_id: String,
    pub section_ids: Vec<String>,
    pub subject_name: String,
    #[serde(rename = "entityId")]
    pub entity_ids: Vec<String>,
    #[serde(flatten)]
    pub roles: RoleLists,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Subject {
    pub fn normalize(&mut self) {
        self.roles.dedup();
        super::dedup_in_place(&mut self.section_ids);
        super::dedup_in_place(&mut self.entity_ids);
        if self.created_at == 0 {
            self.created_at = now_millis();
        }
    }

    pub fn add_entity(&mut self, entity_id: &str) -> bool {
        if self.entity_ids.iter().any(|e| e == entity_id) {
            return false;
        }
        self.entity_ids.push(entity_id.to_string());
        true
    }

    /// Enroll a user; providers land in a role list, plain viewers only in
    /// `users`.
    pub fn add_user(&mut self, uid: &str, role: Option<Role>) -> bool {
        match role {
            Some(role) => self.roles.add(role, uid),
            None => {
                if self.roles.users.iter().any(|u| u == uid) {
                    return false;
                }
                self.roles.users.push(uid.to_string());
                true
            }
        }
    }

    /// Drop `entity_ids` from this subject, returning the ids that were
    /// actually attached.
    pub fn remove_entities(&mut self, entity_ids: &[String]) -> Vec<String> {
        let mut removed = Vec::new();
        for id in entity_ids {
            if self.entity_ids.iter().any(|e| e == id) {
                self.entity_ids.retain(|e| e != id);
                removed.push(id.clone());
            }
        }
        removed
    }
}

pub async fn get(store: &dyn DocStore, subject_id: &str) -> Result<Subject, StoreError> {
    store::fetch(store, SUBJECTS, subject_id).await
}

pub async fn save(store: &dyn DocStore, subject: &mut Subject) -> Result<(), StoreError> {
    subject.normalize();
    subject.updated_at = now_millis();
    store::save(store, SUBJECTS, &subject.subject_id.clone(), subject).await
}

pub async fn add(store: &dyn DocStore, mut subject: Subject) -> Result<String, StoreError> {
    subject.normalize();
    subject.updated_at = now_millis();
    let id = store.insert(SUBJECTS, serde_json::to_value(&subject)?).await?;
    subject.subject_id = id.clone();
    save(store, &mut subject).await?;
    Ok(id)
}

pub async fn remove(store: &dyn DocStore, subject_id: &str) -> Result<(), StoreError> {
    store.delete(SUBJECTS, subject_id).await
}

pub async fn get_all_from_section(
    store: &dyn DocStore,
    section_id: &str,
) -> Result<Vec<Subject>, StoreError> {
    let docs = store.find_eq(SUBJECTS, "sectionId", &json!(section_id)).await?;
    Ok(store::decode_all(docs))
}

/// Subjects attached directly to the group rather than a section.
pub async fn get_all_from_group(
    store: &dyn DocStore,
    group_id: &str,
) -> Result<Vec<Subject>, StoreError> {
    let subjects = get_all_from_section(store, "").await?;
    Ok(subjects.into_iter().filter(|s| s.group_id == group_id).collect())
}

/// Delete every subject under a section, returning the deleted documents.
pub async fn remove_all(
    store: &dyn DocStore,
    section_id: &str,
) -> Result<Vec<Subject>, StoreError> {
    let subjects = get_all_from_section(store, section_id).await?;
    for subject in &subjects {
        remove(store, &subject.subject_id).await?;
    }
    Ok(subjects)
}

/// Pull a user out of every subject directly under a section. Subjects
/// where they were not enrolled are skipped.
pub async fn remove_user_from_section(
    store: &dyn DocStore,
    section_id: &str,
    uid: &str,
) -> Result<Vec<Subject>, StoreError> {
    let subjects = get_all_from_section(store, section_id).await?;
    let mut changed = Vec::new();
    for mut subject in subjects {
        if subject.roles.remove(uid) {
            save(store, &mut subject).await?;
            changed.push(subject);
        }
    }
    Ok(changed)
}

pub async fn remove_user_from_role_all(
    store: &dyn DocStore,
    group_id: &str,
    uid: &str,
    role: Role,
) -> Result<Vec<Subject>, StoreError> {
    let docs = store.find_contains(SUBJECTS, role.as_str(), uid).await?;
    let mut changed = Vec::new();
    for doc in docs {
        let mut subject: Subject = serde_json::from_value(doc.data)?;
        if subject.group_id != group_id {
            continue;
        }
        subject.roles.remove(uid);
        save(store, &mut subject).await?;
        changed.push(subject);
    }
    Ok(changed)
}

pub async fn update_role(
    store: &dyn DocStore,
    subject_id: &str,
    uid: &str,
    old_role: Role,
    new_role: Role,
) -> Result<Subject, StoreError> {
    let mut subject = get(store, subject_id).await?;
    if subject.roles.change_role(uid, old_role, new_role) {
        save(store, &mut subject).await?;
    }
    Ok(subject)
}

pub async fn update_name(
    store: &dyn DocStore,
    subject_id: &str,
    name: &str,
) -> Result<Subject, StoreError> {
    let mut subject = get(store, subject_id).await?;
    subject.subject_name = name.to_string();
    save(store, &mut subject).await?;
    Ok(subject)
}
