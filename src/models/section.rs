use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{filter_out, RoleLists};
use crate::store::{self, DocStore, StoreError, SECTIONS};
use crate::types::{now_millis, Role};

/// Node in a group's section tree. `parent_ids` is the ancestor chain from
/// the root down, so descendants can be matched without walking the tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Section {
    pub section_id: String,
    pub group_id: String,
    pub section_name: String,
    pub parent_id: String,
    pub parent_ids: Vec<String>,
    pub child_ids: Vec<String>,
    #[serde(rename = "subjectId")]
    pub subject_ids: Vec<String>,
    #[serde(flatten)]
    pub roles: RoleLists,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Which way membership changes travel through the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    None,
    /// Toward the root, so the user stays visible in every ancestor.
    Up,
    /// Into the subtree. Currently unused by the handlers but kept as the
    /// inverse of `Up` for bulk enrollment.
    Down,
}

impl Section {
    pub fn normalize(&mut self) {
        self.roles.dedup();
        super::dedup_in_place(&mut self.parent_ids);
        super::dedup_in_place(&mut self.child_ids);
        super::dedup_in_place(&mut self.subject_ids);
        if self.created_at == 0 {
            self.created_at = now_millis();
        }
    }

    pub fn add_subject(&mut self, subject_id: &str) -> bool {
        if self.subject_ids.iter().any(|s| s == subject_id) {
            return false;
        }
        self.subject_ids.push(subject_id.to_string());
        true
    }

    pub fn remove_subjects(&mut self, subject_ids: &[String]) {
        self.subject_ids = filter_out(subject_ids, &self.subject_ids);
    }
}

pub async fn get(store: &dyn DocStore, section_id: &str) -> Result<Section, StoreError> {
    store::fetch(store, SECTIONS, section_id).await
}

pub async fn save(store: &dyn DocStore, section: &mut Section) -> Result<(), StoreError> {
    section.normalize();
    section.updated_at = now_millis();
    store::save(store, SECTIONS, &section.section_id.clone(), section).await
}

/// Insert a root-level section and return its generated id.
pub async fn add(store: &dyn DocStore, mut section: Section) -> Result<String, StoreError> {
    section.normalize();
    section.updated_at = now_millis();
    let id = store.insert(SECTIONS, serde_json::to_value(&section)?).await?;
    section.section_id = id.clone();
    save(store, &mut section).await?;
    Ok(id)
}

/// Insert a section under `parent_id`, extending the ancestor chain and
/// registering the new node in the parent's child list.
pub async fn add_child(
    store: &dyn DocStore,
    mut section: Section,
    parent_id: &str,
) -> Result<String, StoreError> {
    let mut parent = get(store, parent_id).await?;
    section.parent_id = parent_id.to_string();
    section.parent_ids = parent.parent_ids.clone();
    section.parent_ids.push(parent_id.to_string());
    let id = add(store, section).await?;
    parent.child_ids.push(id.clone());
    save(store, &mut parent).await?;
    Ok(id)
}

/// Delete a section and its whole subtree. Returns every removed section,
/// so callers can release the subjects and users they referenced.
pub async fn remove_tree(
    store: &dyn DocStore,
    root: Section,
) -> Result<Vec<Section>, StoreError> {
    let mut removed = Vec::new();
    let mut pending = vec![root];
    while let Some(section) = pending.pop() {
        store.delete(SECTIONS, &section.section_id).await?;
        for child_id in &section.child_ids {
            match get(store, child_id).await {
                Ok(child) => pending.push(child),
                // already gone, nothing left to release
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err),
            }
        }
        removed.push(section);
    }
    Ok(removed)
}

/// Add a user under a role, optionally propagating through the tree.
/// Returns the ids of every section that changed.
pub async fn add_user(
    store: &dyn DocStore,
    section: Section,
    uid: &str,
    role: Role,
    direction: Propagation,
) -> Result<Vec<String>, StoreError> {
    let mut changed = Vec::new();
    let mut current = Some(section);
    // ancestor chains are short, walk them iteratively
    while let Some(mut section) = current.take() {
        if section.roles.add(role, uid) {
            changed.push(section.section_id.clone());
            save(store, &mut section).await?;
        }
        match direction {
            Propagation::Up if !section.parent_id.is_empty() => {
                current = Some(get(store, &section.parent_id).await?);
            }
            Propagation::Down => {
                for child_id in section.child_ids.clone() {
                    let child = match get(store, &child_id).await {
                        Ok(child) => child,
                        Err(err) if err.is_not_found() => continue,
                        Err(err) => return Err(err),
                    };
                    let mut below =
                        Box::pin(add_user(store, child, uid, role, Propagation::Down)).await?;
                    changed.append(&mut below);
                }
            }
            _ => {}
        }
    }
    Ok(changed)
}

/// Remove a user from this section and, if it was a member here, from the
/// whole subtree below. Returns the ids of every section visited.
pub async fn remove_user(
    store: &dyn DocStore,
    mut section: Section,
    uid: &str,
) -> Result<Vec<String>, StoreError> {
    let mut visited = vec![section.section_id.clone()];
    if !section.roles.remove(uid) {
        return Ok(visited);
    }
    save(store, &mut section).await?;

    let mut pending = section.child_ids;
    while let Some(child_id) = pending.pop() {
        let mut child = match get(store, &child_id).await {
            Ok(child) => child,
            Err(err) if err.is_not_found() => continue,
            Err(err) => return Err(err),
        };
        if child.roles.remove(uid) {
            save(store, &mut child).await?;
            pending.extend(child.child_ids.clone());
        }
        visited.push(child_id);
    }
    Ok(visited)
}

/// Strip a user out of every section in the group where they hold `role`.
pub async fn remove_user_from_role_all(
    store: &dyn DocStore,
    group_id: &str,
    uid: &str,
    role: Role,
) -> Result<Vec<String>, StoreError> {
    let docs = store.find_contains(SECTIONS, role.as_str(), uid).await?;
    let mut section_ids = Vec::new();
    for doc in docs {
        let mut section: Section = serde_json::from_value(doc.data)?;
        if section.group_id != group_id {
            continue;
        }
        section.section_id = doc.id.clone();
        section.roles.remove(uid);
        save(store, &mut section).await?;
        section_ids.push(doc.id);
    }
    Ok(section_ids)
}

pub async fn update_role(
    store: &dyn DocStore,
    section_id: &str,
    uid: &str,
    old_role: Role,
    new_role: Role,
) -> Result<Section, StoreError> {
    let mut section = get(store, section_id).await?;
    if section.roles.change_role(uid, old_role, new_role) {
        save(store, &mut section).await?;
    }
    Ok(section)
}

pub async fn update_name(
    store: &dyn DocStore,
    section_id: &str,
    name: &str,
) -> Result<Section, StoreError> {
    let mut section = get(store, section_id).await?;
    section.section_name = name.to_string();
    save(store, &mut section).await?;
    Ok(section)
}

/// Every section of the group, roots and descendants alike.
pub async fn get_by_group(
    store: &dyn DocStore,
    group_id: &str,
) -> Result<Vec<Section>, StoreError> {
    let docs = store.find_eq(SECTIONS, "groupId", &json!(group_id)).await?;
    Ok(store::decode_all(docs))
}
