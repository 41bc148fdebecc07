//! Document value types and their mutation helpers.
//!
//! Normalization is plain data: every list field defaults to empty and is
//! deduplicated on save, replacing the constructor-per-class scheme the
//! document layout originally came from.

use serde::{Deserialize, Serialize};

use crate::types::Role;

pub mod analytics;
pub mod entity;
pub mod group;
pub mod metadata;
pub mod section;
pub mod subject;
pub mod tier;
pub mod user;

/// Role membership lists shared by group, section and subject documents.
/// `users` is maintained as the union of the three role lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleLists {
    pub admin: Vec<String>,
    pub provider: Vec<String>,
    pub learner: Vec<String>,
    pub users: Vec<String>,
}

impl RoleLists {
    pub fn list(&self, role: Role) -> &Vec<String> {
        match role {
            Role::Admin => &self.admin,
            Role::Provider => &self.provider,
            Role::Learner => &self.learner,
        }
    }

    pub fn list_mut(&mut self, role: Role) -> &mut Vec<String> {
        match role {
            Role::Admin => &mut self.admin,
            Role::Provider => &mut self.provider,
            Role::Learner => &mut self.learner,
        }
    }

    /// Union of all role lists, deduplicated, preserving first appearance.
    pub fn members(&self) -> Vec<String> {
        let mut all = Vec::new();
        for role in Role::ALL {
            for uid in self.list(role) {
                if !all.contains(uid) {
                    all.push(uid.clone());
                }
            }
        }
        all
    }

    /// First role whose list contains the uid.
    pub fn role_of(&self, uid: &str) -> Option<Role> {
        Role::ALL.into_iter().find(|role| self.list(*role).iter().any(|u| u == uid))
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.users.iter().any(|u| u == uid) || self.role_of(uid).is_some()
    }

    /// Idempotently add the uid under a role. Returns whether anything changed.
    pub fn add(&mut self, role: Role, uid: &str) -> bool {
        let mut changed = false;
        let list = self.list_mut(role);
        if !list.iter().any(|u| u == uid) {
            list.push(uid.to_string());
            changed = true;
        }
        if !self.users.iter().any(|u| u == uid) {
            self.users.push(uid.to_string());
            changed = true;
        }
        changed
    }

    /// Remove the uid from every role list and the users list.
    pub fn remove(&mut self, uid: &str) -> bool {
        let before = self.admin.len() + self.provider.len() + self.learner.len() + self.users.len();
        self.admin.retain(|u| u != uid);
        self.provider.retain(|u| u != uid);
        self.learner.retain(|u| u != uid);
        self.users.retain(|u| u != uid);
        before != self.admin.len() + self.provider.len() + self.learner.len() + self.users.len()
    }

    /// Move the uid between role lists. Returns whether anything changed.
    pub fn change_role(&mut self, uid: &str, old_role: Role, new_role: Role) -> bool {
        if !self.list(old_role).iter().any(|u| u == uid) {
            return false;
        }
        self.list_mut(old_role).retain(|u| u != uid);
        if !self.list(new_role).iter().any(|u| u == uid) {
            self.list_mut(new_role).push(uid.to_string());
            return true;
        }
        false
    }

    pub fn dedup(&mut self) {
        dedup_in_place(&mut self.admin);
        dedup_in_place(&mut self.provider);
        dedup_in_place(&mut self.learner);
        dedup_in_place(&mut self.users);
    }
}

/// Remove duplicates while keeping first appearance order.
pub fn dedup_in_place(list: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    list.retain(|item| seen.insert(item.clone()));
}

/// `from` minus every id in `remove`.
pub fn filter_out(remove: &[String], from: &[String]) -> Vec<String> {
    from.iter().filter(|id| !remove.contains(id)).cloned().collect()
}
