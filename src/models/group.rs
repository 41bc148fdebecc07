use serde::{Deserialize, Serialize};

use super::{filter_out, RoleLists};
use crate::store::{self, DocStore, StoreError, GROUPS};
use crate::types::{now_millis, Role, SubscriptionItem, SubscriptionStatus, Usage};

/// Top-level tenant document.
///
/// Invariants: role lists are deduplicated, `users` is their union, and
/// `section_ids`/`subject_ids` mirror the actual child documents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Group {
    pub group_id: String,
    pub group_name: String,
    /// Owning uid; cannot be removed from the group.
    pub sudo: String,
    #[serde(flatten)]
    pub roles: RoleLists,
    #[serde(rename = "sectionId")]
    pub section_ids: Vec<String>,
    #[serde(rename = "subjectId")]
    pub subject_ids: Vec<String>,
    /// Join requests sent by users to this group.
    pub requests: Vec<String>,
    /// Invitations this group sent that users have not yet accepted.
    pub group_requests: Vec<String>,
    pub blacklist: Vec<String>,
    /// Bytes of entity content currently owned by the group.
    pub current_storage: i64,
    pub tier_id: String,
    pub subscription_status: SubscriptionStatus,
    pub subscription_items: Vec<SubscriptionItem>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Group {
    pub fn normalize(&mut self) {
        self.roles.dedup();
        super::dedup_in_place(&mut self.section_ids);
        super::dedup_in_place(&mut self.subject_ids);
        super::dedup_in_place(&mut self.requests);
        super::dedup_in_place(&mut self.group_requests);
        super::dedup_in_place(&mut self.blacklist);
        if self.created_at == 0 {
            self.created_at = now_millis();
        }
    }

    /// Current resource counts from authoritative list lengths. The sudo
    /// admin is not billed as a user seat.
    pub fn usage(&self) -> Usage {
        let user = (self.roles.admin.len() as i64 - 1).max(0)
            + self.roles.provider.len() as i64
            + self.roles.learner.len() as i64;
        Usage {
            group: 1,
            user,
            section: self.section_ids.len() as i64,
            subject: self.subject_ids.len() as i64,
            storage: self.current_storage,
        }
    }

    pub fn role_of(&self, uid: &str) -> Option<Role> {
        self.roles.role_of(uid)
    }

    /// Idempotently add a member: role list, users list, and a pending
    /// invitation; any join request from the user is consumed.
    pub fn add_user(&mut self, role: Role, uid: &str) -> bool {
        let mut changed = self.roles.add(role, uid);
        if self.requests.iter().any(|u| u == uid) {
            self.requests.retain(|u| u != uid);
            changed = true;
        }
        if !self.group_requests.iter().any(|u| u == uid) {
            self.group_requests.push(uid.to_string());
            changed = true;
        }
        changed
    }

    pub fn remove_user(&mut self, uid: &str) {
        self.roles.remove(uid);
        self.requests.retain(|u| u != uid);
        self.group_requests.retain(|u| u != uid);
    }

    pub fn set_request(&mut self, uid: &str) -> Result<(), StoreError> {
        if self.requests.iter().any(|u| u == uid) {
            return Err(StoreError::Backend("Request already sent".to_string()));
        }
        self.requests.push(uid.to_string());
        Ok(())
    }

    pub fn remove_request(&mut self, uid: &str) -> bool {
        let before = self.requests.len();
        self.requests.retain(|u| u != uid);
        before != self.requests.len()
    }

    pub fn remove_group_request(&mut self, uid: &str) -> bool {
        let before = self.group_requests.len();
        self.group_requests.retain(|u| u != uid);
        before != self.group_requests.len()
    }

    /// Accept a pending join request under the given role.
    pub fn accept_request(&mut self, uid: &str, role: Role) -> bool {
        if !self.requests.iter().any(|u| u == uid) {
            return false;
        }
        self.roles.add(role, uid);
        self.requests.retain(|u| u != uid);
        true
    }

    pub fn add_section(&mut self, section_id: &str) -> bool {
        if self.section_ids.iter().any(|s| s == section_id) {
            return false;
        }
        self.section_ids.push(section_id.to_string());
        true
    }

    pub fn add_subject(&mut self, subject_id: &str) -> bool {
        if self.subject_ids.iter().any(|s| s == subject_id) {
            return false;
        }
        self.subject_ids.push(subject_id.to_string());
        true
    }

    pub fn remove_sections(&mut self, section_ids: &[String], subject_ids: &[String]) {
        self.section_ids = filter_out(section_ids, &self.section_ids);
        self.subject_ids = filter_out(subject_ids, &self.subject_ids);
    }

    pub fn remove_subjects(&mut self, subject_ids: &[String]) {
        self.subject_ids = filter_out(subject_ids, &self.subject_ids);
    }

    /// Adjust the storage counter; never drops below zero.
    pub fn update_storage(&mut self, delta: i64) {
        self.current_storage = (self.current_storage + delta).max(0);
    }

    pub fn update_subscription(
        &mut self,
        tier_id: &str,
        items: Vec<SubscriptionItem>,
        status: SubscriptionStatus,
    ) {
        self.tier_id = tier_id.to_string();
        self.subscription_items = items;
        self.subscription_status = status;
    }
}

pub async fn get(store: &dyn DocStore, group_id: &str) -> Result<Group, StoreError> {
    store::fetch(store, GROUPS, group_id).await
}

pub async fn get_all(store: &dyn DocStore, group_ids: &[String]) -> Result<Vec<Group>, StoreError> {
    let mut groups = Vec::with_capacity(group_ids.len());
    for id in group_ids {
        groups.push(get(store, id).await?);
    }
    Ok(groups)
}

pub async fn save(store: &dyn DocStore, group: &mut Group) -> Result<(), StoreError> {
    group.normalize();
    group.updated_at = now_millis();
    store::save(store, GROUPS, &group.group_id.clone(), group).await
}

pub async fn remove(store: &dyn DocStore, group_id: &str) -> Result<(), StoreError> {
    store.delete(GROUPS, group_id).await
}

pub async fn exists(store: &dyn DocStore, group_id: &str) -> Result<bool, StoreError> {
    Ok(store.get(GROUPS, group_id).await?.is_some())
}
