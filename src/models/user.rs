use serde::{Deserialize, Serialize};
use serde_json::json;

use super::filter_out;
use crate::store::{self, DocStore, StoreError, USERS};
use crate::types::{now_millis, Role, SubscriptionItem, SubscriptionStatus};

/// Account document. Role lists here hold GROUP ids, the inverse of the
/// uid lists kept on group documents, so both sides of a membership can be
/// answered without a join.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct User {
    pub uid: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub photo_url: String,
    /// Billing processor customer id.
    pub customer_id: String,
    /// Groups this user owns.
    pub sudo: Vec<String>,
    pub admin: Vec<String>,
    pub provider: Vec<String>,
    pub learner: Vec<String>,
    #[serde(rename = "groupId")]
    pub group_ids: Vec<String>,
    #[serde(rename = "sectionId")]
    pub section_ids: Vec<String>,
    #[serde(rename = "subjectId")]
    pub subject_ids: Vec<String>,
    #[serde(rename = "entityId")]
    pub entity_ids: Vec<String>,
    /// Groups this user has asked to join.
    pub requests: Vec<String>,
    /// Groups that invited this user.
    pub group_requests: Vec<String>,
    pub tier_id: String,
    pub subscription_id: String,
    pub subscription_status: SubscriptionStatus,
    pub subscription_items: Vec<SubscriptionItem>,
    pub payment_method_id: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl User {
    pub fn normalize(&mut self) {
        for list in [
            &mut self.sudo,
            &mut self.admin,
            &mut self.provider,
            &mut self.learner,
            &mut self.group_ids,
            &mut self.section_ids,
            &mut self.subject_ids,
            &mut self.entity_ids,
            &mut self.requests,
            &mut self.group_requests,
        ] {
            super::dedup_in_place(list);
        }
        if self.created_at == 0 {
            self.created_at = now_millis();
        }
    }

    fn role_list_mut(&mut self, role: Role) -> &mut Vec<String> {
        match role {
            Role::Admin => &mut self.admin,
            Role::Provider => &mut self.provider,
            Role::Learner => &mut self.learner,
        }
    }

    fn role_list(&self, role: Role) -> &Vec<String> {
        match role {
            Role::Admin => &self.admin,
            Role::Provider => &self.provider,
            Role::Learner => &self.learner,
        }
    }

    pub fn add_to_group(&mut self, group_id: &str, role: Role, sudo: bool) {
        let list = self.role_list_mut(role);
        if !list.iter().any(|g| g == group_id) {
            list.push(group_id.to_string());
        }
        if !self.group_ids.iter().any(|g| g == group_id) {
            self.group_ids.push(group_id.to_string());
        }
        if sudo && !self.sudo.iter().any(|g| g == group_id) {
            self.sudo.push(group_id.to_string());
        }
    }

    pub fn add_to_sections(&mut self, section_ids: &[String]) -> bool {
        let mut changed = false;
        for id in section_ids {
            if !self.section_ids.iter().any(|s| s == id) {
                self.section_ids.push(id.clone());
                changed = true;
            }
        }
        changed
    }

    pub fn add_to_subjects(&mut self, subject_ids: &[String]) -> bool {
        let mut changed = false;
        for id in subject_ids {
            if !self.subject_ids.iter().any(|s| s == id) {
                self.subject_ids.push(id.clone());
                changed = true;
            }
        }
        changed
    }

    pub fn add_entity(&mut self, entity_id: &str) -> bool {
        if self.entity_ids.iter().any(|e| e == entity_id) {
            return false;
        }
        self.entity_ids.push(entity_id.to_string());
        true
    }

    /// Detach the user from a group and the given sections/subjects.
    /// Admin membership survives while the user still owns a group they
    /// administer, unless the owner themselves is leaving.
    pub fn remove_from_group(
        &mut self,
        group_id: &str,
        section_ids: &[String],
        subject_ids: &[String],
        is_sudo: bool,
    ) {
        let owns_administered_group = self.sudo.iter().any(|g| self.admin.contains(g));
        if is_sudo || !owns_administered_group {
            self.admin.retain(|g| g != group_id);
        }
        if is_sudo {
            self.sudo.retain(|g| g != group_id);
        }
        self.provider.retain(|g| g != group_id);
        self.learner.retain(|g| g != group_id);
        self.group_ids.retain(|g| g != group_id);
        self.group_requests.retain(|g| g != group_id);
        if !section_ids.is_empty() {
            self.section_ids = filter_out(section_ids, &self.section_ids);
        }
        if !subject_ids.is_empty() {
            self.subject_ids = filter_out(subject_ids, &self.subject_ids);
        }
    }

    pub fn remove_from_sections(&mut self, section_ids: &[String], subject_ids: &[String]) -> bool {
        if section_ids.is_empty() {
            return false;
        }
        self.section_ids = filter_out(section_ids, &self.section_ids);
        if !subject_ids.is_empty() {
            self.subject_ids = filter_out(subject_ids, &self.subject_ids);
        }
        true
    }

    pub fn remove_from_subjects(&mut self, subject_ids: &[String]) -> bool {
        if subject_ids.is_empty() {
            return false;
        }
        self.subject_ids = filter_out(subject_ids, &self.subject_ids);
        true
    }

    pub fn change_role(&mut self, group_id: &str, old_role: Role, new_role: Role) -> bool {
        if !self.role_list(old_role).iter().any(|g| g == group_id) {
            return false;
        }
        self.role_list_mut(old_role).retain(|g| g != group_id);
        if !self.role_list(new_role).iter().any(|g| g == group_id) {
            self.role_list_mut(new_role).push(group_id.to_string());
            return true;
        }
        false
    }

    pub fn update_subscription(
        &mut self,
        tier_id: &str,
        subscription_id: &str,
        items: Vec<SubscriptionItem>,
        status: SubscriptionStatus,
    ) {
        self.tier_id = tier_id.to_string();
        self.subscription_id = subscription_id.to_string();
        self.subscription_items = items;
        self.subscription_status = status;
    }

    pub fn set_request(&mut self, group_id: &str) -> bool {
        if self.requests.iter().any(|g| g == group_id) {
            return false;
        }
        self.requests.push(group_id.to_string());
        true
    }

    pub fn remove_request(&mut self, group_id: &str) -> bool {
        let before = self.requests.len();
        self.requests.retain(|g| g != group_id);
        before != self.requests.len()
    }

    pub fn remove_group_request(&mut self, group_id: &str) -> bool {
        let before = self.group_requests.len();
        self.group_requests.retain(|g| g != group_id);
        before != self.group_requests.len()
    }

    /// Accept a group's invitation under the given role.
    pub fn accept_request(&mut self, group_id: &str, role: Role) -> bool {
        if !self.requests.iter().any(|g| g == group_id) {
            return false;
        }
        self.add_to_group(group_id, role, false);
        self.requests.retain(|g| g != group_id);
        true
    }
}

pub async fn get(store: &dyn DocStore, uid: &str) -> Result<User, StoreError> {
    store::fetch(store, USERS, uid).await
}

/// Best-effort bulk fetch; missing uids come back as empty records so
/// roster rendering never fails on a deleted account.
pub async fn get_by_ids(store: &dyn DocStore, uids: &[String]) -> Result<Vec<User>, StoreError> {
    let mut users = Vec::with_capacity(uids.len());
    for uid in uids {
        match store::fetch_opt::<User>(store, USERS, uid).await? {
            Some(user) => users.push(user),
            None => users.push(User::default()),
        }
    }
    Ok(users)
}

pub async fn save(store: &dyn DocStore, user: &mut User) -> Result<(), StoreError> {
    user.normalize();
    user.updated_at = now_millis();
    store::save(store, USERS, &user.uid.clone(), user).await
}

async fn get_one_by(store: &dyn DocStore, field: &str, value: &str) -> Result<User, StoreError> {
    let docs = store.find_eq(USERS, field, &json!(value)).await?;
    let doc = docs.into_iter().next().ok_or_else(|| StoreError::not_found(USERS, value))?;
    Ok(serde_json::from_value(doc.data)?)
}

pub async fn get_by_email(store: &dyn DocStore, email: &str) -> Result<User, StoreError> {
    get_one_by(store, "email", email).await
}

pub async fn get_by_phone(store: &dyn DocStore, phone: &str) -> Result<User, StoreError> {
    get_one_by(store, "phone", phone).await
}

pub async fn get_by_customer_id(
    store: &dyn DocStore,
    customer_id: &str,
) -> Result<User, StoreError> {
    get_one_by(store, "customerId", customer_id).await
}

/// Detach every user from the given sections and subjects. Used when a
/// section subtree is deleted.
pub async fn remove_all_from_sections(
    store: &dyn DocStore,
    section_ids: &[String],
    subject_ids: &[String],
) -> Result<(), StoreError> {
    for section_id in section_ids {
        let docs = store.find_contains(USERS, "sectionId", section_id).await?;
        for doc in docs {
            let mut user: User = serde_json::from_value(doc.data)?;
            user.section_ids = filter_out(section_ids, &user.section_ids);
            user.subject_ids = filter_out(subject_ids, &user.subject_ids);
            save(store, &mut user).await?;
        }
    }
    Ok(())
}

/// Detach every user from the given subjects.
pub async fn remove_all_from_subjects(
    store: &dyn DocStore,
    subject_ids: &[String],
) -> Result<(), StoreError> {
    for subject_id in subject_ids {
        let docs = store.find_contains(USERS, "subjectId", subject_id).await?;
        for doc in docs {
            let mut user: User = serde_json::from_value(doc.data)?;
            user.subject_ids = filter_out(subject_ids, &user.subject_ids);
            save(store, &mut user).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member() -> User {
        let mut user = User { uid: "u1".to_string(), ..User::default() };
        user.add_to_group("g1", Role::Admin, true);
        user.add_to_group("g2", Role::Learner, false);
        user
    }

    #[test]
    fn add_to_group_tracks_ownership() {
        let user = member();
        assert_eq!(user.sudo, vec!["g1"]);
        assert_eq!(user.group_ids, vec!["g1", "g2"]);
        assert_eq!(user.admin, vec!["g1"]);
        assert_eq!(user.learner, vec!["g2"]);
    }

    #[test]
    fn owner_keeps_admin_when_leaving_other_groups() {
        let mut user = member();
        user.add_to_group("g2", Role::Admin, false);
        user.remove_from_group("g2", &[], &[], false);
        // still owns g1, so admin lists survive
        assert!(user.admin.contains(&"g2".to_string()));
        assert!(!user.group_ids.contains(&"g2".to_string()));
    }

    #[test]
    fn owner_leaving_own_group_loses_everything() {
        let mut user = member();
        user.remove_from_group("g1", &[], &[], true);
        assert!(user.sudo.is_empty());
        assert!(user.admin.is_empty());
        assert_eq!(user.group_ids, vec!["g2"]);
    }

    #[test]
    fn accept_request_moves_group_out_of_requests() {
        let mut user = member();
        user.set_request("g3");
        assert!(user.accept_request("g3", Role::Provider));
        assert!(user.requests.is_empty());
        assert!(user.provider.contains(&"g3".to_string()));
        assert!(!user.accept_request("g3", Role::Provider));
    }
}
