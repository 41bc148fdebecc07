use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::{generate_jwt, Claims};
use crate::billing::{report_usage, UsageAction, UsageReport};
use crate::config;
use crate::error::ApiError;
use crate::middleware::{require_role, ApiResponse, AuthUser};
use crate::models::user::{self, User};
use crate::models::{analytics, group, section, subject, tier};
use crate::services::quota;
use crate::types::{now_millis, Role, SubscriptionStatus};
use crate::AppState;

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SignUp {
    pub name: String,
    pub email: String,
    pub phone: String,
}

/// POST /user/signUp — public. Creates the account on the free tier, opens
/// a billing customer for it and returns a token for the new uid.
pub async fn sign_up(
    State(state): State<AppState>,
    Json(body): Json<SignUp>,
) -> Result<ApiResponse<Value>, ApiError> {
    if body.name.is_empty() {
        return Err(ApiError::bad_request("Name required"));
    }
    if body.email.is_empty() && body.phone.is_empty() {
        return Err(ApiError::bad_request("Phone / Email required"));
    }
    if !body.email.is_empty() && user::get_by_email(state.store.as_ref(), &body.email).await.is_ok()
    {
        return Err(ApiError::conflict("User already exists"));
    }
    if !body.phone.is_empty() && user::get_by_phone(state.store.as_ref(), &body.phone).await.is_ok()
    {
        return Err(ApiError::conflict("User already exists"));
    }

    let uid = Uuid::new_v4().to_string();
    let customer = state.billing.create_customer(&uid, &body.email, &body.phone).await?;

    let mut account = User {
        uid: uid.clone(),
        name: body.name,
        email: body.email,
        phone: body.phone,
        customer_id: customer.id,
        tier_id: config::config().billing.free_tier_id.clone(),
        subscription_status: SubscriptionStatus::Active,
        ..User::default()
    };
    user::save(state.store.as_ref(), &mut account).await?;

    let token = generate_jwt(Claims::new(uid.clone()))
        .map_err(|e| ApiError::internal_server_error(e.to_string()))?;
    Ok(ApiResponse::created(json!({ "uid": uid, "token": token })))
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InviteUser {
    pub email: String,
    pub phone: String,
    pub role: Option<Role>,
}

/// POST /user — invite someone into the caller's group. Unknown addresses
/// get a fresh account; the invitation stays pending until accepted.
pub async fn invite(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    headers: HeaderMap,
    Json(body): Json<InviteUser>,
) -> Result<ApiResponse<&'static str>, ApiError> {
    let mut scope = require_role(state.store.as_ref(), &headers, &auth.uid, &[Role::Admin]).await?;
    if body.email.is_empty() && body.phone.is_empty() {
        return Err(ApiError::bad_request("Email / Phone required"));
    }
    let role = body.role.ok_or_else(|| ApiError::bad_request("Missing fields"))?;

    let tier_doc = tier::get(state.store.as_ref(), &scope.group.tier_id).await?;
    quota::ensure_user_count_within(&tier_doc, scope.group.usage().user)?;
    quota::ensure_active(&scope.group)?;

    let existing = if !body.email.is_empty() {
        user::get_by_email(state.store.as_ref(), &body.email).await.ok()
    } else {
        user::get_by_phone(state.store.as_ref(), &body.phone).await.ok()
    };

    let group_id = scope.group.group_id.clone();
    let mut member = match existing {
        Some(found) => {
            if found.group_ids.iter().any(|g| g == &group_id) {
                return Err(ApiError::bad_request("User already exists"));
            }
            found
        }
        None => User {
            uid: Uuid::new_v4().to_string(),
            email: body.email.clone(),
            phone: body.phone.clone(),
            tier_id: config::config().billing.free_tier_id.clone(),
            subscription_status: SubscriptionStatus::Active,
            ..User::default()
        },
    };

    // invited providers and learners see the group's subjects right away
    let mut subject_ids = Vec::new();
    if role != Role::Admin {
        match subject::get_all_from_group(state.store.as_ref(), &group_id).await {
            Ok(subjects) => {
                for mut subject_doc in subjects {
                    let added = match role {
                        Role::Provider => subject_doc.add_user(&member.uid, None),
                        _ => subject_doc.add_user(&member.uid, Some(Role::Learner)),
                    };
                    if added {
                        subject::save(state.store.as_ref(), &mut subject_doc).await?;
                    }
                    subject_ids.push(subject_doc.subject_id.clone());
                }
            }
            Err(err) => tracing::warn!(%group_id, %err, "subject fan-out skipped"),
        }
    }

    member.add_to_group(&group_id, role, false);
    member.add_to_subjects(&subject_ids);
    if !member.group_requests.iter().any(|g| g == &group_id) {
        member.group_requests.push(group_id.clone());
    }
    member.remove_request(&group_id);
    user::save(state.store.as_ref(), &mut member).await?;

    scope.group.add_user(role, &member.uid);
    group::save(state.store.as_ref(), &mut scope.group).await?;

    let key = format!("{}{}", member.uid, now_millis());
    report_usage(
        state.billing.as_ref(),
        &config::config().billing.free_tier_id,
        UsageReport {
            tier_id: &scope.group.tier_id,
            subscription_status: scope.group.subscription_status,
            subscription_items: &scope.group.subscription_items,
            kind: crate::types::UsageKind::User,
            action: UsageAction::Update,
            idempotency_key: &key,
            quantity: 1,
        },
    )
    .await?;
    Ok(crate::middleware::response::created())
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdateRole {
    pub uid: String,
    pub role: Option<Role>,
}

/// PATCH /user/role — move a member to another role, rewriting their role
/// everywhere in the group's sections, subjects and analytics. Admins
/// cannot change their own role.
pub async fn update_role(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    headers: HeaderMap,
    Json(body): Json<UpdateRole>,
) -> Result<ApiResponse<&'static str>, ApiError> {
    let mut scope = require_role(state.store.as_ref(), &headers, &auth.uid, &[Role::Admin]).await?;
    if auth.uid == body.uid {
        return Err(ApiError::forbidden("Cannot change your own role"));
    }
    let new_role = body.role.ok_or_else(|| ApiError::bad_request("Missing fields"))?;
    if body.uid.is_empty() {
        return Err(ApiError::bad_request("Missing fields"));
    }

    let group_id = scope.group.group_id.clone();
    let mut member = user::get(state.store.as_ref(), &body.uid).await?;
    if !member.group_ids.iter().any(|g| g == &group_id) {
        return Err(ApiError::forbidden("User is not a member of this group"));
    }
    let old_role = scope
        .group
        .role_of(&body.uid)
        .ok_or_else(|| ApiError::forbidden("User is not a member of this group"))?;
    if old_role == new_role {
        return Ok(crate::middleware::response::updated());
    }

    member.change_role(&group_id, old_role, new_role);
    scope.group.roles.change_role(&body.uid, old_role, new_role);
    group::save(state.store.as_ref(), &mut scope.group).await?;

    // only the member's memberships inside this group change
    let section_ids: Vec<String> = member
        .section_ids
        .iter()
        .filter(|id| scope.group.section_ids.contains(id))
        .cloned()
        .collect();
    let subject_ids: Vec<String> = member
        .subject_ids
        .iter()
        .filter(|id| scope.group.subject_ids.contains(id))
        .cloned()
        .collect();
    user::save(state.store.as_ref(), &mut member).await?;

    for section_id in &section_ids {
        section::update_role(state.store.as_ref(), section_id, &body.uid, old_role, new_role)
            .await?;
    }
    for subject_id in &subject_ids {
        let subject_doc =
            subject::update_role(state.store.as_ref(), subject_id, &body.uid, old_role, new_role)
                .await?;
        for entity_id in &subject_doc.entity_ids {
            if let Err(err) =
                analytics::update_user_role(state.store.as_ref(), entity_id, &body.uid, new_role)
                    .await
            {
                tracing::warn!(%entity_id, uid = %body.uid, %err, "analytics role not updated");
            }
        }
    }
    Ok(crate::middleware::response::updated())
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GroupRef {
    pub group_id: String,
}

/// POST /user/request — toggle a join request: a second call withdraws it.
pub async fn toggle_request(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<GroupRef>,
) -> Result<ApiResponse<&'static str>, ApiError> {
    if body.group_id.is_empty() {
        return Err(ApiError::bad_request("Group ID required"));
    }
    let mut group_doc = group::get(state.store.as_ref(), &body.group_id).await?;
    let mut requester = user::get(state.store.as_ref(), &auth.uid).await?;

    if requester.requests.iter().any(|g| g == &body.group_id) {
        group_doc.remove_request(&auth.uid);
        requester.remove_request(&body.group_id);
    } else {
        if group_doc.blacklist.iter().any(|u| u == &auth.uid) {
            return Err(ApiError::forbidden("Cannot request to join this group"));
        }
        group_doc.set_request(&auth.uid)?;
        requester.set_request(&body.group_id);
    }
    group::save(state.store.as_ref(), &mut group_doc).await?;
    user::save(state.store.as_ref(), &mut requester).await?;
    Ok(crate::middleware::response::created())
}

/// PATCH /user/request — accept a group's invitation. The membership was
/// written at invite time; this clears the pending flag on both sides.
pub async fn accept_invitation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<GroupRef>,
) -> Result<ApiResponse<&'static str>, ApiError> {
    if body.group_id.is_empty() {
        return Err(ApiError::bad_request("Group ID required"));
    }
    let mut group_doc = group::get(state.store.as_ref(), &body.group_id).await?;
    let mut invitee = user::get(state.store.as_ref(), &auth.uid).await?;
    if !invitee.group_requests.iter().any(|g| g == &body.group_id) {
        return Err(ApiError::not_found("Invitation not found"));
    }
    group_doc.remove_group_request(&auth.uid);
    invitee.remove_group_request(&body.group_id);
    group::save(state.store.as_ref(), &mut group_doc).await?;
    user::save(state.store.as_ref(), &mut invitee).await?;
    Ok(crate::middleware::response::updated())
}

/// DELETE /user/request/:groupId — withdraw a pending join request.
pub async fn remove_request(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(group_id): Path<String>,
) -> Result<ApiResponse<&'static str>, ApiError> {
    let mut group_doc = group::get(state.store.as_ref(), &group_id).await?;
    let mut requester = user::get(state.store.as_ref(), &auth.uid).await?;
    group_doc.remove_request(&auth.uid);
    requester.remove_request(&group_id);
    group::save(state.store.as_ref(), &mut group_doc).await?;
    user::save(state.store.as_ref(), &mut requester).await?;
    Ok(crate::middleware::response::updated())
}
