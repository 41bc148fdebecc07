use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::billing::{report_usage, UsageAction, UsageReport};
use crate::config;
use crate::error::ApiError;
use crate::middleware::{require_role, ApiResponse, AuthUser};
use crate::models::metadata::{self, Metadata, MetadataKind};
use crate::models::{analytics, group, section, subject, tier, user};
use crate::services::{cascade, quota};
use crate::types::{now_millis, Role, UsageKind};
use crate::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroup {
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub group_name: String,
}

/// POST /group — create a group under the caller's tier.
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<CreateGroup>,
) -> Result<ApiResponse<Value>, ApiError> {
    if body.group_id.is_empty() || body.group_name.is_empty() {
        return Err(ApiError::bad_request("Group ID and Group Name is required."));
    }
    if group::exists(state.store.as_ref(), &body.group_id).await? {
        return Err(ApiError::bad_request("Group already Exists"));
    }

    let mut caller = user::get(state.store.as_ref(), &auth.uid).await?;
    if caller.tier_id.is_empty() {
        return Err(ApiError::bad_request("Select Tier first"));
    }
    let tier_doc = tier::get(state.store.as_ref(), &caller.tier_id).await?;
    quota::ensure_count_within(&tier_doc, UsageKind::Group, caller.sudo.len() as i64)?;
    if !caller.subscription_status.in_good_standing() {
        return Err(ApiError::TierExpired(caller.subscription_status));
    }

    let mut group_doc = group::Group {
        group_id: body.group_id.clone(),
        group_name: body.group_name.clone(),
        sudo: auth.uid.clone(),
        tier_id: caller.tier_id.clone(),
        subscription_status: caller.subscription_status,
        subscription_items: caller.subscription_items.clone(),
        ..group::Group::default()
    };
    group_doc.roles.add(Role::Admin, &auth.uid);

    caller.add_to_group(&body.group_id, Role::Admin, true);
    user::save(state.store.as_ref(), &mut caller).await?;
    group::save(state.store.as_ref(), &mut group_doc).await?;
    metadata::set(
        state.store.as_ref(),
        &mut Metadata {
            id: body.group_id.clone(),
            name: body.group_name.clone(),
            kind: MetadataKind::Group,
            email: caller.email.clone(),
            phone: caller.phone.clone(),
            subscription_status: caller.subscription_status.as_str().to_string(),
            ..Metadata::default()
        },
    )
    .await?;

    let key = format!("{}{}", body.group_id, now_millis());
    report_usage(
        state.billing.as_ref(),
        &config::config().billing.free_tier_id,
        UsageReport {
            tier_id: &caller.tier_id,
            subscription_status: caller.subscription_status,
            subscription_items: &caller.subscription_items,
            kind: UsageKind::Group,
            action: UsageAction::Create,
            idempotency_key: &key,
            quantity: caller.sudo.len() as i64,
        },
    )
    .await?;

    Ok(ApiResponse::success(json!({ "groupId": body.group_id, "role": "admin" })))
}

#[derive(Deserialize)]
pub struct RenameGroup {
    #[serde(default)]
    pub name: String,
}

/// PATCH /group — rename, mirrored into metadata.
pub async fn update_name(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    headers: HeaderMap,
    Json(body): Json<RenameGroup>,
) -> Result<ApiResponse<&'static str>, ApiError> {
    let mut scope = require_role(state.store.as_ref(), &headers, &auth.uid, &[Role::Admin]).await?;
    if body.name.is_empty() {
        return Err(ApiError::bad_request("Name required"));
    }
    scope.group.group_name = body.name.clone();
    group::save(state.store.as_ref(), &mut scope.group).await?;

    let mut meta = metadata::get(state.store.as_ref(), &scope.group.group_id).await?;
    meta.name = body.name;
    metadata::set(state.store.as_ref(), &mut meta).await?;
    Ok(crate::middleware::response::updated())
}

#[derive(Deserialize)]
pub struct AcceptRequest {
    #[serde(default)]
    pub uid: String,
    pub role: Option<Role>,
}

/// PATCH /group/request — admit a user who asked to join, fanning them
/// into the group's subjects.
pub async fn accept_request(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    headers: HeaderMap,
    Json(body): Json<AcceptRequest>,
) -> Result<ApiResponse<&'static str>, ApiError> {
    let mut scope = require_role(state.store.as_ref(), &headers, &auth.uid, &[Role::Admin]).await?;
    let role = body.role.ok_or_else(|| ApiError::bad_request("User ID and Role required"))?;
    if body.uid.is_empty() {
        return Err(ApiError::bad_request("User ID and Role required"));
    }

    let mut joining = user::get(state.store.as_ref(), &body.uid).await?;
    let group_id = scope.group.group_id.clone();

    // providers see every group subject, learners enroll as learners
    let mut subject_ids = Vec::new();
    match subject::get_all_from_group(state.store.as_ref(), &group_id).await {
        Ok(subjects) => {
            for mut subject_doc in subjects {
                let added = match role {
                    Role::Provider => subject_doc.add_user(&body.uid, None),
                    Role::Learner => subject_doc.add_user(&body.uid, Some(Role::Learner)),
                    Role::Admin => false,
                };
                if added {
                    subject::save(state.store.as_ref(), &mut subject_doc).await?;
                }
                subject_ids.push(subject_doc.subject_id.clone());
            }
        }
        Err(err) => {
            tracing::warn!(%group_id, %err, "subject fan-out skipped");
        }
    }

    if !scope.group.accept_request(&body.uid, role) {
        return Err(ApiError::not_found("Request not found"));
    }
    group::save(state.store.as_ref(), &mut scope.group).await?;

    joining.add_to_subjects(&subject_ids);
    joining.accept_request(&group_id, role);
    joining.add_to_group(&group_id, role, false);
    user::save(state.store.as_ref(), &mut joining).await?;

    let key = format!("{}{}", body.uid, now_millis());
    report_usage(
        state.billing.as_ref(),
        &config::config().billing.free_tier_id,
        UsageReport {
            tier_id: &scope.group.tier_id,
            subscription_status: scope.group.subscription_status,
            subscription_items: &scope.group.subscription_items,
            kind: UsageKind::User,
            action: UsageAction::Update,
            idempotency_key: &key,
            quantity: 1,
        },
    )
    .await?;
    Ok(crate::middleware::response::updated())
}

/// DELETE /group/request/:userId — drop a pending join request.
pub async fn remove_request(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<ApiResponse<&'static str>, ApiError> {
    let mut scope = require_role(state.store.as_ref(), &headers, &auth.uid, &[Role::Admin]).await?;
    let mut requester = user::get(state.store.as_ref(), &user_id).await?;
    scope.group.remove_request(&user_id);
    requester.remove_request(&scope.group.group_id);
    group::save(state.store.as_ref(), &mut scope.group).await?;
    user::save(state.store.as_ref(), &mut requester).await?;
    Ok(crate::middleware::response::updated())
}

/// DELETE /group/:groupId — owner-only cascade delete of the whole group.
pub async fn remove(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(group_id): Path<String>,
) -> Result<ApiResponse<&'static str>, ApiError> {
    if group_id.is_empty() {
        return Err(ApiError::bad_request("Group ID required"));
    }
    let group_doc = group::get(state.store.as_ref(), &group_id).await?;
    if group_doc.sudo != auth.uid {
        return Err(ApiError::unauthorized("Only the group owner can remove it"));
    }
    let usage = group_doc.usage();
    let report =
        cascade::remove_group(state.store.as_ref(), state.files.as_ref(), &group_doc).await?;
    if !report.failed.is_empty() {
        tracing::warn!(%group_id, failures = report.failed.len(), "group cascade incomplete");
    }

    // settle every metered kind down by what the group was using
    let free_tier = &config::config().billing.free_tier_id;
    if group_doc.tier_id != *free_tier {
        for kind in UsageKind::ALL {
            let quantity = usage.get(kind);
            if quantity <= 0 {
                continue;
            }
            let result = report_usage(
                state.billing.as_ref(),
                free_tier,
                UsageReport {
                    tier_id: &group_doc.tier_id,
                    subscription_status: group_doc.subscription_status,
                    subscription_items: &group_doc.subscription_items,
                    kind,
                    action: UsageAction::Delete,
                    idempotency_key: &group_id,
                    quantity,
                },
            )
            .await;
            if let Err(err) = result {
                tracing::warn!(%group_id, kind = kind.as_str(), %err, "usage not settled");
            }
        }
    }
    Ok(ApiResponse::success("Successfully removed"))
}

/// DELETE /group/:groupId/user/:id — detach a member everywhere in the
/// group. Members may leave on their own; removing anyone else takes an
/// admin. The owner cannot be removed.
pub async fn remove_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    headers: HeaderMap,
    Path((group_id, user_id)): Path<(String, String)>,
) -> Result<ApiResponse<&'static str>, ApiError> {
    let allowed: &[Role] = if auth.uid == user_id {
        &[Role::Admin, Role::Provider, Role::Learner]
    } else {
        &[Role::Admin]
    };
    let scope = require_role(state.store.as_ref(), &headers, &auth.uid, allowed).await?;
    if scope.group.group_id != group_id {
        return Err(ApiError::bad_request("Group ID mismatch"));
    }
    let mut group_doc = scope.group;
    if group_doc.sudo == user_id {
        return Err(ApiError::forbidden("The group owner cannot be removed"));
    }
    let role = group_doc
        .role_of(&user_id)
        .ok_or_else(|| ApiError::forbidden("User is not a member of this group"))?;

    let mut member = user::get(state.store.as_ref(), &user_id).await?;
    if !member.group_ids.iter().any(|g| g == &group_id) {
        return Err(ApiError::forbidden("User is not a member of this group"));
    }

    let section_ids =
        section::remove_user_from_role_all(state.store.as_ref(), &group_id, &user_id, role)
            .await?;
    let subjects =
        subject::remove_user_from_role_all(state.store.as_ref(), &group_id, &user_id, role)
            .await?;
    let subject_ids: Vec<String> = subjects.iter().map(|s| s.subject_id.clone()).collect();
    for subject_doc in &subjects {
        for entity_id in &subject_doc.entity_ids {
            if let Err(err) =
                analytics::remove_entity_for_user(state.store.as_ref(), entity_id, &user_id).await
            {
                tracing::warn!(%entity_id, %user_id, %err, "user analytics not removed");
            }
        }
    }

    member.remove_from_group(&group_id, &section_ids, &subject_ids, false);
    user::save(state.store.as_ref(), &mut member).await?;
    group_doc.remove_user(&user_id);
    group::save(state.store.as_ref(), &mut group_doc).await?;

    let key = format!("{}{}", user_id, now_millis());
    report_usage(
        state.billing.as_ref(),
        &config::config().billing.free_tier_id,
        UsageReport {
            tier_id: &group_doc.tier_id,
            subscription_status: group_doc.subscription_status,
            subscription_items: &group_doc.subscription_items,
            kind: UsageKind::User,
            action: UsageAction::Delete,
            idempotency_key: &key,
            quantity: 1,
        },
    )
    .await?;
    Ok(crate::middleware::response::updated())
}
