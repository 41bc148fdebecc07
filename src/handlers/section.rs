use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::{Extension, Json};
use serde::Deserialize;

use crate::billing::{report_usage, UsageAction, UsageReport};
use crate::config;
use crate::error::ApiError;
use crate::middleware::{require_role, ApiResponse, AuthUser};
use crate::models::section::{self, Propagation, Section};
use crate::models::{analytics, group, subject, tier, user};
use crate::services::{cascade, quota};
use crate::types::{Role, UsageKind};
use crate::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSection {
    #[serde(default)]
    pub section_name: String,
    /// Parent section id; absent for a root section.
    #[serde(default)]
    pub section_id: String,
}

/// POST /section — create a root or child section.
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    headers: HeaderMap,
    Json(body): Json<CreateSection>,
) -> Result<ApiResponse<&'static str>, ApiError> {
    let mut scope = require_role(state.store.as_ref(), &headers, &auth.uid, &[Role::Admin]).await?;
    if body.section_name.is_empty() {
        return Err(ApiError::bad_request("Section name required"));
    }

    let tier_doc = tier::get(state.store.as_ref(), &scope.group.tier_id).await?;
    quota::ensure_count_within(&tier_doc, UsageKind::Section, scope.group.usage().section)?;
    quota::ensure_active(&scope.group)?;

    let mut section_doc = Section {
        group_id: scope.group.group_id.clone(),
        section_name: body.section_name,
        ..Section::default()
    };
    section_doc.roles.add(Role::Admin, &auth.uid);

    let new_section_id = if body.section_id.is_empty() {
        section::add(state.store.as_ref(), section_doc).await?
    } else {
        section::add_child(state.store.as_ref(), section_doc, &body.section_id).await?
    };

    scope.group.add_section(&new_section_id);
    group::save(state.store.as_ref(), &mut scope.group).await?;

    let mut creator = user::get(state.store.as_ref(), &auth.uid).await?;
    creator.add_to_sections(&[new_section_id.clone()]);
    user::save(state.store.as_ref(), &mut creator).await?;

    report_usage(
        state.billing.as_ref(),
        &config::config().billing.free_tier_id,
        UsageReport {
            tier_id: &scope.group.tier_id,
            subscription_status: scope.group.subscription_status,
            subscription_items: &scope.group.subscription_items,
            kind: UsageKind::Section,
            action: UsageAction::Update,
            idempotency_key: &new_section_id,
            quantity: 1,
        },
    )
    .await?;
    Ok(crate::middleware::response::created())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddSectionUser {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub section_id: String,
}

/// POST /section/user — add a member with their group role, walking up the
/// ancestor chain; non-admins fan into the group's subjects.
pub async fn add_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    headers: HeaderMap,
    Json(body): Json<AddSectionUser>,
) -> Result<ApiResponse<&'static str>, ApiError> {
    let scope = require_role(state.store.as_ref(), &headers, &auth.uid, &[Role::Admin]).await?;
    if body.uid.is_empty() || body.section_id.is_empty() {
        return Err(ApiError::bad_request("Section ID and User ID are required"));
    }
    if !scope.group.section_ids.iter().any(|s| s == &body.section_id) {
        return Err(ApiError::bad_request("Section not part of the group"));
    }
    let role = scope
        .group
        .role_of(&body.uid)
        .ok_or_else(|| ApiError::bad_request("User is not a member of this group"))?;

    let mut member = user::get(state.store.as_ref(), &body.uid).await?;
    let section_doc = section::get(state.store.as_ref(), &body.section_id).await?;
    let has_parent = !section_doc.parent_id.is_empty();

    let mut section_ids =
        section::add_user(state.store.as_ref(), section_doc.clone(), &body.uid, role, Propagation::None)
            .await?;
    if has_parent {
        let up =
            section::add_user(state.store.as_ref(), section_doc, &body.uid, role, Propagation::Up)
                .await?;
        section_ids.extend(up);
    }
    member.add_to_sections(&section_ids);

    if role != Role::Admin {
        let mut subject_ids: Vec<String> = Vec::new();
        for section_id in &section_ids {
            let sec = section::get(state.store.as_ref(), section_id).await?;
            subject_ids.extend(sec.subject_ids);
        }
        match subject::get_all_from_group(state.store.as_ref(), &scope.group.group_id).await {
            Ok(group_subjects) => {
                subject_ids.extend(group_subjects.into_iter().map(|s| s.subject_id));
            }
            Err(err) => tracing::warn!(%err, "group subject fan-out skipped"),
        }
        for subject_id in &subject_ids {
            let mut subject_doc = subject::get(state.store.as_ref(), subject_id).await?;
            let added = match role {
                Role::Provider => subject_doc.add_user(&body.uid, None),
                _ => subject_doc.add_user(&body.uid, Some(Role::Learner)),
            };
            if added {
                subject::save(state.store.as_ref(), &mut subject_doc).await?;
            }
        }
        member.add_to_subjects(&subject_ids);
    }
    user::save(state.store.as_ref(), &mut member).await?;
    Ok(ApiResponse::success("User has been added"))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameSection {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub section_id: String,
}

/// PATCH /section/name
pub async fn update_name(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    headers: HeaderMap,
    Json(body): Json<RenameSection>,
) -> Result<ApiResponse<Section>, ApiError> {
    require_role(state.store.as_ref(), &headers, &auth.uid, &[Role::Admin]).await?;
    if body.name.is_empty() || body.section_id.is_empty() {
        return Err(ApiError::bad_request("Section ID and name required"));
    }
    let section_doc =
        section::update_name(state.store.as_ref(), &body.section_id, &body.name).await?;
    Ok(ApiResponse::success(section_doc))
}

/// DELETE /section/:sectionId — cascade delete the subtree and settle
/// quotas and billing from the report.
pub async fn remove(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    headers: HeaderMap,
    Path(section_id): Path<String>,
) -> Result<ApiResponse<String>, ApiError> {
    let mut scope = require_role(state.store.as_ref(), &headers, &auth.uid, &[Role::Admin]).await?;
    if section_id.is_empty() {
        return Err(ApiError::bad_request("Section ID required"));
    }
    let section_doc = section::get(state.store.as_ref(), &section_id).await?;
    let report = cascade::remove_section(
        state.store.as_ref(),
        state.files.as_ref(),
        &mut scope.group,
        &section_id,
    )
    .await?;
    if !report.failed.is_empty() {
        tracing::warn!(%section_id, failures = report.failed.len(), "section cascade incomplete");
    }

    let free_tier = &config::config().billing.free_tier_id;
    let settlements = [
        (UsageKind::Section, report.section_ids.len() as i64, section_id.clone()),
        (UsageKind::Subject, report.subject_ids.len() as i64, format!("{section_id}_subject")),
        (UsageKind::Storage, report.freed_bytes, format!("{section_id}_storage")),
    ];
    for (kind, quantity, key) in settlements {
        if quantity <= 0 {
            continue;
        }
        let result = report_usage(
            state.billing.as_ref(),
            free_tier,
            UsageReport {
                tier_id: &scope.group.tier_id,
                subscription_status: scope.group.subscription_status,
                subscription_items: &scope.group.subscription_items,
                kind,
                action: UsageAction::Delete,
                idempotency_key: &key,
                quantity,
            },
        )
        .await;
        if let Err(err) = result {
            tracing::warn!(%section_id, kind = kind.as_str(), %err, "usage not settled");
        }
    }
    Ok(ApiResponse::success(format!("{} has been removed", section_doc.section_name)))
}

/// DELETE /section/:sectionId/user/:id — prune a user from the subtree and
/// its subjects' analytics.
pub async fn remove_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    headers: HeaderMap,
    Path((section_id, user_id)): Path<(String, String)>,
) -> Result<ApiResponse<&'static str>, ApiError> {
    require_role(state.store.as_ref(), &headers, &auth.uid, &[Role::Admin]).await?;
    if section_id.is_empty() || user_id.is_empty() {
        return Err(ApiError::bad_request("Section ID and User ID are required"));
    }
    let mut member = user::get(state.store.as_ref(), &user_id).await?;
    if !member.section_ids.iter().any(|s| s == &section_id) {
        return Err(ApiError::bad_request("User not in section"));
    }

    let section_doc = section::get(state.store.as_ref(), &section_id).await?;
    let visited = section::remove_user(state.store.as_ref(), section_doc, &user_id).await?;

    let mut subject_ids = Vec::new();
    for sec_id in &visited {
        let subjects =
            subject::remove_user_from_section(state.store.as_ref(), sec_id, &user_id).await?;
        for subject_doc in subjects {
            for entity_id in &subject_doc.entity_ids {
                if let Err(err) =
                    analytics::remove_entity_for_user(state.store.as_ref(), entity_id, &user_id)
                        .await
                {
                    tracing::warn!(%entity_id, %user_id, %err, "user analytics not removed");
                }
            }
            subject_ids.push(subject_doc.subject_id);
        }
    }
    member.remove_from_sections(&visited, &subject_ids);
    user::save(state.store.as_ref(), &mut member).await?;
    Ok(ApiResponse::success("User has been removed"))
}
