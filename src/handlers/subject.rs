use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::{Extension, Json};
use serde::Deserialize;

use crate::billing::{report_usage, UsageAction, UsageReport};
use crate::config;
use crate::error::ApiError;
use crate::middleware::{require_role, ApiResponse, AuthUser};
use crate::models::section::{self, Propagation};
use crate::models::subject::{self, Subject};
use crate::models::{analytics, entity, group, tier, user};
use crate::services::{cascade, quota};
use crate::types::{ContentType, Role, UsageKind};
use crate::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubject {
    #[serde(default)]
    pub subject_name: String,
    /// Owning section; absent for a group-level subject.
    #[serde(default)]
    pub section_id: String,
}

/// POST /subject — create a subject, inheriting the owning section's
/// learners.
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    headers: HeaderMap,
    Json(body): Json<CreateSubject>,
) -> Result<ApiResponse<&'static str>, ApiError> {
    let mut scope = require_role(state.store.as_ref(), &headers, &auth.uid, &[Role::Admin]).await?;
    if body.subject_name.is_empty() {
        return Err(ApiError::bad_request("Subject name required"));
    }
    let tier_doc = tier::get(state.store.as_ref(), &scope.group.tier_id).await?;
    quota::ensure_count_within(&tier_doc, UsageKind::Subject, scope.group.usage().subject)?;
    quota::ensure_active(&scope.group)?;

    let mut learners = Vec::new();
    let mut section_ids = Vec::new();
    let mut owning_section = None;
    if !body.section_id.is_empty() {
        let section_doc = section::get(state.store.as_ref(), &body.section_id).await?;
        section_ids.push(body.section_id.clone());
        section_ids.extend(section_doc.parent_ids.clone());
        learners = section_doc.roles.learner.clone();
        owning_section = Some(section_doc);
    }

    let mut subject_doc = Subject {
        group_id: scope.group.group_id.clone(),
        subject_name: body.subject_name,
        section_id: body.section_id.clone(),
        section_ids,
        ..Subject::default()
    };
    subject_doc.roles.add(Role::Admin, &auth.uid);
    for learner in &learners {
        subject_doc.roles.add(Role::Learner, learner);
    }
    let subject_id = subject::add(state.store.as_ref(), subject_doc).await?;

    if let Some(mut section_doc) = owning_section {
        section_doc.add_subject(&subject_id);
        section::save(state.store.as_ref(), &mut section_doc).await?;
    }
    scope.group.add_subject(&subject_id);
    group::save(state.store.as_ref(), &mut scope.group).await?;

    let mut creator = user::get(state.store.as_ref(), &auth.uid).await?;
    creator.add_to_subjects(&[subject_id.clone()]);
    user::save(state.store.as_ref(), &mut creator).await?;
    for learner in &learners {
        let mut learner_doc = user::get(state.store.as_ref(), learner).await?;
        learner_doc.add_to_subjects(&[subject_id.clone()]);
        user::save(state.store.as_ref(), &mut learner_doc).await?;
    }

    report_usage(
        state.billing.as_ref(),
        &config::config().billing.free_tier_id,
        UsageReport {
            tier_id: &scope.group.tier_id,
            subscription_status: scope.group.subscription_status,
            subscription_items: &scope.group.subscription_items,
            kind: UsageKind::Subject,
            action: UsageAction::Update,
            idempotency_key: &subject_id,
            quantity: 1,
        },
    )
    .await?;
    Ok(crate::middleware::response::created())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameSubject {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub subject_id: String,
}

/// PATCH /subject/name — rename, refreshing the denormalized name on the
/// subject's entities.
pub async fn update_name(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    headers: HeaderMap,
    Json(body): Json<RenameSubject>,
) -> Result<ApiResponse<Subject>, ApiError> {
    require_role(state.store.as_ref(), &headers, &auth.uid, &[Role::Admin]).await?;
    if body.name.is_empty() || body.subject_id.is_empty() {
        return Err(ApiError::bad_request("Subject ID and name required"));
    }
    let subject_doc =
        subject::update_name(state.store.as_ref(), &body.subject_id, &body.name).await?;
    entity::rename_subject(state.store.as_ref(), &body.subject_id, &body.name).await?;
    Ok(ApiResponse::success(subject_doc))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddSubjectUser {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub subject_id: String,
}

/// POST /subject/user — enroll a member with their group role; visibility
/// propagates up the owning section chain and into sibling subjects.
pub async fn add_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    headers: HeaderMap,
    Json(body): Json<AddSubjectUser>,
) -> Result<ApiResponse<&'static str>, ApiError> {
    let scope = require_role(state.store.as_ref(), &headers, &auth.uid, &[Role::Admin]).await?;
    if body.uid.is_empty() || body.subject_id.is_empty() {
        return Err(ApiError::bad_request("Subject ID and User ID are required"));
    }
    if !scope.group.subject_ids.iter().any(|s| s == &body.subject_id) {
        return Err(ApiError::bad_request("Subject not part of the group"));
    }
    let role = scope
        .group
        .role_of(&body.uid)
        .ok_or_else(|| ApiError::bad_request("User is not a member of this group"))?;

    let mut member = user::get(state.store.as_ref(), &body.uid).await?;
    let mut subject_doc = subject::get(state.store.as_ref(), &body.subject_id).await?;
    let entity_ids = subject_doc.entity_ids.clone();
    let enrolled_as = if role == Role::Provider { None } else { Some(role) };
    if subject_doc.add_user(&body.uid, enrolled_as) {
        subject::save(state.store.as_ref(), &mut subject_doc).await?;
    }

    // pull the user up the owning section chain for visibility
    let mut touched_sections = Vec::new();
    if !subject_doc.section_id.is_empty() {
        match section::get(state.store.as_ref(), &subject_doc.section_id).await {
            Ok(section_doc) => {
                if !section_doc.roles.list(role).iter().any(|u| u == &body.uid) {
                    touched_sections = section::add_user(
                        state.store.as_ref(),
                        section_doc,
                        &body.uid,
                        role,
                        Propagation::Up,
                    )
                    .await?;
                }
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }
    }

    if role != Role::Admin {
        let mut sibling_ids: Vec<String> = Vec::new();
        for section_id in &touched_sections {
            let sec = section::get(state.store.as_ref(), section_id).await?;
            sibling_ids.extend(sec.subject_ids);
        }
        match subject::get_all_from_group(state.store.as_ref(), &scope.group.group_id).await {
            Ok(group_subjects) => {
                sibling_ids.extend(group_subjects.into_iter().map(|s| s.subject_id));
            }
            Err(err) => tracing::warn!(%err, "group subject fan-out skipped"),
        }
        for sibling_id in &sibling_ids {
            let mut sibling = subject::get(state.store.as_ref(), sibling_id).await?;
            let added = match role {
                Role::Provider => sibling.add_user(&body.uid, None),
                _ => sibling.add_user(&body.uid, Some(Role::Learner)),
            };
            if added {
                subject::save(state.store.as_ref(), &mut sibling).await?;
            }
        }
        member.add_to_subjects(&sibling_ids);
    }
    member.add_to_subjects(&[body.subject_id.clone()]);
    member.add_to_sections(&touched_sections);
    user::save(state.store.as_ref(), &mut member).await?;

    // the user joins each entity's "not yet seen" rosters
    for entity_id in &entity_ids {
        let entity_doc = match entity::get(state.store.as_ref(), entity_id).await {
            Ok(doc) => doc,
            Err(err) => {
                tracing::warn!(%entity_id, %err, "entity roster not updated");
                continue;
            }
        };
        match analytics::get_entity(state.store.as_ref(), entity_id).await {
            Ok(mut entity_analytics) => {
                let roster = entity_analytics.roster_mut(role);
                roster.users_not_viewed.push(body.uid.clone());
                match entity_doc.content_type {
                    ContentType::Document => roster.users_not_downloaded.push(body.uid.clone()),
                    ContentType::Video => roster.users_not_watched.push(body.uid.clone()),
                    ContentType::Image => {}
                }
                analytics::set_entity(state.store.as_ref(), &mut entity_analytics).await?;
            }
            Err(err) => tracing::warn!(%entity_id, %err, "entity roster not updated"),
        }
    }
    Ok(ApiResponse::success("User has been added"))
}

/// DELETE /subject/:subjectId — cascade delete the subject and settle
/// billing from the report.
pub async fn remove(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    headers: HeaderMap,
    Path(subject_id): Path<String>,
) -> Result<ApiResponse<String>, ApiError> {
    let mut scope = require_role(state.store.as_ref(), &headers, &auth.uid, &[Role::Admin]).await?;
    if subject_id.is_empty() {
        return Err(ApiError::bad_request("Subject ID required"));
    }
    let subject_doc = subject::get(state.store.as_ref(), &subject_id).await?;
    let report = cascade::remove_subject(
        state.store.as_ref(),
        state.files.as_ref(),
        &mut scope.group,
        &subject_id,
    )
    .await?;
    if !report.failed.is_empty() {
        tracing::warn!(%subject_id, failures = report.failed.len(), "subject cascade incomplete");
    }

    let free_tier = &config::config().billing.free_tier_id;
    let settlements = [
        (UsageKind::Subject, 1, subject_id.clone()),
        (UsageKind::Storage, report.freed_bytes, format!("{subject_id}_storage")),
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
            tracing::warn!(%subject_id, kind = kind.as_str(), %err, "usage not settled");
        }
    }
    Ok(ApiResponse::success(format!("{} has been removed", subject_doc.subject_name)))
}

/// DELETE /subject/:subjectId/user/:id
pub async fn remove_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    headers: HeaderMap,
    Path((subject_id, user_id)): Path<(String, String)>,
) -> Result<ApiResponse<String>, ApiError> {
    require_role(state.store.as_ref(), &headers, &auth.uid, &[Role::Admin]).await?;
    if subject_id.is_empty() || user_id.is_empty() {
        return Err(ApiError::bad_request("Subject ID and User ID are required"));
    }
    let mut subject_doc = subject::get(state.store.as_ref(), &subject_id).await?;
    if !subject_doc.roles.remove(&user_id) {
        return Err(ApiError::bad_request(format!(
            "User does not exist in {}",
            subject_doc.subject_name
        )));
    }
    subject::save(state.store.as_ref(), &mut subject_doc).await?;

    let mut member = user::get(state.store.as_ref(), &user_id).await?;
    member.remove_from_subjects(&[subject_id.clone()]);
    user::save(state.store.as_ref(), &mut member).await?;

    for entity_id in &subject_doc.entity_ids {
        if let Err(err) =
            analytics::remove_entity_for_user(state.store.as_ref(), entity_id, &user_id).await
        {
            tracing::warn!(%entity_id, %user_id, %err, "user analytics not removed");
        }
    }
    Ok(ApiResponse::success(format!(
        "User has been removed from {}",
        subject_doc.subject_name
    )))
}
