use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::{Extension, Json};
use serde::Deserialize;

use crate::billing::{report_usage, UsageAction, UsageReport};
use crate::config;
use crate::error::ApiError;
use crate::middleware::{require_role, ApiResponse, AuthUser, GroupScope};
use crate::models::analytics::{self, Engagement, EntityAnalytics, UserAnalytics};
use crate::models::entity::{self, Entity};
use crate::models::{group, subject, tier};
use crate::services::quota;
use crate::storage::FileStore;
use crate::types::{now_millis, ContentType, Role, UsageKind};
use crate::AppState;

#[derive(Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateEntity {
    pub subject_id: String,
    pub title: String,
    pub author: String,
    pub description: String,
    pub divider: bool,
    pub duration: i64,
    pub content_provider: String,
    pub content_name: String,
    pub content_url: String,
    pub content_type: ContentType,
    pub content_size: i64,
    pub thumbnail_name: String,
    pub thumbnail_image_url: String,
    pub other_urls: Vec<String>,
}

impl Default for CreateEntity {
    fn default() -> Self {
        Self {
            subject_id: String::new(),
            title: String::new(),
            author: String::new(),
            description: String::new(),
            divider: false,
            duration: 0,
            content_provider: String::new(),
            content_name: String::new(),
            content_url: String::new(),
            content_type: ContentType::Image,
            content_size: 0,
            thumbnail_name: String::new(),
            thumbnail_image_url: String::new(),
            other_urls: Vec::new(),
        }
    }
}

/// POST /entity — add content to a subject.
///
/// The blob is uploaded before this call, so every rejection path has to
/// release it again.
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    headers: HeaderMap,
    Json(body): Json<CreateEntity>,
) -> Result<ApiResponse<String>, ApiError> {
    let mut scope =
        require_role(state.store.as_ref(), &headers, &auth.uid, &[Role::Admin, Role::Provider])
            .await?;

    if body.subject_id.is_empty() || body.title.is_empty() || body.author.is_empty() {
        release_upload(state.files.as_ref(), &body.content_name, body.content_type, &scope.group.group_id)
            .await;
        return Err(ApiError::bad_request("Subject ID, Title and Author is required"));
    }
    if let Err(err) = quota::ensure_active(&scope.group) {
        release_upload(state.files.as_ref(), &body.content_name, body.content_type, &scope.group.group_id)
            .await;
        return Err(err);
    }

    // the description is stored inline and counts against storage too
    let content_length = body.description.len() as i64;
    let new_size = if body.description.is_empty() {
        0
    } else {
        body.content_size + content_length
    };
    if new_size > 0 {
        let tier_doc = tier::get(state.store.as_ref(), &scope.group.tier_id).await?;
        if let Err(err) =
            quota::ensure_storage_within(&tier_doc, scope.group.current_storage, new_size)
        {
            release_upload(
                state.files.as_ref(),
                &body.content_name,
                body.content_type,
                &scope.group.group_id,
            )
            .await;
            return Err(err);
        }
    }

    let mut subject_doc = subject::get(state.store.as_ref(), &body.subject_id).await?;
    let mut entity_doc = Entity {
        group_id: scope.group.group_id.clone(),
        section_ids: subject_doc.section_ids.clone(),
        subject_id: body.subject_id.clone(),
        subject_name: subject_doc.subject_name.clone(),
        author: body.author,
        divider: body.divider,
        title: body.title,
        description: body.description,
        duration: body.duration,
        content_length,
        content_provider: body.content_provider,
        content_name: body.content_name,
        content_url: body.content_url,
        content_type: body.content_type,
        content_size: body.content_size,
        thumbnail_name: body.thumbnail_name,
        thumbnail_image_url: body.thumbnail_image_url,
        other_urls: body.other_urls,
        ..Entity::default()
    };
    let entity_id = entity::add(state.store.as_ref(), entity_doc.clone()).await?;
    entity_doc.entity_id = entity_id.clone();

    subject_doc.add_entity(&entity_id);
    subject::save(state.store.as_ref(), &mut subject_doc).await?;

    let roles = subject_doc.roles.clone();
    let mut entity_analytics = EntityAnalytics::seed(
        &entity_id,
        &scope.group.group_id,
        &subject_doc.section_ids,
        &body.subject_id,
        body.content_type,
        |role| roles.list(role).clone(),
    );
    analytics::set_entity(state.store.as_ref(), &mut entity_analytics).await?;

    if new_size > 0 {
        scope.group.update_storage(new_size);
        group::save(state.store.as_ref(), &mut scope.group).await?;
        report_usage(
            state.billing.as_ref(),
            &config::config().billing.free_tier_id,
            UsageReport {
                tier_id: &scope.group.tier_id,
                subscription_status: scope.group.subscription_status,
                subscription_items: &scope.group.subscription_items,
                kind: UsageKind::Storage,
                action: UsageAction::Update,
                idempotency_key: &entity_id,
                quantity: new_size,
            },
        )
        .await?;
    }
    Ok(ApiResponse::success(entity_id))
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdateEntity {
    pub title: String,
    pub description: String,
}

/// PATCH /entity/:id — edit title and description. A longer or shorter
/// description moves the group's storage by the delta.
pub async fn update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    headers: HeaderMap,
    Path(entity_id): Path<String>,
    Json(body): Json<UpdateEntity>,
) -> Result<ApiResponse<&'static str>, ApiError> {
    let mut scope =
        require_role(state.store.as_ref(), &headers, &auth.uid, &[Role::Admin, Role::Provider])
            .await?;
    if entity_id.is_empty() || body.title.is_empty() {
        return Err(ApiError::bad_request("Title required"));
    }
    let mut entity_doc = entity::get(state.store.as_ref(), &entity_id).await?;
    if entity_doc.group_id != scope.group.group_id {
        return Err(ApiError::forbidden("Entity belongs to another group"));
    }
    ensure_provider_on_subject(&state, &scope, &entity_doc.subject_id).await?;

    let diff = body.description.len() as i64 - entity_doc.description.len() as i64;
    entity_doc.title = body.title;
    entity_doc.description = body.description;
    entity_doc.content_length += diff;
    entity_doc.content_size += diff;
    entity::save(state.store.as_ref(), &mut entity_doc).await?;

    if diff != 0 {
        scope.group.update_storage(diff);
        group::save(state.store.as_ref(), &mut scope.group).await?;
        let key = format!("{}{}", entity_id, now_millis());
        report_usage(
            state.billing.as_ref(),
            &config::config().billing.free_tier_id,
            UsageReport {
                tier_id: &scope.group.tier_id,
                subscription_status: scope.group.subscription_status,
                subscription_items: &scope.group.subscription_items,
                kind: UsageKind::Storage,
                action: UsageAction::Update,
                idempotency_key: &key,
                quantity: diff,
            },
        )
        .await?;
    }
    Ok(crate::middleware::response::updated())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBatch {
    #[serde(default)]
    pub entities: Vec<Entity>,
}

/// PATCH /entity/all — persist a client-side reordering of a subject's
/// entities.
pub async fn update_batch(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    headers: HeaderMap,
    Json(body): Json<UpdateBatch>,
) -> Result<ApiResponse<&'static str>, ApiError> {
    let scope =
        require_role(state.store.as_ref(), &headers, &auth.uid, &[Role::Admin, Role::Provider])
            .await?;
    if body.entities.is_empty() {
        return Err(ApiError::bad_request("Entities required"));
    }
    if body.entities.iter().any(|e| e.group_id != scope.group.group_id) {
        return Err(ApiError::forbidden("Entity belongs to another group"));
    }
    if scope.role == Role::Provider {
        let subject_id = &body.entities[0].subject_id;
        if body.entities.iter().any(|e| &e.subject_id != subject_id) {
            return Err(ApiError::bad_request("Invalid data"));
        }
        ensure_provider_on_subject(&state, &scope, subject_id).await?;
    }
    entity::update_batch(state.store.as_ref(), body.entities).await?;
    Ok(crate::middleware::response::updated())
}

/// DELETE /entity/:id — admins always, providers only on their own
/// subjects. Storage is handed back to the group.
pub async fn remove(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    headers: HeaderMap,
    Path(entity_id): Path<String>,
) -> Result<ApiResponse<&'static str>, ApiError> {
    let mut scope =
        require_role(state.store.as_ref(), &headers, &auth.uid, &[Role::Admin, Role::Provider])
            .await?;
    let entity_doc = entity::get(state.store.as_ref(), &entity_id).await?;
    if entity_doc.group_id != scope.group.group_id {
        return Err(ApiError::forbidden("Entity belongs to another group"));
    }
    let mut subject_doc = subject::get(state.store.as_ref(), &entity_doc.subject_id).await?;
    if scope.role == Role::Provider
        && !subject_doc.roles.provider.iter().any(|u| u == &auth.uid)
    {
        return Err(ApiError::unauthorized("Not a provider on this subject"));
    }

    entity::remove(state.store.as_ref(), state.files.as_ref(), &entity_doc).await?;
    subject_doc.remove_entities(&[entity_id.clone()]);
    subject::save(state.store.as_ref(), &mut subject_doc).await?;

    let members = subject_doc.roles.members();
    analytics::remove_entities_complete(state.store.as_ref(), &[entity_id.clone()], &members)
        .await;

    if entity_doc.content_size > 0 {
        scope.group.update_storage(-entity_doc.content_size);
        group::save(state.store.as_ref(), &mut scope.group).await?;
        let result = report_usage(
            state.billing.as_ref(),
            &config::config().billing.free_tier_id,
            UsageReport {
                tier_id: &scope.group.tier_id,
                subscription_status: scope.group.subscription_status,
                subscription_items: &scope.group.subscription_items,
                kind: UsageKind::Storage,
                action: UsageAction::Delete,
                idempotency_key: &entity_id,
                quantity: entity_doc.content_size,
            },
        )
        .await;
        if let Err(err) = result {
            tracing::warn!(%entity_id, %err, "usage not settled");
        }
    }
    Ok(crate::middleware::response::updated())
}

/// POST /entity/:id/engagement — fold one interaction into the caller's
/// running record and the entity's role rosters.
pub async fn record_engagement(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    headers: HeaderMap,
    Path(entity_id): Path<String>,
    Json(body): Json<Engagement>,
) -> Result<ApiResponse<UserAnalytics>, ApiError> {
    let scope = require_role(
        state.store.as_ref(),
        &headers,
        &auth.uid,
        &[Role::Admin, Role::Provider, Role::Learner],
    )
    .await?;
    let mut entity_analytics = analytics::get_entity(state.store.as_ref(), &entity_id).await?;

    let record = UserAnalytics {
        uid: auth.uid.clone(),
        role: scope.role,
        entity_id: entity_id.clone(),
        group_id: entity_analytics.group_id.clone(),
        section_ids: entity_analytics.section_ids.clone(),
        subject_id: entity_analytics.subject_id.clone(),
        ..UserAnalytics::default()
    };
    let record = analytics::record_engagement(state.store.as_ref(), record, &body).await?;

    entity_analytics.apply(&record);
    analytics::set_entity(state.store.as_ref(), &mut entity_analytics).await?;
    Ok(ApiResponse::success(record))
}

async fn ensure_provider_on_subject(
    state: &AppState,
    scope: &GroupScope,
    subject_id: &str,
) -> Result<(), ApiError> {
    if scope.role != Role::Provider {
        return Ok(());
    }
    let subject_doc = subject::get(state.store.as_ref(), subject_id).await?;
    if !subject_doc.roles.provider.iter().any(|u| u == &scope.uid) {
        return Err(ApiError::unauthorized("Not a provider on this subject"));
    }
    Ok(())
}

/// Release an already-uploaded blob after a rejected create. The thumbnail
/// sits next to images and videos under a derived name.
async fn release_upload(
    files: &dyn FileStore,
    content_name: &str,
    content_type: ContentType,
    group_id: &str,
) {
    if content_name.is_empty() {
        return;
    }
    if let Err(err) = files.remove_file(content_name, content_type, group_id).await {
        tracing::warn!(%content_name, %err, "uploaded blob not released");
    }
    if matches!(content_type, ContentType::Image | ContentType::Video) {
        let thumb = format!("thumb_{content_name}.png");
        if let Err(err) = files.remove_file(&thumb, ContentType::Image, group_id).await {
            tracing::warn!(%thumb, %err, "thumbnail not released");
        }
    }
}
