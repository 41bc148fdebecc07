use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::billing::{InvoicePreview, PaymentMethod};
use crate::config;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, AuthUser};
use crate::models::{group, metadata, tier, user};
use crate::types::SubscriptionStatus;
use crate::AppState;

/// GET /user/payment — the caller's cards on file.
pub async fn list_methods(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<ApiResponse<Vec<PaymentMethod>>, ApiError> {
    let caller = user::get(state.store.as_ref(), &auth.uid).await?;
    if caller.payment_method_id.is_empty() {
        return Err(ApiError::not_found("No payment method on file"));
    }
    let methods = state.billing.list_payment_methods(&caller.customer_id).await?;
    Ok(ApiResponse::success(methods))
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AttachMethod {
    pub token: String,
}

/// POST /user/payment — attach a card and make it the default.
pub async fn attach_method(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<AttachMethod>,
) -> Result<ApiResponse<&'static str>, ApiError> {
    if body.token.is_empty() {
        return Err(ApiError::bad_request("Token required"));
    }
    let mut caller = user::get(state.store.as_ref(), &auth.uid).await?;
    let method = state.billing.attach_payment_method(&caller.customer_id, &body.token).await?;
    caller.payment_method_id = method.id;
    user::save(state.store.as_ref(), &mut caller).await?;
    Ok(crate::middleware::response::created())
}

/// DELETE /user/payment/:id — detach a card. Refused while a paid tier is
/// active, since the card backs the running subscription.
pub async fn detach_method(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(method_id): Path<String>,
) -> Result<ApiResponse<&'static str>, ApiError> {
    if method_id.is_empty() {
        return Err(ApiError::bad_request("Payment method ID required"));
    }
    let mut caller = user::get(state.store.as_ref(), &auth.uid).await?;
    if !caller.payment_method_id.is_empty()
        && caller.tier_id != config::config().billing.free_tier_id
    {
        return Err(ApiError::bad_request("Switch to free tier to delete card"));
    }
    state.billing.detach_payment_method(&method_id).await?;
    if caller.payment_method_id == method_id {
        caller.payment_method_id.clear();
        user::save(state.store.as_ref(), &mut caller).await?;
    }
    Ok(crate::middleware::response::updated())
}

/// POST /user/payment/intent — open a card-verification intent and hand the
/// client its secret.
pub async fn create_intent(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<ApiResponse<Value>, ApiError> {
    let caller = user::get(state.store.as_ref(), &auth.uid).await?;
    let intent = state.billing.create_payment_intent(&caller.customer_id).await?;
    Ok(ApiResponse::success(json!({ "secret": intent.client_secret })))
}

/// GET /user/invoice — preview of the next invoice.
pub async fn upcoming_invoice(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<ApiResponse<InvoicePreview>, ApiError> {
    let caller = user::get(state.store.as_ref(), &auth.uid).await?;
    let invoice = state.billing.upcoming_invoice(&caller.customer_id).await?;
    Ok(ApiResponse::success(invoice))
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CreateSubscription {
    pub tier_id: String,
}

/// POST /user/subscription — subscribe the caller to a tier with one
/// metered item per priced resource, then push the current usage of every
/// group they own so the first invoice starts from reality.
pub async fn create_subscription(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(body): Json<CreateSubscription>,
) -> Result<ApiResponse<Value>, ApiError> {
    if body.tier_id.is_empty() {
        return Err(ApiError::bad_request("Tier ID required"));
    }
    let mut caller = user::get(state.store.as_ref(), &auth.uid).await?;
    let tier_doc = tier::get(state.store.as_ref(), &body.tier_id).await?;
    let prices = tier_doc.priced_kinds();
    if prices.is_empty() {
        return Err(ApiError::bad_request("Nothing to subscribe to"));
    }

    let subscription = state.billing.create_subscription(&caller.customer_id, &prices).await?;
    let status = SubscriptionStatus::Active;

    let owned = group::get_all(state.store.as_ref(), &caller.sudo).await?;
    for mut owned_group in owned {
        owned_group.update_subscription(&body.tier_id, subscription.items.clone(), status);
        group::save(state.store.as_ref(), &mut owned_group).await?;

        let mut meta = metadata::get(state.store.as_ref(), &owned_group.group_id).await?;
        meta.subscription_status = status.as_str().to_string();
        metadata::set(state.store.as_ref(), &mut meta).await?;

        // seed the new items with what the group already uses
        let usage = owned_group.usage();
        for item in &subscription.items {
            let Some(kind) = item.kind else { continue };
            let quantity = usage.get(kind);
            if quantity <= 0 {
                continue;
            }
            let key = format!("{}{}", item.item_id, owned_group.group_id);
            if let Err(err) = state.billing.set_usage(&item.item_id, quantity, &key).await {
                tracing::warn!(group_id = %owned_group.group_id, %err, "usage not seeded");
            }
        }
    }

    caller.update_subscription(
        &body.tier_id,
        &subscription.subscription_id,
        subscription.items.clone(),
        status,
    );
    user::save(state.store.as_ref(), &mut caller).await?;

    Ok(ApiResponse::success(json!({
        "subscriptionId": subscription.subscription_id,
        "status": status.as_str(),
    })))
}

/// DELETE /user/subscription — cancel and fall back to the free tier. A
/// balance still owed blocks the cancellation.
pub async fn cancel_subscription(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<ApiResponse<&'static str>, ApiError> {
    let mut caller = user::get(state.store.as_ref(), &auth.uid).await?;
    if caller.subscription_id.is_empty() {
        return Err(ApiError::bad_request("No active subscription"));
    }
    let invoice = state.billing.upcoming_invoice(&caller.customer_id).await?;
    if invoice.amount_due > 0 {
        return Err(ApiError::bad_request(
            "You need to clear the bill first, Try removing groups, subjects etc.",
        ));
    }
    state.billing.cancel_subscription(&caller.subscription_id).await?;

    let free_tier = config::config().billing.free_tier_id.clone();
    let status = SubscriptionStatus::Active;
    for group_id in caller.sudo.clone() {
        let mut owned_group = group::get(state.store.as_ref(), &group_id).await?;
        owned_group.update_subscription(&free_tier, Vec::new(), status);
        group::save(state.store.as_ref(), &mut owned_group).await?;

        let mut meta = metadata::get(state.store.as_ref(), &group_id).await?;
        meta.subscription_status = status.as_str().to_string();
        metadata::set(state.store.as_ref(), &mut meta).await?;
    }

    caller.update_subscription(&free_tier, "", Vec::new(), status);
    user::save(state.store.as_ref(), &mut caller).await?;
    Ok(crate::middleware::response::updated())
}
