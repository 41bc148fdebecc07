//! Billing processor webhook.
//!
//! The processor is the source of truth for card and subscription state;
//! these events push that state back into the user document and every group
//! the user owns.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::middleware::ApiResponse;
use crate::models::{group, metadata, user};
use crate::types::SubscriptionStatus;
use crate::AppState;

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: WebhookData,
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct WebhookData {
    pub object: EventObject,
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct EventObject {
    pub id: String,
    pub customer: String,
    pub payment_method: String,
    pub status: Option<SubscriptionStatus>,
}

/// POST /webhook — unauthenticated; the processor calls it directly.
pub async fn dispatch(
    State(state): State<AppState>,
    Json(event): Json<WebhookEvent>,
) -> Result<ApiResponse<Value>, ApiError> {
    let object = event.data.object;
    match event.kind.as_str() {
        "payment_intent.succeeded" => card_verified(&state, object).await?,
        "customer.subscription.updated" => subscription_updated(&state, object).await?,
        "invoice.payment_failed" | "invoice.payment_action_required" => {
            payment_failed(&state, object).await?
        }
        other => {
            tracing::debug!(kind = %other, "unhandled webhook event");
            return Err(ApiError::bad_request("Unhandled event type"));
        }
    }
    Ok(ApiResponse::success(json!({ "received": true })))
}

/// A verification intent succeeded: the card becomes the user's default,
/// any previous card is detached, and the verification charge is refunded.
async fn card_verified(state: &AppState, object: EventObject) -> Result<(), ApiError> {
    if object.customer.is_empty() || object.payment_method.is_empty() {
        return Err(ApiError::bad_request("Request not processable"));
    }
    let mut account =
        user::get_by_customer_id(state.store.as_ref(), &object.customer).await?;

    if account.payment_method_id == object.payment_method {
        return Ok(());
    }
    if !account.payment_method_id.is_empty() {
        state.billing.detach_payment_method(&account.payment_method_id).await?;
    }
    state.billing.refund_payment_intent(&object.id).await?;
    let method =
        state.billing.attach_payment_method(&object.customer, &object.payment_method).await?;
    account.payment_method_id = method.id;
    user::save(state.store.as_ref(), &mut account).await?;
    Ok(())
}

/// The processor moved the subscription to a new status: stamp it through
/// the user and every group they own.
async fn subscription_updated(state: &AppState, object: EventObject) -> Result<(), ApiError> {
    let status = object.status.ok_or_else(|| ApiError::bad_request("Status required"))?;
    let mut account =
        user::get_by_customer_id(state.store.as_ref(), &object.customer).await?;
    if object.id != account.subscription_id {
        tracing::debug!(subscription = %object.id, "event for unknown subscription");
        return Ok(());
    }
    stamp_status(state, &mut account, status).await
}

/// A charge failed or needs action: the subscription is past due until the
/// processor recovers it.
async fn payment_failed(state: &AppState, object: EventObject) -> Result<(), ApiError> {
    if object.customer.is_empty() {
        return Err(ApiError::bad_request("Request not processable"));
    }
    let mut account =
        user::get_by_customer_id(state.store.as_ref(), &object.customer).await?;
    stamp_status(state, &mut account, SubscriptionStatus::PastDue).await
}

async fn stamp_status(
    state: &AppState,
    account: &mut user::User,
    status: SubscriptionStatus,
) -> Result<(), ApiError> {
    for group_id in account.sudo.clone() {
        let mut owned = group::get(state.store.as_ref(), &group_id).await?;
        owned.subscription_status = status;
        group::save(state.store.as_ref(), &mut owned).await?;

        match metadata::get(state.store.as_ref(), &group_id).await {
            Ok(mut meta) => {
                meta.subscription_status = status.as_str().to_string();
                metadata::set(state.store.as_ref(), &mut meta).await?;
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }
    }
    account.subscription_status = status;
    user::save(state.store.as_ref(), account).await?;
    Ok(())
}
