mod common;

use axum::http::{Method, StatusCode};
use common::{send, TestRequest};
use learnhub_api::models::tier::{Limit, Tier};
use learnhub_api::models::{group, metadata, tier, user};
use learnhub_api::types::SubscriptionStatus;
use serde_json::json;

/// A tier that actually prices its resources, so subscriptions have
/// something to meter.
async fn seed_priced_tier(app: &common::TestApp, tier_id: &str) {
    let priced = |price: &str, allowed: i64| Limit {
        price_id: price.to_string(),
        allowed,
        amount: 100,
    };
    let t = Tier {
        tier_id: tier_id.to_string(),
        name: tier_id.to_string(),
        group: priced("price_group", 5),
        user: priced("price_user", 100),
        section: priced("price_section", 20),
        subject: priced("price_subject", 20),
        storage: priced("price_storage", 10),
        ..Tier::default()
    };
    tier::save(app.store.as_ref(), &t).await.expect("tier");
}

#[tokio::test]
async fn sign_up_provisions_an_account() {
    let app = common::test_app();

    let req = TestRequest::new(Method::POST, "/user/signUp")
        .json(json!({ "name": "Priya", "email": "priya@example.com" }));
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::CREATED);
    let uid = body["data"]["uid"].as_str().unwrap().to_string();
    assert!(!body["data"]["token"].as_str().unwrap().is_empty());

    let account = user::get(app.store.as_ref(), &uid).await.unwrap();
    assert_eq!(account.tier_id, "free");
    assert_eq!(account.customer_id, "cus_1");
    assert_eq!(account.subscription_status, SubscriptionStatus::Active);

    // the same email cannot sign up twice
    let req = TestRequest::new(Method::POST, "/user/signUp")
        .json(json!({ "name": "Imposter", "email": "priya@example.com" }));
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn subscription_upgrades_and_cancels_across_owned_groups() {
    let app = common::test_app();
    common::seed_tier(&app, "free", 1, 5, 2, 2, 0).await;
    seed_priced_tier(&app, "paid").await;
    common::seed_user(&app, "owner", "free").await;
    common::seed_group(&app, "g1", "owner", "free").await;

    let req = TestRequest::new(Method::POST, "/user/subscription")
        .as_user("owner")
        .json(json!({ "tierId": "paid" }));
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["subscriptionId"], "sub_1");
    assert_eq!(body["data"]["status"], "active");

    let g = group::get(app.store.as_ref(), "g1").await.unwrap();
    assert_eq!(g.tier_id, "paid");
    assert_eq!(g.subscription_items.len(), 5);
    let caller = user::get(app.store.as_ref(), "owner").await.unwrap();
    assert_eq!(caller.tier_id, "paid");
    assert_eq!(caller.subscription_id, "sub_1");

    let req = TestRequest::new(Method::DELETE, "/user/subscription").as_user("owner");
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.billing.canceled_subscriptions().await, vec!["sub_1"]);

    let g = group::get(app.store.as_ref(), "g1").await.unwrap();
    assert_eq!(g.tier_id, "free");
    assert!(g.subscription_items.is_empty());
    let caller = user::get(app.store.as_ref(), "owner").await.unwrap();
    assert_eq!(caller.tier_id, "free");
    assert!(caller.subscription_id.is_empty());

    // nothing left to cancel
    let req = TestRequest::new(Method::DELETE, "/user/subscription").as_user("owner");
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "No active subscription");
}

#[tokio::test]
async fn card_cannot_be_detached_while_a_paid_tier_runs() {
    let app = common::test_app();
    common::seed_tier(&app, "pro", 2, 50, 10, 10, 5).await;
    common::seed_user(&app, "owner", "pro").await;

    let req = TestRequest::new(Method::POST, "/user/payment")
        .as_user("owner")
        .json(json!({ "token": "pm_1" }));
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::CREATED);

    let req = TestRequest::new(Method::DELETE, "/user/payment/pm_1").as_user("owner");
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Switch to free tier to delete card");
}

#[tokio::test]
async fn webhook_swaps_the_default_card() {
    let app = common::test_app();
    common::seed_user(&app, "owner", "free").await;
    let mut account = user::get(app.store.as_ref(), "owner").await.unwrap();
    account.customer_id = "cus_7".to_string();
    account.payment_method_id = "pm_old".to_string();
    user::save(app.store.as_ref(), &mut account).await.unwrap();

    let req = TestRequest::new(Method::POST, "/webhook").json(json!({
        "type": "payment_intent.succeeded",
        "data": { "object": {
            "id": "pi_1",
            "customer": "cus_7",
            "payment_method": "pm_new",
        }},
    }));
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["received"], true);

    let account = user::get(app.store.as_ref(), "owner").await.unwrap();
    assert_eq!(account.payment_method_id, "pm_new");
}

#[tokio::test]
async fn webhook_stamps_subscription_status_through_owned_groups() {
    let app = common::test_app();
    common::seed_tier(&app, "pro", 2, 50, 10, 10, 5).await;
    common::seed_user(&app, "owner", "pro").await;
    common::seed_group(&app, "g1", "owner", "pro").await;
    let mut account = user::get(app.store.as_ref(), "owner").await.unwrap();
    account.customer_id = "cus_7".to_string();
    account.subscription_id = "sub_9".to_string();
    user::save(app.store.as_ref(), &mut account).await.unwrap();

    let req = TestRequest::new(Method::POST, "/webhook").json(json!({
        "type": "customer.subscription.updated",
        "data": { "object": {
            "id": "sub_9",
            "customer": "cus_7",
            "status": "past_due",
        }},
    }));
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);

    let g = group::get(app.store.as_ref(), "g1").await.unwrap();
    assert_eq!(g.subscription_status, SubscriptionStatus::PastDue);
    let meta = metadata::get(app.store.as_ref(), "g1").await.unwrap();
    assert_eq!(meta.subscription_status, "past_due");
    let account = user::get(app.store.as_ref(), "owner").await.unwrap();
    assert_eq!(account.subscription_status, SubscriptionStatus::PastDue);
}

#[tokio::test]
async fn webhook_rejects_unknown_event_types() {
    let app = common::test_app();

    let req = TestRequest::new(Method::POST, "/webhook").json(json!({
        "type": "charge.refunded",
        "data": { "object": {} },
    }));
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Unhandled event type");
}

#[tokio::test]
async fn a_lapsed_subscription_blocks_resource_creation() {
    let app = common::test_app();
    common::seed_tier(&app, "pro", 2, 50, 10, 10, 5).await;
    common::seed_user(&app, "owner", "pro").await;
    common::seed_group(&app, "g1", "owner", "pro").await;
    let mut g = group::get(app.store.as_ref(), "g1").await.unwrap();
    g.subscription_status = SubscriptionStatus::Canceled;
    group::save(app.store.as_ref(), &mut g).await.unwrap();

    let req = TestRequest::new(Method::POST, "/section")
        .as_user("owner")
        .in_group("g1")
        .json(json!({ "sectionName": "algebra" }));
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "TIER_EXPIRED");
}
