use std::sync::Arc;

use axum::{middleware as axum_middleware, routing::get, Router};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod auth;
pub mod billing;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod storage;
pub mod store;
pub mod types;

use billing::BillingProvider;
use storage::FileStore;
use store::DocStore;

/// Shared service dependencies, injected so tests can run the whole router
/// against in-memory fakes.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocStore>,
    pub billing: Arc<dyn BillingProvider>,
    pub files: Arc<dyn FileStore>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .merge(public_routes())
        .merge(protected_routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn public_routes() -> Router<AppState> {
    use axum::routing::post;

    Router::new()
        .route("/user/signUp", post(handlers::user::sign_up))
        .route("/webhook", post(handlers::webhook::dispatch))
}

fn protected_routes() -> Router<AppState> {
    Router::new()
        .merge(group_routes())
        .merge(section_routes())
        .merge(subject_routes())
        .merge(entity_routes())
        .merge(user_routes())
        .merge(payment_routes())
        .layer(axum_middleware::from_fn(middleware::jwt_auth_middleware))
}

fn group_routes() -> Router<AppState> {
    use axum::routing::{delete, patch, post};
    use handlers::group;

    Router::new()
        .route("/group", post(group::create).patch(group::update_name))
        .route("/group/request", patch(group::accept_request))
        .route("/group/request/:userId", delete(group::remove_request))
        .route("/group/:groupId", delete(group::remove))
        .route("/group/:groupId/user/:id", delete(group::remove_user))
}

fn section_routes() -> Router<AppState> {
    use axum::routing::{delete, patch, post};
    use handlers::section;

    Router::new()
        .route("/section", post(section::create))
        .route("/section/user", post(section::add_user))
        .route("/section/name", patch(section::update_name))
        .route("/section/:sectionId", delete(section::remove))
        .route("/section/:sectionId/user/:id", delete(section::remove_user))
}

fn subject_routes() -> Router<AppState> {
    use axum::routing::{delete, patch, post};
    use handlers::subject;

    Router::new()
        .route("/subject", post(subject::create))
        .route("/subject/user", post(subject::add_user))
        .route("/subject/name", patch(subject::update_name))
        .route("/subject/:subjectId", delete(subject::remove))
        .route("/subject/:subjectId/user/:id", delete(subject::remove_user))
}

fn entity_routes() -> Router<AppState> {
    use axum::routing::{patch, post};
    use handlers::entity;

    Router::new()
        .route("/entity", post(entity::create))
        .route("/entity/all", patch(entity::update_batch))
        .route("/entity/:id", patch(entity::update).delete(entity::remove))
        .route("/entity/:id/engagement", post(entity::record_engagement))
}

fn user_routes() -> Router<AppState> {
    use axum::routing::{delete, patch, post};
    use handlers::user;

    Router::new()
        .route("/user", post(user::invite))
        .route("/user/role", patch(user::update_role))
        .route("/user/request", post(user::toggle_request).patch(user::accept_invitation))
        .route("/user/request/:groupId", delete(user::remove_request))
}

fn payment_routes() -> Router<AppState> {
    use axum::routing::{delete, get, post};
    use handlers::payment;

    Router::new()
        .route("/user/payment", get(payment::list_methods).post(payment::attach_method))
        .route("/user/payment/:id", delete(payment::detach_method))
        .route("/user/payment/intent", post(payment::create_intent))
        .route("/user/invoice", get(payment::upcoming_invoice))
        .route(
            "/user/subscription",
            post(payment::create_subscription).delete(payment::cancel_subscription),
        )
}

async fn root() -> axum::response::Json<Value> {
    axum::response::Json(json!({
        "name": "learnhub-api",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> axum::response::Json<Value> {
    // the store answers, so the service is usable
    let store_ok = state.store.get(store::TIERS, "health").await.is_ok();
    axum::response::Json(json!({
        "status": if store_ok { "healthy" } else { "degraded" },
        "timestamp": types::now_millis(),
    }))
}
