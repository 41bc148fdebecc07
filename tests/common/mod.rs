//! In-process test harness: the full router against in-memory fakes.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use learnhub_api::auth::{generate_jwt, Claims};
use learnhub_api::billing::RecordingBilling;
use learnhub_api::models::group::{self, Group};
use learnhub_api::models::metadata::{self, Metadata, MetadataKind};
use learnhub_api::models::tier::{Limit, Tier};
use learnhub_api::models::user::{self, User};
use learnhub_api::models::{subject, tier};
use learnhub_api::storage::NullFileStore;
use learnhub_api::store::MemoryStore;
use learnhub_api::types::{Role, SubscriptionItem, UsageKind};
use learnhub_api::{app, AppState};

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub billing: Arc<RecordingBilling>,
    pub files: Arc<NullFileStore>,
}

pub fn test_app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let billing = Arc::new(RecordingBilling::new());
    let files = Arc::new(NullFileStore::new());
    let state = AppState {
        store: store.clone(),
        billing: billing.clone(),
        files: files.clone(),
    };
    TestApp { router: app(state), store, billing, files }
}

pub fn token(uid: &str) -> String {
    generate_jwt(Claims::new(uid.to_string())).expect("token")
}

pub struct TestRequest<'a> {
    pub method: Method,
    pub path: &'a str,
    pub uid: Option<&'a str>,
    pub group: Option<&'a str>,
    pub body: Option<Value>,
}

impl<'a> TestRequest<'a> {
    pub fn new(method: Method, path: &'a str) -> Self {
        Self { method, path, uid: None, group: None, body: None }
    }

    pub fn as_user(mut self, uid: &'a str) -> Self {
        self.uid = Some(uid);
        self
    }

    pub fn in_group(mut self, group_id: &'a str) -> Self {
        self.group = Some(group_id);
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Run one request through the router and decode the JSON envelope.
pub async fn send(app: &TestApp, req: TestRequest<'_>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(req.method).uri(req.path);
    if let Some(uid) = req.uid {
        builder = builder.header("authorization", format!("Bearer {}", token(uid)));
    }
    if let Some(group_id) = req.group {
        builder = builder.header("groupid", group_id);
    }
    let body = match req.body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .router
        .clone()
        .oneshot(builder.body(body).expect("request"))
        .await
        .expect("response");

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}

/// A paid tier with the given counted allowances and no priced items, so
/// billing stays out of the way unless a test wires items explicitly.
pub async fn seed_tier(
    app: &TestApp,
    tier_id: &str,
    groups: i64,
    users: i64,
    sections: i64,
    subjects: i64,
    storage_gb: i64,
) {
    let t = Tier {
        tier_id: tier_id.to_string(),
        name: tier_id.to_string(),
        group: Limit { allowed: groups, ..Limit::default() },
        user: Limit { allowed: users, ..Limit::default() },
        section: Limit { allowed: sections, ..Limit::default() },
        subject: Limit { allowed: subjects, ..Limit::default() },
        storage: Limit { allowed: storage_gb, ..Limit::default() },
        ..Tier::default()
    };
    tier::save(app.store.as_ref(), &t).await.expect("tier");
}

/// One metered item per usage kind, named after the kind.
pub fn subscription_items() -> Vec<SubscriptionItem> {
    UsageKind::ALL
        .into_iter()
        .map(|kind| SubscriptionItem {
            item_id: format!("si_{}", kind.as_str()),
            price_id: format!("price_{}", kind.as_str()),
            kind: Some(kind),
        })
        .collect()
}

pub async fn seed_user(app: &TestApp, uid: &str, tier_id: &str) {
    let mut u = User {
        uid: uid.to_string(),
        name: uid.to_string(),
        email: format!("{uid}@example.com"),
        tier_id: tier_id.to_string(),
        subscription_items: if tier_id == "free" { Vec::new() } else { subscription_items() },
        ..User::default()
    };
    user::save(app.store.as_ref(), &mut u).await.expect("user");
}

/// A group owned by `owner` on the given tier, with the owner enrolled as
/// admin on both sides.
pub async fn seed_group(app: &TestApp, group_id: &str, owner: &str, tier_id: &str) {
    let mut g = Group {
        group_id: group_id.to_string(),
        group_name: group_id.to_string(),
        sudo: owner.to_string(),
        tier_id: tier_id.to_string(),
        subscription_items: if tier_id == "free" { Vec::new() } else { subscription_items() },
        ..Group::default()
    };
    g.roles.add(Role::Admin, owner);
    group::save(app.store.as_ref(), &mut g).await.expect("group");

    let mut meta = Metadata {
        id: group_id.to_string(),
        name: group_id.to_string(),
        kind: MetadataKind::Group,
        ..Metadata::default()
    };
    metadata::set(app.store.as_ref(), &mut meta).await.expect("metadata");

    let mut u = user::get(app.store.as_ref(), owner).await.expect("owner");
    u.add_to_group(group_id, Role::Admin, true);
    user::save(app.store.as_ref(), &mut u).await.expect("owner");
}

pub async fn enroll(app: &TestApp, group_id: &str, uid: &str, role: Role) {
    let mut g = group::get(app.store.as_ref(), group_id).await.expect("group");
    g.roles.add(role, uid);
    group::save(app.store.as_ref(), &mut g).await.expect("group");

    let mut u = user::get(app.store.as_ref(), uid).await.expect("user");
    u.add_to_group(group_id, role, false);
    user::save(app.store.as_ref(), &mut u).await.expect("user");
}

pub async fn subject_by_id(app: &TestApp, subject_id: &str) -> subject::Subject {
    subject::get(app.store.as_ref(), subject_id).await.expect("subject")
}
