mod common;

use axum::http::{Method, StatusCode};
use common::{send, TestRequest};
use learnhub_api::models::{group, user};
use learnhub_api::types::Role;
use serde_json::json;

#[tokio::test]
async fn group_creation_round_trip() {
    let app = common::test_app();
    common::seed_tier(&app, "pro", 2, 50, 10, 10, 5).await;
    common::seed_user(&app, "owner", "pro").await;

    let req = TestRequest::new(Method::POST, "/group")
        .as_user("owner")
        .json(json!({ "groupId": "acme", "groupName": "Acme School" }));
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["groupId"], "acme");
    assert_eq!(body["data"]["role"], "admin");

    let g = group::get(app.store.as_ref(), "acme").await.unwrap();
    assert_eq!(g.sudo, "owner");
    assert_eq!(g.role_of("owner"), Some(Role::Admin));

    let owner = user::get(app.store.as_ref(), "owner").await.unwrap();
    assert_eq!(owner.sudo, vec!["acme"]);
    assert_eq!(owner.group_ids, vec!["acme"]);

    // a second group under the same id is refused
    let req = TestRequest::new(Method::POST, "/group")
        .as_user("owner")
        .json(json!({ "groupId": "acme", "groupName": "Copycat" }));
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["data"], serde_json::Value::Null);
    assert_eq!(body["message"], "Group already Exists");
}

#[tokio::test]
async fn group_quota_limits_owned_groups() {
    let app = common::test_app();
    common::seed_tier(&app, "pro", 1, 50, 10, 10, 5).await;
    common::seed_user(&app, "owner", "pro").await;

    let req = TestRequest::new(Method::POST, "/group")
        .as_user("owner")
        .json(json!({ "groupId": "first", "groupName": "First" }));
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);

    let req = TestRequest::new(Method::POST, "/group")
        .as_user("owner")
        .json(json!({ "groupId": "second", "groupName": "Second" }));
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "LIMIT_EXCEEDED");
}

#[tokio::test]
async fn rename_updates_group_and_metadata() {
    let app = common::test_app();
    common::seed_tier(&app, "pro", 2, 50, 10, 10, 5).await;
    common::seed_user(&app, "owner", "pro").await;
    common::seed_group(&app, "g1", "owner", "pro").await;

    let req = TestRequest::new(Method::PATCH, "/group")
        .as_user("owner")
        .in_group("g1")
        .json(json!({ "name": "Renamed" }));
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);

    let g = group::get(app.store.as_ref(), "g1").await.unwrap();
    assert_eq!(g.group_name, "Renamed");
    let meta = learnhub_api::models::metadata::get(app.store.as_ref(), "g1").await.unwrap();
    assert_eq!(meta.name, "Renamed");
}

#[tokio::test]
async fn invite_then_accept_invitation() {
    let app = common::test_app();
    common::seed_tier(&app, "pro", 2, 50, 10, 10, 5).await;
    common::seed_user(&app, "owner", "pro").await;
    common::seed_group(&app, "g1", "owner", "pro").await;

    let req = TestRequest::new(Method::POST, "/user")
        .as_user("owner")
        .in_group("g1")
        .json(json!({ "email": "kid@example.com", "role": "learner" }));
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::CREATED);

    let g = group::get(app.store.as_ref(), "g1").await.unwrap();
    assert_eq!(g.roles.learner.len(), 1);
    let uid = g.roles.learner[0].clone();
    assert!(g.group_requests.contains(&uid));

    let member = user::get(app.store.as_ref(), &uid).await.unwrap();
    assert_eq!(member.learner, vec!["g1"]);
    assert!(member.group_requests.contains(&"g1".to_string()));

    // the invitee accepts, clearing the pending flag on both sides
    let req = TestRequest::new(Method::PATCH, "/user/request")
        .as_user(&uid)
        .json(json!({ "groupId": "g1" }));
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);

    let g = group::get(app.store.as_ref(), "g1").await.unwrap();
    assert!(g.group_requests.is_empty());
    let member = user::get(app.store.as_ref(), &uid).await.unwrap();
    assert!(member.group_requests.is_empty());
}

#[tokio::test]
async fn join_request_toggles_and_can_be_accepted() {
    let app = common::test_app();
    common::seed_tier(&app, "pro", 2, 50, 10, 10, 5).await;
    common::seed_user(&app, "owner", "pro").await;
    common::seed_user(&app, "applicant", "free").await;
    common::seed_group(&app, "g1", "owner", "pro").await;

    let request = || {
        TestRequest::new(Method::POST, "/user/request")
            .as_user("applicant")
            .json(json!({ "groupId": "g1" }))
    };
    let (status, _) = send(&app, request()).await;
    assert_eq!(status, StatusCode::CREATED);
    let g = group::get(app.store.as_ref(), "g1").await.unwrap();
    assert_eq!(g.requests, vec!["applicant"]);

    // same call again withdraws the request
    let (status, _) = send(&app, request()).await;
    assert_eq!(status, StatusCode::CREATED);
    let g = group::get(app.store.as_ref(), "g1").await.unwrap();
    assert!(g.requests.is_empty());

    // re-request, then an admin admits the applicant
    let (status, _) = send(&app, request()).await;
    assert_eq!(status, StatusCode::CREATED);
    let req = TestRequest::new(Method::PATCH, "/group/request")
        .as_user("owner")
        .in_group("g1")
        .json(json!({ "uid": "applicant", "role": "learner" }));
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);

    let g = group::get(app.store.as_ref(), "g1").await.unwrap();
    assert!(g.requests.is_empty());
    assert_eq!(g.role_of("applicant"), Some(Role::Learner));
    let member = user::get(app.store.as_ref(), "applicant").await.unwrap();
    assert!(member.learner.contains(&"g1".to_string()));
}

#[tokio::test]
async fn members_can_leave_but_the_owner_cannot_be_removed() {
    let app = common::test_app();
    common::seed_tier(&app, "pro", 2, 50, 10, 10, 5).await;
    common::seed_user(&app, "owner", "pro").await;
    common::seed_user(&app, "kid", "free").await;
    common::seed_group(&app, "g1", "owner", "pro").await;
    common::enroll(&app, "g1", "kid", Role::Learner).await;

    let req = TestRequest::new(Method::DELETE, "/group/g1/user/owner")
        .as_user("kid")
        .in_group("g1");
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // leaving is allowed without the admin role
    let req = TestRequest::new(Method::DELETE, "/group/g1/user/kid")
        .as_user("kid")
        .in_group("g1");
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);

    let g = group::get(app.store.as_ref(), "g1").await.unwrap();
    assert_eq!(g.role_of("kid"), None);
    let kid = user::get(app.store.as_ref(), "kid").await.unwrap();
    assert!(kid.learner.is_empty());
    assert!(kid.group_ids.is_empty());
}

#[tokio::test]
async fn only_the_owner_can_remove_the_group() {
    let app = common::test_app();
    common::seed_tier(&app, "pro", 2, 50, 10, 10, 5).await;
    common::seed_user(&app, "owner", "pro").await;
    common::seed_user(&app, "helper", "free").await;
    common::seed_group(&app, "g1", "owner", "pro").await;
    common::enroll(&app, "g1", "helper", Role::Admin).await;

    let req = TestRequest::new(Method::DELETE, "/group/g1").as_user("helper");
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let req = TestRequest::new(Method::DELETE, "/group/g1").as_user("owner");
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert!(group::get(app.store.as_ref(), "g1").await.is_err());
}
