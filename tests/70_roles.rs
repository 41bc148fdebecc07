mod common;

use axum::http::{Method, StatusCode};
use common::{send, TestApp, TestRequest};
use learnhub_api::models::{analytics, entity, group, section, subject};
use learnhub_api::types::Role;
use serde_json::json;

/// Group with one section, one subject under it, one entity, and a learner
/// enrolled through the section.
async fn setup(app: &TestApp) -> (String, String, String) {
    common::seed_tier(app, "pro", 2, 50, 10, 10, 5).await;
    common::seed_user(app, "owner", "pro").await;
    common::seed_user(app, "kid", "free").await;
    common::seed_group(app, "g1", "owner", "pro").await;
    common::enroll(app, "g1", "kid", Role::Learner).await;

    let req = TestRequest::new(Method::POST, "/section")
        .as_user("owner")
        .in_group("g1")
        .json(json!({ "sectionName": "grade 5" }));
    let (status, _) = send(app, req).await;
    assert_eq!(status, StatusCode::CREATED);
    let g = group::get(app.store.as_ref(), "g1").await.unwrap();
    let section_id = g.section_ids[0].clone();

    let req = TestRequest::new(Method::POST, "/subject")
        .as_user("owner")
        .in_group("g1")
        .json(json!({ "subjectName": "math", "sectionId": section_id }));
    let (status, _) = send(app, req).await;
    assert_eq!(status, StatusCode::CREATED);
    let g = group::get(app.store.as_ref(), "g1").await.unwrap();
    let subject_id = g.subject_ids[0].clone();

    let req = TestRequest::new(Method::POST, "/section/user")
        .as_user("owner")
        .in_group("g1")
        .json(json!({ "uid": "kid", "sectionId": section_id }));
    let (status, _) = send(app, req).await;
    assert_eq!(status, StatusCode::OK);

    let req = TestRequest::new(Method::POST, "/entity")
        .as_user("owner")
        .in_group("g1")
        .json(json!({
            "subjectId": subject_id,
            "title": "fractions",
            "author": "owner",
            "contentType": "video",
            "contentSize": 50,
        }));
    let (status, body) = send(app, req).await;
    assert_eq!(status, StatusCode::OK);
    let entity_id = body["data"].as_str().unwrap().to_string();
    (section_id, subject_id, entity_id)
}

#[tokio::test]
async fn role_change_rewrites_every_membership() {
    let app = common::test_app();
    let (section_id, subject_id, entity_id) = setup(&app).await;

    // an engagement record exists before the role changes
    let path = format!("/entity/{entity_id}/engagement");
    let req = TestRequest::new(Method::POST, &path)
        .as_user("kid")
        .in_group("g1")
        .json(json!({ "viewed": true }));
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);

    let req = TestRequest::new(Method::PATCH, "/user/role")
        .as_user("owner")
        .in_group("g1")
        .json(json!({ "uid": "kid", "role": "provider" }));
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);

    let g = group::get(app.store.as_ref(), "g1").await.unwrap();
    assert_eq!(g.role_of("kid"), Some(Role::Provider));

    let sec = section::get(app.store.as_ref(), &section_id).await.unwrap();
    assert!(sec.roles.provider.contains(&"kid".to_string()));
    assert!(!sec.roles.learner.contains(&"kid".to_string()));

    let sub = subject::get(app.store.as_ref(), &subject_id).await.unwrap();
    assert!(sub.roles.provider.contains(&"kid".to_string()));
    assert!(!sub.roles.learner.contains(&"kid".to_string()));

    let record = analytics::get_user(app.store.as_ref(), &entity_id, "kid")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.role, Role::Provider);
}

#[tokio::test]
async fn admins_cannot_change_their_own_role() {
    let app = common::test_app();
    common::seed_tier(&app, "pro", 2, 50, 10, 10, 5).await;
    common::seed_user(&app, "owner", "pro").await;
    common::seed_group(&app, "g1", "owner", "pro").await;

    let req = TestRequest::new(Method::PATCH, "/user/role")
        .as_user("owner")
        .in_group("g1")
        .json(json!({ "uid": "owner", "role": "learner" }));
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Cannot change your own role");
}

#[tokio::test]
async fn subject_rename_refreshes_denormalized_entity_names() {
    let app = common::test_app();
    let (_, subject_id, entity_id) = setup(&app).await;

    let req = TestRequest::new(Method::PATCH, "/subject/name")
        .as_user("owner")
        .in_group("g1")
        .json(json!({ "subjectId": subject_id, "name": "mathematics" }));
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["subjectName"], "mathematics");

    let e = entity::get(app.store.as_ref(), &entity_id).await.unwrap();
    assert_eq!(e.subject_name, "mathematics");
}
