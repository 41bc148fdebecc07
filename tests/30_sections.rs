mod common;

use axum::http::{Method, StatusCode};
use common::{send, TestRequest};
use learnhub_api::models::{group, section, subject, user};
use learnhub_api::types::Role;
use serde_json::json;

async fn create_section(app: &common::TestApp, name: &str) -> StatusCode {
    let req = TestRequest::new(Method::POST, "/section")
        .as_user("owner")
        .in_group("g1")
        .json(json!({ "sectionName": name }));
    send(app, req).await.0
}

#[tokio::test]
async fn section_quota_is_enforced() {
    let app = common::test_app();
    common::seed_tier(&app, "pro", 2, 50, 2, 10, 5).await;
    common::seed_user(&app, "owner", "pro").await;
    common::seed_group(&app, "g1", "owner", "pro").await;

    assert_eq!(create_section(&app, "grade 1").await, StatusCode::CREATED);
    assert_eq!(create_section(&app, "grade 2").await, StatusCode::CREATED);

    let req = TestRequest::new(Method::POST, "/section")
        .as_user("owner")
        .in_group("g1")
        .json(json!({ "sectionName": "grade 3" }));
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "LIMIT_EXCEEDED");

    let g = group::get(app.store.as_ref(), "g1").await.unwrap();
    assert_eq!(g.section_ids.len(), 2);
    // two section creations were metered
    assert_eq!(app.billing.usage_total("si_section").await, 2);
}

#[tokio::test]
async fn child_sections_extend_the_ancestor_chain() {
    let app = common::test_app();
    common::seed_tier(&app, "pro", 2, 50, 10, 10, 5).await;
    common::seed_user(&app, "owner", "pro").await;
    common::seed_group(&app, "g1", "owner", "pro").await;

    assert_eq!(create_section(&app, "root").await, StatusCode::CREATED);
    let g = group::get(app.store.as_ref(), "g1").await.unwrap();
    let root_id = g.section_ids[0].clone();

    let req = TestRequest::new(Method::POST, "/section")
        .as_user("owner")
        .in_group("g1")
        .json(json!({ "sectionName": "child", "sectionId": root_id }));
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::CREATED);

    let g = group::get(app.store.as_ref(), "g1").await.unwrap();
    let child_id = g.section_ids.iter().find(|id| **id != root_id).unwrap().clone();

    let child = section::get(app.store.as_ref(), &child_id).await.unwrap();
    assert_eq!(child.parent_id, root_id);
    assert_eq!(child.parent_ids, vec![root_id.clone()]);

    let root = section::get(app.store.as_ref(), &root_id).await.unwrap();
    assert_eq!(root.child_ids, vec![child_id]);
}

#[tokio::test]
async fn adding_a_learner_fans_into_subjects_and_ancestors() {
    let app = common::test_app();
    common::seed_tier(&app, "pro", 2, 50, 10, 10, 5).await;
    common::seed_user(&app, "owner", "pro").await;
    common::seed_user(&app, "kid", "free").await;
    common::seed_group(&app, "g1", "owner", "pro").await;
    common::enroll(&app, "g1", "kid", Role::Learner).await;

    assert_eq!(create_section(&app, "root").await, StatusCode::CREATED);
    let g = group::get(app.store.as_ref(), "g1").await.unwrap();
    let root_id = g.section_ids[0].clone();

    let req = TestRequest::new(Method::POST, "/section")
        .as_user("owner")
        .in_group("g1")
        .json(json!({ "sectionName": "child", "sectionId": root_id }));
    send(&app, req).await;
    let g = group::get(app.store.as_ref(), "g1").await.unwrap();
    let child_id = g.section_ids.iter().find(|id| **id != root_id).unwrap().clone();

    // a subject directly under the child section
    let req = TestRequest::new(Method::POST, "/subject")
        .as_user("owner")
        .in_group("g1")
        .json(json!({ "subjectName": "math", "sectionId": child_id }));
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::CREATED);
    let g = group::get(app.store.as_ref(), "g1").await.unwrap();
    let subject_id = g.subject_ids[0].clone();

    // enrolling in the child pulls the learner up to the root and into the
    // child's subjects
    let req = TestRequest::new(Method::POST, "/section/user")
        .as_user("owner")
        .in_group("g1")
        .json(json!({ "uid": "kid", "sectionId": child_id }));
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);

    let child = section::get(app.store.as_ref(), &child_id).await.unwrap();
    assert!(child.roles.learner.contains(&"kid".to_string()));
    let root = section::get(app.store.as_ref(), &root_id).await.unwrap();
    assert!(root.roles.learner.contains(&"kid".to_string()));

    let sub = subject::get(app.store.as_ref(), &subject_id).await.unwrap();
    assert!(sub.roles.learner.contains(&"kid".to_string()));

    let kid = user::get(app.store.as_ref(), "kid").await.unwrap();
    assert!(kid.section_ids.contains(&child_id));
    assert!(kid.section_ids.contains(&root_id));
    assert!(kid.subject_ids.contains(&subject_id));
}

#[tokio::test]
async fn removing_a_user_prunes_the_subtree_memberships() {
    let app = common::test_app();
    common::seed_tier(&app, "pro", 2, 50, 10, 10, 5).await;
    common::seed_user(&app, "owner", "pro").await;
    common::seed_user(&app, "kid", "free").await;
    common::seed_group(&app, "g1", "owner", "pro").await;
    common::enroll(&app, "g1", "kid", Role::Learner).await;

    assert_eq!(create_section(&app, "root").await, StatusCode::CREATED);
    let g = group::get(app.store.as_ref(), "g1").await.unwrap();
    let root_id = g.section_ids[0].clone();

    let req = TestRequest::new(Method::POST, "/section/user")
        .as_user("owner")
        .in_group("g1")
        .json(json!({ "uid": "kid", "sectionId": root_id }));
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);

    let path = format!("/section/{root_id}/user/kid");
    let req = TestRequest::new(Method::DELETE, &path).as_user("owner").in_group("g1");
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);

    let root = section::get(app.store.as_ref(), &root_id).await.unwrap();
    assert!(!root.roles.contains("kid"));
    let kid = user::get(app.store.as_ref(), "kid").await.unwrap();
    assert!(kid.section_ids.is_empty());

    // removing someone who is not in the section is a client error
    let req = TestRequest::new(Method::DELETE, &path).as_user("owner").in_group("g1");
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "User not in section");
}
