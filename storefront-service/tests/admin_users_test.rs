//! Admin user management and the cache invalidation it schedules.

mod common;

use axum::http::StatusCode;
use common::{access_token, TestApp, TEST_PASSWORD};
use serde_json::json;
use storefront_service::services::{worker::JobOutcome, Job, QueueClient};

/// Runs the worker until the queue is empty.
async fn drain(app: &TestApp) {
    while app.queue.pending_len().await.unwrap() > 0 {
        app.run_worker_once().await;
    }
}

#[tokio::test]
async fn admin_creates_and_lists_users() {
    let app = TestApp::spawn();
    let admin = app.admin_token().await;

    let created = app
        .post(
            "/users",
            Some(&admin),
            json!({
                "name": "Staff Member",
                "email": "staff@example.com",
                "password": TEST_PASSWORD,
                "role": "admin",
            }),
        )
        .await;
    assert_eq!(created.status, StatusCode::CREATED);
    assert_eq!(created.body["role"], "admin");
    assert!(created.body.get("password_hash").is_none());

    let duplicate = app
        .post(
            "/users",
            Some(&admin),
            json!({ "email": "staff@example.com", "password": TEST_PASSWORD }),
        )
        .await;
    assert_eq!(duplicate.status, StatusCode::CONFLICT);

    app.register("customer@example.com").await;

    let all = app.get("/users?page=1&limit=10", Some(&admin)).await;
    assert_eq!(all.status, StatusCode::OK);
    assert_eq!(all.body["total"], 3);
    assert_eq!(all.body["page"], 1);
    assert_eq!(all.body["limit"], 10);
    assert_eq!(all.body["items"].as_array().unwrap().len(), 3);

    let customers = app.get("/users?role=user", Some(&admin)).await;
    assert_eq!(customers.body["total"], 1);
    assert_eq!(customers.body["items"][0]["email"], "customer@example.com");

    let paged = app.get("/users?page=2&limit=2", Some(&admin)).await;
    assert_eq!(paged.body["total"], 3);
    assert_eq!(paged.body["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn listing_far_past_the_end_is_empty() {
    let app = TestApp::spawn();
    let admin = app.admin_token().await;

    let response = app
        .get(
            &format!("/users?page={}&limit=100", u64::MAX),
            Some(&admin),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["total"], 1);
    assert!(response.body["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn admin_reads_updates_and_deletes_users() {
    let app = TestApp::spawn();
    let admin = app.admin_token().await;
    let body = app.register("target@example.com").await;
    let id = body["user"]["id"].as_str().unwrap().to_string();
    let uri = format!("/users/{}", id);

    let fetched = app.get(&uri, Some(&admin)).await;
    assert_eq!(fetched.status, StatusCode::OK);
    assert_eq!(fetched.body["email"], "target@example.com");

    let updated = app
        .patch(
            &uri,
            Some(&admin),
            Some(json!({ "name": "Target Renamed", "email_verified": true })),
        )
        .await;
    assert_eq!(updated.status, StatusCode::OK);
    assert_eq!(updated.body["name"], "Target Renamed");
    assert_eq!(updated.body["email_verified"], true);

    let deleted = app.delete(&uri, Some(&admin)).await;
    assert_eq!(deleted.status, StatusCode::OK);
    assert_eq!(app.get(&uri, Some(&admin)).await.status, StatusCode::NOT_FOUND);
    assert_eq!(app.delete(&uri, Some(&admin)).await.status, StatusCode::NOT_FOUND);

    let login = app.login("target@example.com", TEST_PASSWORD).await;
    assert_eq!(login.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_user_is_not_found() {
    let app = TestApp::spawn();
    let admin = app.admin_token().await;

    let response = app
        .patch(
            "/users/does-not-exist",
            Some(&admin),
            Some(json!({ "name": "Nobody Here" })),
        )
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let toggled = app
        .patch("/users/does-not-exist/toggle-active", Some(&admin), None)
        .await;
    assert_eq!(toggled.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn profile_reads_are_cached_and_invalidated_by_the_worker() {
    let app = TestApp::spawn();
    let admin = app.admin_token().await;
    let body = app.register("cached@example.com").await;
    let id = body["user"]["id"].as_str().unwrap().to_string();
    let key = format!("user:{}", id);
    drain(&app).await;

    let me = app.get("/auth/me", Some(&access_token(&body))).await;
    assert_eq!(me.status, StatusCode::OK);
    assert!(app.cache.contains(&key));

    let updated = app
        .patch(
            &format!("/users/{}", id),
            Some(&admin),
            Some(json!({ "name": "Fresh Name" })),
        )
        .await;
    assert_eq!(updated.status, StatusCode::OK);
    assert_eq!(
        app.queue.pending_jobs(),
        vec![Job::ClearCache {
            cache_key: key.clone()
        }]
    );

    // Stale until the job runs.
    assert!(app.cache.contains(&key));

    let outcome = app.run_worker_once().await;
    assert_eq!(outcome, Some(JobOutcome::Completed { removed: 1 }));
    assert!(!app.cache.contains(&key));
    assert_eq!(app.queue.processing_len(), 0);

    let fresh = app.get("/auth/me", Some(&access_token(&body))).await;
    assert_eq!(fresh.body["name"], "Fresh Name");

    // Redelivery of the same invalidation is harmless.
    app.queue
        .enqueue(Job::ClearCache {
            cache_key: key.clone(),
        })
        .await
        .unwrap();
    assert!(app.cache.contains(&key));
    assert_eq!(
        app.run_worker_once().await,
        Some(JobOutcome::Completed { removed: 1 })
    );
    app.queue
        .enqueue(Job::ClearCache { cache_key: key })
        .await
        .unwrap();
    assert_eq!(
        app.run_worker_once().await,
        Some(JobOutcome::Completed { removed: 0 })
    );
}

#[tokio::test]
async fn invalid_invalidation_jobs_are_dead_lettered() {
    let app = TestApp::spawn();

    app.queue
        .enqueue(Job::ClearCache {
            cache_key: "*".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(app.run_worker_once().await, Some(JobOutcome::DeadLettered));
    assert_eq!(app.queue.failed_len(), 1);
    assert_eq!(app.queue.pending_len().await.unwrap(), 0);
}

#[tokio::test]
async fn self_update_cannot_escalate_role() {
    let app = TestApp::spawn();
    let body = app.register("sneaky@example.com").await;
    let access = access_token(&body);

    let response = app
        .patch(
            "/users/me",
            Some(&access),
            Some(json!({ "role": "admin", "is_active": true })),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["role"], "user");

    assert_eq!(
        app.get("/users", Some(&access)).await.status,
        StatusCode::FORBIDDEN
    );
}
