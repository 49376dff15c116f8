//! Registration, login and session lifecycle through the HTTP surface.

mod common;

use axum::http::StatusCode;
use common::{access_token, refresh_token, test_config, TestApp, TEST_PASSWORD};
use serde_json::json;

#[tokio::test]
async fn register_returns_profile_and_tokens() {
    let app = TestApp::spawn();

    let body = app.register("Jane@Example.com").await;

    assert_eq!(body["user"]["email"], "jane@example.com");
    assert_eq!(body["user"]["role"], "user");
    assert_eq!(body["user"]["email_verified"], false);
    assert_eq!(body["tokens"]["token_type"], "Bearer");
    assert_eq!(body["tokens"]["expires_in"], 3600);
    assert!(body["user"].get("password").is_none());
    assert!(body["user"].get("password_hash").is_none());
    assert_eq!(app.refresh_tokens.len(), 1);
}

#[tokio::test]
async fn duplicate_email_is_a_conflict() {
    let app = TestApp::spawn();
    app.register("dup@example.com").await;

    let response = app
        .post(
            "/auth/register",
            None,
            json!({ "email": "DUP@example.com", "password": TEST_PASSWORD }),
        )
        .await;

    assert_eq!(response.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn invalid_registration_payload_is_rejected() {
    let app = TestApp::spawn();

    let response = app
        .post(
            "/auth/register",
            None,
            json!({ "email": "not-an-email", "password": "short", "phone": "12345" }),
        )
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(app.refresh_tokens.is_empty());
    assert!(app.notifier.sent().is_empty());
}

#[tokio::test]
async fn login_checks_credentials() {
    let app = TestApp::spawn();
    app.register("login@example.com").await;

    let wrong = app.login("login@example.com", "wrong-password").await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);

    let unknown = app.login("nobody@example.com", TEST_PASSWORD).await;
    assert_eq!(unknown.status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong.body["error"], unknown.body["error"]);

    let ok = app.login("LOGIN@example.com", TEST_PASSWORD).await;
    assert_eq!(ok.status, StatusCode::OK);
    assert_eq!(ok.body["user"]["email"], "login@example.com");
}

#[tokio::test]
async fn refresh_issues_new_access_token_without_rotation() {
    let app = TestApp::spawn();
    let body = app.register("refresh@example.com").await;
    let refresh = refresh_token(&body);

    let response = app
        .post("/auth/refresh-token", None, json!({ "refresh_token": refresh }))
        .await;

    assert_eq!(response.status, StatusCode::OK);
    assert!(response.body["access_token"].is_string());
    assert!(response.body.get("refresh_token").is_none());

    // Without rotation the same token keeps working.
    let again = app
        .post("/auth/refresh-token", None, json!({ "refresh_token": refresh }))
        .await;
    assert_eq!(again.status, StatusCode::OK);
}

#[tokio::test]
async fn refresh_rotation_invalidates_presented_token() {
    let mut config = test_config();
    config.auth.rotate_refresh_tokens = true;
    let app = TestApp::spawn_with(config);

    let body = app.register("rotate@example.com").await;
    let original = refresh_token(&body);

    let rotated = app
        .post("/auth/refresh-token", None, json!({ "refresh_token": original }))
        .await;
    assert_eq!(rotated.status, StatusCode::OK);
    let replacement = rotated.body["refresh_token"]
        .as_str()
        .expect("rotated token")
        .to_string();
    assert_ne!(replacement, original);

    let reuse = app
        .post("/auth/refresh-token", None, json!({ "refresh_token": original }))
        .await;
    assert_eq!(reuse.status, StatusCode::UNAUTHORIZED);

    let next = app
        .post("/auth/refresh-token", None, json!({ "refresh_token": replacement }))
        .await;
    assert_eq!(next.status, StatusCode::OK);
}

#[tokio::test]
async fn access_token_is_not_a_refresh_token() {
    let app = TestApp::spawn();
    let body = app.register("swap@example.com").await;

    let response = app
        .post(
            "/auth/refresh-token",
            None,
            json!({ "refresh_token": access_token(&body) }),
        )
        .await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_revokes_the_session() {
    let app = TestApp::spawn();
    let body = app.register("logout@example.com").await;
    let access = access_token(&body);
    let refresh = refresh_token(&body);

    let response = app
        .post(
            "/auth/logout",
            Some(&access),
            json!({ "refresh_token": refresh }),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(app.refresh_tokens.len(), 0);

    let after = app
        .post("/auth/refresh-token", None, json!({ "refresh_token": refresh }))
        .await;
    assert_eq!(after.status, StatusCode::UNAUTHORIZED);

    let twice = app
        .post(
            "/auth/logout",
            Some(&access),
            json!({ "refresh_token": refresh }),
        )
        .await;
    assert_eq!(twice.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn logout_cannot_end_another_users_session() {
    let app = TestApp::spawn();
    let victim = app.register("victim@example.com").await;
    let intruder = app.register("intruder@example.com").await;

    let response = app
        .post(
            "/auth/logout",
            Some(&access_token(&intruder)),
            json!({ "refresh_token": refresh_token(&victim) }),
        )
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let still_valid = app
        .post(
            "/auth/refresh-token",
            None,
            json!({ "refresh_token": refresh_token(&victim) }),
        )
        .await;
    assert_eq!(still_valid.status, StatusCode::OK);
}

#[tokio::test]
async fn verify_token_returns_claims() {
    let app = TestApp::spawn();
    let body = app.register("claims@example.com").await;
    let access = access_token(&body);

    let response = app
        .post("/auth/verify-token", Some(&access), json!({ "token": access }))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["sub"], body["user"]["id"]);

    let bogus = app
        .post("/auth/verify-token", Some(&access), json!({ "token": "abc.def.ghi" }))
        .await;
    assert_eq!(bogus.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn me_returns_profile_and_updates_apply() {
    let app = TestApp::spawn();
    let body = app.register("me@example.com").await;
    let access = access_token(&body);

    let me = app.get("/auth/me", Some(&access)).await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.body["email"], "me@example.com");

    let updated = app
        .patch(
            "/users/me",
            Some(&access),
            Some(json!({ "name": "Renamed User", "phone": "09121234567" })),
        )
        .await;
    assert_eq!(updated.status, StatusCode::OK);
    assert_eq!(updated.body["name"], "Renamed User");
    assert_eq!(updated.body["phone"], "09121234567");
}

#[tokio::test]
async fn changing_email_resets_verification() {
    let app = TestApp::spawn();
    let body = app.register("old@example.com").await;
    let access = access_token(&body);

    let updated = app
        .patch(
            "/users/me",
            Some(&access),
            Some(json!({ "email": "New@Example.com" })),
        )
        .await;
    assert_eq!(updated.status, StatusCode::OK);
    assert_eq!(updated.body["email"], "new@example.com");
    assert_eq!(updated.body["email_verified"], false);

    let message = app
        .notifier
        .last_to("new@example.com")
        .expect("verification email to new address");
    assert!(message.token().is_some());

    let login = app.login("new@example.com", TEST_PASSWORD).await;
    assert_eq!(login.status, StatusCode::OK);
}

#[tokio::test]
async fn malformed_refresh_token_is_a_bad_request() {
    let app = TestApp::spawn();

    let response = app
        .post(
            "/auth/refresh-token",
            None,
            json!({ "refresh_token": "not-a-jwt" }),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let forged = app
        .post(
            "/auth/refresh-token",
            None,
            json!({ "refresh_token": "abc.def.ghi" }),
        )
        .await;
    assert_eq!(forged.status, StatusCode::UNAUTHORIZED);
}
