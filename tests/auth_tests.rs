mod common;

use axum::http::StatusCode;
use serde_json::json;

// S2 — login gating.
#[tokio::test]
async fn login_before_setup_is_pin_not_set() {
    let pool = common::test_pool().await;
    let flat_id = common::unique_flat_id();
    audix_server::identity::admin::approve_request(&pool, &flat_id)
        .await
        .unwrap();

    let app = common::create_test_app(pool.clone());
    let (status, body) = common::post_json(
        app,
        "/api/login",
        json!({ "flat_id": flat_id, "pin4": "5678" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "PIN_NOT_SET");
}

#[tokio::test]
async fn login_wrong_pin_then_correct_pin_sets_cookie() {
    let pool = common::test_pool().await;
    let flat_id = common::unique_flat_id();
    common::seed_active_flat(&pool, &flat_id, "5678").await;

    let app = common::create_test_app(pool.clone());
    let (status, body) = common::post_json(
        app,
        "/api/login",
        json!({ "flat_id": flat_id, "pin4": "9999" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "INVALID_CREDENTIALS");

    let app = common::create_test_app(pool.clone());
    let (status, headers, body) = common::post_json_full(
        app,
        "/api/login",
        json!({ "flat_id": flat_id, "pin4": "5678" }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["flat_id"], flat_id.to_uppercase());
    let cookie = common::session_cookie(&headers).expect("Set-Cookie header present");
    assert!(cookie.starts_with("audix_user_sid="));
}

#[tokio::test]
async fn login_accepts_lowercase_flat_id() {
    let pool = common::test_pool().await;
    let flat_id = common::unique_flat_id();
    common::seed_active_flat(&pool, &flat_id, "4321").await;

    let app = common::create_test_app(pool.clone());
    let (status, body) = common::post_json(
        app,
        "/api/login",
        json!({ "flat_id": flat_id.to_lowercase(), "pin4": "4321" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["flat_id"], flat_id.to_uppercase());
}

#[tokio::test]
async fn login_unknown_flat_is_not_found() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool);
    let (status, body) = common::post_json(
        app,
        "/api/login",
        json!({ "flat_id": "NOSUCHFLAT", "pin4": "0000" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "FLAT_NOT_FOUND");
}

#[tokio::test]
async fn login_banned_flat_reports_ban_until() {
    let pool = common::test_pool().await;
    let flat_id = common::unique_flat_id();
    common::seed_active_flat(&pool, &flat_id, "2222").await;

    let until = chrono::Utc::now() + chrono::Duration::hours(1);
    audix_server::identity::admin::ban_flat(&pool, &flat_id, until)
        .await
        .unwrap();

    let app = common::create_test_app(pool.clone());
    let (status, body) = common::post_json(
        app,
        "/api/login",
        json!({ "flat_id": flat_id, "pin4": "2222" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "BANNED");
    assert!(body["ban_until"].is_string(), "{body}");
}

#[tokio::test]
async fn login_with_password_set_requires_password_then_accepts_it() {
    let pool = common::test_pool().await;
    let flat_id = common::unique_flat_id();
    audix_server::identity::admin::approve_request(&pool, &flat_id)
        .await
        .unwrap();
    audix_server::identity::admin::issue_setup_code(&pool, &flat_id, "7777")
        .await
        .unwrap();
    audix_server::identity::setup_pin_with_code(&pool, &flat_id, "7777", "3344", Some("hunter2"))
        .await
        .unwrap();

    // A flat with a password_hash set must supply a password.
    let app = common::create_test_app(pool.clone());
    let (status, body) = common::post_json(
        app,
        "/api/login",
        json!({ "flat_id": flat_id, "pin4": "3344" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "PASSWORD_REQUIRED");

    // Wrong password, still rejected.
    let app = common::create_test_app(pool.clone());
    let (status, body) = common::post_json(
        app,
        "/api/login",
        json!({ "flat_id": flat_id, "pin4": "3344", "password": "wrong" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "INVALID_CREDENTIALS");

    // Correct PIN and password succeeds.
    let app = common::create_test_app(pool.clone());
    let (status, body) = common::post_json(
        app,
        "/api/login",
        json!({ "flat_id": flat_id, "pin4": "3344", "password": "hunter2" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

#[tokio::test]
async fn logout_clears_session_and_is_idempotent() {
    let pool = common::test_pool().await;
    let flat_id = common::unique_flat_id();
    common::seed_active_flat(&pool, &flat_id, "1111").await;

    let app = common::create_test_app(pool.clone());
    let (_, headers, _) = common::post_json_full(
        app,
        "/api/login",
        json!({ "flat_id": flat_id, "pin4": "1111" }),
        None,
    )
    .await;
    let cookie = common::session_cookie(&headers).unwrap();

    let app = common::create_test_app(pool.clone());
    let (status, body) = common::post_json_with_cookie(app, "/api/logout", json!({}), &cookie).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);

    // Calling logout again with the now-dead cookie is a no-op, not an error.
    let app = common::create_test_app(pool.clone());
    let (status, body) = common::post_json_with_cookie(app, "/api/logout", json!({}), &cookie).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);

    // And the session no longer authorizes protected routes: redirected to /login.
    let app = common::create_test_app(pool.clone());
    let (status, _) = common::get_with_cookie(app, "/api/live", &cookie).await;
    assert!(status.is_redirection(), "expected a redirect, got {status}");
}
