mod common;

use access_service::models::{GlobalRole, SiteRole};
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
};
use common::{TestApp, TEST_PASSWORD};
use serde_json::{json, Value};
use tower::util::ServiceExt;
use uuid::Uuid;

async fn send(
    app: &TestApp,
    method: Method,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(bearer) = bearer {
        builder = builder.header(header::AUTHORIZATION, bearer);
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn health_reports_ok() {
    let app = TestApp::new();
    let (status, body) = send(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn admin_routes_require_a_valid_bearer() {
    let app = TestApp::new();

    let (status, _) = send(&app, Method::GET, "/admin/users", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        Method::GET,
        "/admin/users",
        Some("Bearer not-a-jwt"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        Method::GET,
        "/admin/invitations",
        Some("Basic abc"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn token_of_a_deleted_account_is_rejected() {
    let app = TestApp::new();
    let global = app.global_admin("ga@x.com").await;
    let doomed = app
        .create_user("d@x.com", GlobalRole::User, &[(1, SiteRole::SiteAdmin)])
        .await;
    let doomed_bearer = app.bearer(&doomed);

    let (status, _) = send(
        &app,
        Method::DELETE,
        &format!("/admin/users/{}", doomed.id),
        Some(&app.bearer(&global)),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, Method::GET, "/admin/users", Some(&doomed_bearer), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_issues_a_bearer_token() {
    let app = TestApp::new();
    app.global_admin("ga@x.com").await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/auth/login",
        None,
        Some(json!({ "email": "ga@x.com", "password": TEST_PASSWORD })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_type"], "Bearer");
    let token = body["access_token"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        Method::GET,
        "/admin/users",
        Some(&format!("Bearer {}", token)),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["users"].as_array().unwrap().len(), 1);

    let (status, _) = send(
        &app,
        Method::POST,
        "/auth/login",
        None,
        Some(json!({ "email": "ga@x.com", "password": "wrong-password" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn invitation_flow_over_http() {
    let app = TestApp::new();
    let global = app.global_admin("ga@x.com").await;
    let bearer = app.bearer(&global);

    let (status, created) = send(
        &app,
        Method::POST,
        "/admin/invitations",
        Some(&bearer),
        Some(json!({
            "email": "new@x.com",
            "username": "newbie",
            "sites": [{ "site_id": 1 }]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["invitation"]["state"], "pending");
    assert!(created["invitation"].get("token_digest").is_none());
    let token = created["token"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        Method::POST,
        "/admin/invitations",
        Some(&bearer),
        Some(json!({ "email": "new@x.com", "username": "again", "sites": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, preview) = send(&app, Method::GET, &format!("/invite/{}", token), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(preview["email"], "new@x.com");
    assert_eq!(preview["sites"][0]["site_role"], "SITE_USER");

    let (status, accepted) = send(
        &app,
        Method::POST,
        &format!("/invite/{}/accept", token),
        None,
        Some(json!({ "password": "brand-new-pass" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(accepted["user"]["global_role"], "USER");
    assert!(accepted["user"].get("password_digest").is_none());
    assert_eq!(accepted["memberships"][0]["site_id"], 1);

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/invite/{}/accept", token),
        None,
        Some(json!({ "password": "brand-new-pass" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, Method::GET, &format!("/invite/{}", token), None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_bodies_are_rejected() {
    let app = TestApp::new();
    let global = app.global_admin("ga@x.com").await;
    let bearer = app.bearer(&global);

    let (status, _) = send(
        &app,
        Method::POST,
        "/admin/invitations",
        Some(&bearer),
        Some(json!({ "email": "not-an-email", "username": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = send(
        &app,
        Method::POST,
        "/admin/invitations",
        Some(&bearer),
        Some(json!({ "username": "missing-email" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        Method::PUT,
        &format!("/admin/users/{}/sites", global.id),
        Some(&bearer),
        Some(json!({ "sites": [{ "site_id": 1, "site_role": "OWNER" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn membership_policy_violations_are_forbidden() {
    let app = TestApp::new();
    let admin = app
        .create_user("sa@x.com", GlobalRole::User, &[(1, SiteRole::SiteAdmin)])
        .await;
    let member = app
        .create_user("m@x.com", GlobalRole::User, &[(1, SiteRole::SiteUser)])
        .await;
    let bearer = app.bearer(&admin);

    let (status, body) = send(
        &app,
        Method::PUT,
        &format!("/admin/users/{}/sites", member.id),
        Some(&bearer),
        Some(json!({ "sites": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Cannot remove site access granted within your sites");

    let (status, _) = send(
        &app,
        Method::PUT,
        &format!("/admin/users/{}/sites", admin.id),
        Some(&bearer),
        Some(json!({ "sites": [{ "site_id": 1, "site_role": "SITE_ADMIN" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &app,
        Method::PUT,
        &format!("/admin/users/{}/sites", member.id),
        Some(&bearer),
        Some(json!({ "sites": [{ "site_id": 1, "site_role": "SITE_ADMIN" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], 1);
    assert_eq!(body["memberships"][0]["site_role"], "SITE_ADMIN");

    let (status, _) = send(
        &app,
        Method::PUT,
        &format!("/admin/users/{}/sites", Uuid::new_v4()),
        Some(&bearer),
        Some(json!({ "sites": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn password_reset_over_http() {
    let app = TestApp::new();
    let global = app.global_admin("ga@x.com").await;
    let target = app.create_user("u@x.com", GlobalRole::User, &[]).await;
    app.mailer.set_failing(true);

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/admin/users/{}/password-reset", target.id),
        Some(&app.bearer(&global)),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["mail"]["status"], "failed");
    assert!(body.get("token").is_none());
    let url = body["reset_url"].as_str().unwrap();
    let token = common::token_from_url(url);

    let (status, _) = send(
        &app,
        Method::POST,
        "/password-reset/confirm",
        None,
        Some(json!({ "token": token, "new_password": "fresh-password-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        Method::POST,
        "/password-reset/confirm",
        None,
        Some(json!({ "token": token, "new_password": "fresh-password-2" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        Method::POST,
        "/auth/login",
        None,
        Some(json!({ "email": "u@x.com", "password": "fresh-password-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn global_role_route_is_global_admin_only() {
    let app = TestApp::new();
    let global = app.global_admin("ga@x.com").await;
    let site_admin = app
        .create_user("sa@x.com", GlobalRole::User, &[(1, SiteRole::SiteAdmin)])
        .await;
    let target = app
        .create_user("t@x.com", GlobalRole::User, &[(1, SiteRole::SiteUser)])
        .await;
    let uri = format!("/admin/users/{}/role", target.id);
    let promote = json!({ "global_role": "GLOBAL_ADMIN" });

    let (status, _) = send(
        &app,
        Method::PUT,
        &uri,
        Some(&app.bearer(&site_admin)),
        Some(promote.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &app,
        Method::PUT,
        &uri,
        Some(&app.bearer(&global)),
        Some(promote),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["global_role"], "GLOBAL_ADMIN");
}
