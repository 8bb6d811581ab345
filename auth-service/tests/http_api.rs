//! HTTP surface: routing, status mapping, client address resolution and headers.

mod common;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use common::{TestApp, TestPolicy, PASSWORD};
use serde_json::{json, Value};
use tower::util::ServiceExt;

async fn post_json(
    router: Router,
    uri: &str,
    body: Value,
    forwarded_for: Option<&str>,
) -> (StatusCode, Value) {
    let mut request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(ip) = forwarded_for {
        request = request.header("x-forwarded-for", ip);
    }

    let response = router
        .oneshot(request.body(Body::from(body.to_string())).expect("request"))
        .await
        .expect("response");

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, json)
}

async fn issued_ip(app: &TestApp, body: &Value) -> String {
    let refresh_token = body["tokens"]["refresh_token"].as_str().expect("refresh token");
    app.state
        .tokens
        .lookup_refresh_token(refresh_token)
        .await
        .expect("lookup")
        .expect("record")
        .created_by_ip
}

#[tokio::test]
async fn health_check_reports_dependencies() {
    let app = TestApp::spawn();

    let response = app
        .router()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).and_then(|v| v.to_str().ok()),
        Some("no-store")
    );

    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    let body: Value = serde_json::from_slice(&bytes).expect("json");
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "auth-service-test");
    assert_eq!(body["token_store"], "up");
    assert_eq!(body["cache"], "up");
}

#[tokio::test]
async fn login_uses_forwarded_address_when_body_has_none() {
    let app = TestApp::spawn();
    app.add_user("alice", |_| {});

    let (status, body) = post_json(
        app.router(),
        "/auth/login",
        json!({ "username": "alice", "password": PASSWORD }),
        Some("203.0.113.10, 10.0.0.1"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["tokens"]["token_type"], "Bearer");
    assert_eq!(issued_ip(&app, &body).await, "203.0.113.10");
}

#[tokio::test]
async fn explicit_ip_in_body_wins_over_header() {
    let app = TestApp::spawn();
    app.add_user("alice", |_| {});

    let (status, body) = post_json(
        app.router(),
        "/auth/login",
        json!({ "username": "alice", "password": PASSWORD, "ip_address": "192.0.2.44" }),
        Some("203.0.113.10"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(issued_ip(&app, &body).await, "192.0.2.44");
}

#[tokio::test]
async fn failed_login_maps_to_unauthorized_with_code() {
    let app = TestApp::spawn();
    app.add_user("alice", |_| {});

    let (status, body) = post_json(
        app.router(),
        "/auth/login",
        json!({ "username": "alice", "password": "wrong-password" }),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["error_code"], "INVALID_CREDENTIALS");
    assert!(body.get("tokens").is_none());
}

#[tokio::test]
async fn missing_fields_are_rejected_before_the_orchestrator() {
    let app = TestApp::spawn();

    let (status, _) = post_json(
        app.router(),
        "/auth/login",
        json!({ "username": "alice", "password": "" }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = post_json(
        app.router(),
        "/auth/login",
        json!({ "username": "alice" }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(app.audit_events().is_empty());
}

#[tokio::test]
async fn refresh_endpoint_rotates_once() {
    let app = TestApp::spawn();
    app.add_user("alice", |_| {});
    let (_, login) = post_json(
        app.router(),
        "/auth/login",
        json!({ "username": "alice", "password": PASSWORD }),
        None,
    )
    .await;
    let refresh_token = login["tokens"]["refresh_token"].clone();

    let (status, body) = post_json(
        app.router(),
        "/auth/refresh",
        json!({ "refresh_token": refresh_token }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, body) = post_json(
        app.router(),
        "/auth/refresh",
        json!({ "refresh_token": refresh_token }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error_code"], "TOKEN_INVALID_OR_EXPIRED");
}

#[tokio::test]
async fn revoke_then_introspect() {
    let app = TestApp::spawn();
    app.add_user("alice", |_| {});
    let (_, login) = post_json(
        app.router(),
        "/auth/login",
        json!({ "username": "alice", "password": PASSWORD }),
        None,
    )
    .await;

    let (status, body) = post_json(
        app.router(),
        "/auth/introspect",
        json!({ "token": login["tokens"]["access_token"] }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], true);
    assert_eq!(body["username"], "alice");
    assert_eq!(body["iss"], "auth-service-test");

    let (_, body) = post_json(
        app.router(),
        "/auth/introspect",
        json!({ "token": "not.a.jwt" }),
        None,
    )
    .await;
    assert_eq!(body["active"], false);
    assert!(body.get("sub").is_none());

    let revoke = json!({ "refresh_token": login["tokens"]["refresh_token"] });
    let (status, body) = post_json(app.router(), "/auth/revoke", revoke.clone(), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revoked"], true);

    let (_, body) = post_json(app.router(), "/auth/revoke", revoke, None).await;
    assert_eq!(body["revoked"], false);
}

#[tokio::test]
async fn register_returns_created_and_conflicts_are_reported() {
    let app = TestApp::spawn();

    let request = json!({ "username": "bob", "password": PASSWORD, "email": "bob@example.com" });
    let (status, body) = post_json(app.router(), "/auth/register", request.clone(), None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert!(body["user_id"].is_string());

    let (status, body) = post_json(app.router(), "/auth/register", request, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn two_factor_round_trip_over_http() {
    let app = TestApp::with_policy(TestPolicy {
        two_factor: true,
        ..Default::default()
    });
    app.add_user("alice", |u| {
        u.two_factor_enabled = true;
        u.phone_number = Some("5551234567".to_string());
    });

    let (status, body) = post_json(
        app.router(),
        "/auth/login",
        json!({ "username": "alice", "password": PASSWORD }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["step_up_required"], true);
    assert_eq!(body["masked_phone"], "******4567");

    let code = app.sms_code("5551234567").await;
    let (status, body) = post_json(
        app.router(),
        "/auth/login/two-factor",
        json!({ "username": "alice", "code": code }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["tokens"]["access_token"].is_string());
}

#[tokio::test]
async fn step_up_send_honours_phone_registration_switch() {
    let disabled = TestApp::spawn();
    let (status, _) = post_json(
        disabled.router(),
        "/auth/step-up/send",
        json!({ "phone_number": "5559876543" }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let enabled = TestApp::with_policy(TestPolicy {
        phone_registration: true,
        ..Default::default()
    });
    let (status, body) = post_json(
        enabled.router(),
        "/auth/step-up/send",
        json!({ "phone_number": "5559876543" }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["masked_phone"], "******6543");
    assert_eq!(body["expires_in"], 300);
}

#[tokio::test]
async fn code_routes_are_rate_limited_per_address() {
    let app = TestApp::with_policy(TestPolicy {
        phone_registration: true,
        code_attempts: 2,
        ..Default::default()
    });
    let send = json!({ "phone_number": "5559876543" });

    for _ in 0..2 {
        let (status, _) =
            post_json(app.router(), "/auth/step-up/send", send.clone(), Some("203.0.113.20")).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    // The quota is shared by every code route for the same caller.
    let (status, _) = post_json(
        app.router(),
        "/auth/login/two-factor",
        json!({ "username": "alice", "code": "123456" }),
        Some("203.0.113.20"),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    let (status, _) =
        post_json(app.router(), "/auth/step-up/send", send, Some("203.0.113.21")).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    // Password login is not behind the code quota.
    let (status, _) = post_json(
        app.router(),
        "/auth/login",
        json!({ "username": "nobody", "password": "whatever" }),
        Some("203.0.113.20"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn directory_route_without_configuration_is_forbidden() {
    let app = TestApp::spawn();

    let (status, body) = post_json(
        app.router(),
        "/auth/login/ldap",
        json!({ "username": "carol", "password": "whatever" }),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error_code"], "DIRECTORY_NOT_CONFIGURED");
}
