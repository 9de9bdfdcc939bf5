use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use engine::{Engine, MemoryProvider, Method, Table};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use server::{AdminAccess, ServerState, router};
use tower::ServiceExt;

fn app(protect_users: bool) -> (Router, Arc<MemoryProvider>) {
    let provider = Arc::new(MemoryProvider::new());
    let engine = Engine::builder()
        .transport(provider.clone())
        .build()
        .unwrap();
    let state = ServerState {
        engine: Arc::new(engine),
        admin: Arc::new(AdminAccess {
            username: "admin".to_string(),
            password: "hunter2".to_string(),
            protect_users,
        }),
    };
    (router(state), provider)
}

fn basic(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>, auth: bool) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if auth {
        request = request.header(header::AUTHORIZATION, basic("admin", "hunter2"));
    }
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn channel_routes_require_credentials() {
    let (app, _provider) = app(false);

    let (status, body) = send(&app, "GET", "/channels", None, false).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "client_error");

    let request = Request::builder()
        .uri("/channels")
        .header(header::AUTHORIZATION, basic("admin", "wrong"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let (status, body) = send(&app, "GET", "/channels", None, true).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn user_routes_follow_protect_users() {
    let (open, _provider) = app(false);
    let (status, _) = send(&open, "GET", "/users", None, false).await;
    assert_eq!(status, StatusCode::OK);

    let (protected, _provider) = app(true);
    let (status, _) = send(&protected, "GET", "/users", None, false).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&protected, "GET", "/users", None, true).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn create_user_then_channel_membership_round() {
    let (app, _provider) = app(false);

    let (status, channel) = send(
        &app,
        "POST",
        "/channels",
        Some(json!({"name": "news"})),
        true,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let channel_uid = channel["data"]["uid"].as_str().unwrap().to_string();

    let (status, user) = send(
        &app,
        "POST",
        "/users",
        Some(json!({
            "username": "alice",
            "password": "secret",
            "allowed_channels": [channel_uid, "missing"],
        })),
        false,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(user["status"], "success");
    assert_eq!(user["data"]["role"], "regular");
    assert_eq!(user["data"]["allowed_channels"], json!([channel_uid]));
    let user_uid = user["data"]["uid"].as_str().unwrap().to_string();

    let (status, channel) = send(&app, "GET", &format!("/channels/{channel_uid}"), None, true).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(channel["data"]["allowed_users"], json!([user_uid]));

    let (status, _) = send(&app, "DELETE", &format!("/users/{user_uid}"), None, false).await;
    assert_eq!(status, StatusCode::OK);
    let (status, channel) = send(&app, "GET", &format!("/channels/{channel_uid}"), None, true).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(channel["data"]["allowed_users"], json!([]));
}

#[tokio::test]
async fn errors_use_the_envelope() {
    let (app, _provider) = app(false);

    let (status, body) = send(&app, "GET", "/users/nobody", None, false).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "not_found");

    let (status, body) = send(
        &app,
        "POST",
        "/users",
        Some(json!({"username": "", "password": "x"})),
        false,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "client_error");

    send(&app, "POST", "/channels", Some(json!({"name": "news"})), true).await;
    let (status, _) = send(&app, "POST", "/channels", Some(json!({"name": "news"})), true).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn degraded_delete_returns_multi_status() {
    let (app, provider) = app(false);
    let (_, channel) = send(&app, "POST", "/channels", Some(json!({"name": "news"})), true).await;
    let channel_uid = channel["data"]["uid"].as_str().unwrap().to_string();
    let (_, user) = send(
        &app,
        "POST",
        "/users",
        Some(json!({"username": "alice", "password": "pw", "allowed_channels": [channel_uid]})),
        false,
    )
    .await;
    let user_uid = user["data"]["uid"].as_str().unwrap().to_string();
    provider.fail_on(Method::PATCH, "/rest/v1/users");

    let (status, body) = send(&app, "DELETE", &format!("/channels/{channel_uid}"), None, true).await;

    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["unsynced"], json!([user_uid]));
    assert!(provider.row(Table::Channels, &channel_uid).is_none());
}

#[tokio::test]
async fn failed_row_delete_reports_partial_failure() {
    let (app, provider) = app(false);
    let (_, user) = send(
        &app,
        "POST",
        "/users",
        Some(json!({"username": "alice", "password": "pw"})),
        false,
    )
    .await;
    let user_uid = user["data"]["uid"].as_str().unwrap().to_string();
    provider.fail_on(Method::DELETE, "/rest/v1/users");

    let (status, body) = send(&app, "DELETE", &format!("/users/{user_uid}"), None, false).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["status"], "partial_failure");
    assert_eq!(body["failed_step"], "delete_row");
    assert_eq!(body["completed_steps"], json!(["fetch_current", "delete_identity"]));
}

#[tokio::test]
async fn malformed_payloads_get_an_envelope() {
    let (app, provider) = app(false);

    let (status, body) = send(&app, "POST", "/users", Some(json!({"username": "alice"})), false).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "client_error");
    assert!(body["detail"].as_str().unwrap().contains("password"));
    assert!(provider.rows(Table::Users).is_empty());

    let (status, body) = send(&app, "POST", "/channels", Some(json!({"name": 7})), true).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "client_error");
}
