// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use axum::{
    Router,
    body::Body,
    http::{Request, Response, StatusCode, header},
};
use routeros_collector_rs::{
    cfg::config::CollectorConfig,
    http::{router, state::AppState},
};
use serde_json::{Value, json};
use tower::ServiceExt;

use crate::integration_tests::common::{MockOptions, MockRouter};

fn test_router() -> Router {
    router(AppState::new(CollectorConfig::default()))
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request builds")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request builds")
}

async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body reads");
    serde_json::from_slice(&bytes).expect("body is JSON")
}

#[tokio::test]
async fn health_reports_counters() -> Result<()> {
    let response = test_router().oneshot(get("/health")).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], json!("healthy"));
    assert_eq!(body["performance"]["total_requests"], json!(0));
    Ok(())
}

#[tokio::test]
async fn index_lists_endpoints() -> Result<()> {
    let response = test_router().oneshot(get("/")).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["endpoints"]["ping"], json!("/api/v2/mikrotik/ping"));
    Ok(())
}

#[tokio::test]
async fn missing_required_fields_is_400() -> Result<()> {
    let response = test_router()
        .oneshot(post_json("/api/v2/mikrotik/ping", json!({"host": "r1"})))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_body(response).await;
    assert_eq!(body["status"], json!("error"));
    assert!(body["error"].as_str().is_some_and(|e| !e.is_empty()));
    Ok(())
}

#[tokio::test]
async fn empty_targets_is_400() -> Result<()> {
    let response = test_router()
        .oneshot(post_json(
            "/api/v2/mikrotik/ping",
            json!({
                "host": "r1",
                "username": "admin",
                "password": "secret",
                "targets": [],
            }),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn ping_endpoint_returns_summaries_and_caches() -> Result<()> {
    let mock = MockRouter::spawn(MockOptions::default()).await;
    let app = test_router();

    let body = json!({
        "host": "127.0.0.1",
        "port": mock.addr.port(),
        "username": "admin",
        "password": "secret",
        "targets": ["192.0.2.1", "203.0.113.1"],
        "count": 2,
    });

    let response = app
        .clone()
        .oneshot(post_json("/api/v2/mikrotik/ping", body.clone()))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let payload = json_body(response).await;
    assert_eq!(payload["status"], json!("completed"));
    assert_eq!(payload["targets_requested"], json!(2));
    assert_eq!(payload["targets_successful"], json!(2));

    let reachable = &payload["results"]["192.0.2.1"];
    assert_eq!(reachable["status"], json!("success"));
    assert_eq!(reachable["cached"], json!(false));
    assert_eq!(reachable["data"]["packets_sent"], json!(2));
    assert_eq!(reachable["data"]["status"], json!("reachable"));

    let silent = &payload["results"]["203.0.113.1"];
    assert_eq!(silent["status"], json!("success"));
    assert_eq!(silent["data"]["status"], json!("unreachable"));
    assert_eq!(silent["data"]["packet_loss_percent"], json!(100.0));

    // The identical request is served from the fingerprint cache.
    let response = app
        .oneshot(post_json("/api/v2/mikrotik/ping", body))
        .await?;
    let payload = json_body(response).await;
    assert_eq!(payload["results"]["192.0.2.1"]["cached"], json!(true));
    assert_eq!(
        payload["results"]["192.0.2.1"]["data"]["packets_sent"],
        json!(2)
    );
    Ok(())
}

#[tokio::test]
async fn command_endpoint_runs_generic_path() -> Result<()> {
    let mock = MockRouter::spawn(MockOptions::default()).await;

    let response = test_router()
        .oneshot(post_json(
            "/api/v2/mikrotik/command",
            json!({
                "host": "127.0.0.1",
                "port": mock.addr.port(),
                "username": "admin",
                "password": "secret",
                "command": "/system/identity/print",
            }),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let payload = json_body(response).await;
    assert_eq!(payload["status"], json!("success"));
    assert_eq!(payload["data"]["output"][0]["name"], json!("mock-router"));
    Ok(())
}

#[tokio::test]
async fn batch_endpoint_isolates_per_command_failures() -> Result<()> {
    let mock = MockRouter::spawn(MockOptions::default()).await;

    let response = test_router()
        .oneshot(post_json(
            "/api/v2/mikrotik/batch",
            json!({
                "host": "127.0.0.1",
                "port": mock.addr.port(),
                "username": "admin",
                "password": "secret",
                "commands": [
                    {"command": "/system/identity/print"},
                    {"command": "/no/such/path"},
                ],
                "max_concurrent": 2,
            }),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::OK, "batch stays 200");

    let payload = json_body(response).await;
    assert_eq!(payload["commands_requested"], json!(2));
    assert_eq!(payload["commands_successful"], json!(1));
    assert_eq!(payload["results"][0]["status"], json!("success"));
    assert_eq!(payload["results"][1]["status"], json!("error"));
    assert_eq!(payload["results"][1]["error_kind"], json!("device_error"));
    Ok(())
}

#[tokio::test]
async fn test_connection_rejects_bad_credentials_with_502() -> Result<()> {
    let mock = MockRouter::spawn(MockOptions::default()).await;

    let response = test_router()
        .oneshot(post_json(
            "/api/v2/test-connection",
            json!({
                "host": "127.0.0.1",
                "port": mock.addr.port(),
                "username": "admin",
                "password": "wrong-password",
            }),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let payload = json_body(response).await;
    assert_eq!(payload["error_kind"], json!("auth_error"));
    assert_eq!(payload["retryable"], json!(false));
    Ok(())
}

#[tokio::test]
async fn test_connection_reports_identity() -> Result<()> {
    let mock = MockRouter::spawn(MockOptions::default()).await;

    let response = test_router()
        .oneshot(post_json(
            "/api/v2/test-connection",
            json!({
                "host": "127.0.0.1",
                "port": mock.addr.port(),
                "username": "admin",
                "password": "secret",
            }),
        ))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let payload = json_body(response).await;
    assert_eq!(payload["status"], json!("success"));
    assert_eq!(payload["identity"], json!("mock-router"));
    Ok(())
}

#[tokio::test]
async fn api_key_gate_guards_api_routes() -> Result<()> {
    let mut cfg = CollectorConfig::default();
    cfg.http.enable_auth = true;
    cfg.http.api_key = Some("sekrit".to_string());
    let app = router(AppState::new(cfg));

    let response = app.clone().oneshot(get("/api/v2/stats")).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let with_bearer = Request::builder()
        .uri("/api/v2/stats")
        .header(header::AUTHORIZATION, "Bearer sekrit")
        .body(Body::empty())?;
    let response = app.clone().oneshot(with_bearer).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let with_header = Request::builder()
        .uri("/api/v2/stats")
        .header("x-api-key", "sekrit")
        .body(Body::empty())?;
    let response = app.clone().oneshot(with_header).await?;
    assert_eq!(response.status(), StatusCode::OK);

    // Health stays open for probes.
    let response = app.oneshot(get("/health")).await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn cache_clear_reports_removed_entries() -> Result<()> {
    let mock = MockRouter::spawn(MockOptions::default()).await;
    let app = test_router();

    let warm = post_json(
        "/api/v2/mikrotik/command",
        json!({
            "host": "127.0.0.1",
            "port": mock.addr.port(),
            "username": "admin",
            "password": "secret",
            "command": "/system/identity/print",
        }),
    );
    app.clone().oneshot(warm).await?;

    let response = app
        .oneshot(post_json("/api/v2/cache/clear", json!({})))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let payload = json_body(response).await;
    assert_eq!(payload["status"], json!("success"));
    assert_eq!(payload["cleared_entries"], json!(1));
    Ok(())
}
