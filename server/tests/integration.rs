//! Integration tests for the HTTP surface of the gateway

mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use tower::ServiceExt;

use common::*;

async fn get(uri: &str) -> axum::response::Response {
    echo_app()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_health_check() {
    for uri in ["/health", "/api/health"] {
        let response = get(uri).await;
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, "ok");
    }
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let response = get("/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let metrics: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(metrics["timestamp"].is_string());
    assert!(metrics["system"].is_object());
    assert_eq!(metrics["gateway"]["sessions_active"], 0);
    assert_eq!(metrics["gateway"]["auth_refusals"], 0);
}

#[tokio::test]
async fn test_request_id_header() {
    let response = get("/api/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);

    let request_id = response
        .headers()
        .get("x-request-id")
        .expect("request id header")
        .to_str()
        .unwrap();
    assert!(uuid::Uuid::parse_str(request_id).is_ok());
}

#[tokio::test]
async fn test_websocket_requires_upgrade() {
    let response = get("/ws").await;
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_unknown_route() {
    let response = get("/voices").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
