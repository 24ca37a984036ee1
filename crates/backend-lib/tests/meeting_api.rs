// ============================
// relay-backend/tests/meeting_api.rs
// ============================
//! HTTP surface of the relay, exercised without binding a socket.
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use relay_backend::{config::Settings, storage::FlatFileStore, ws_router, AppState};
use relay_common::MeetingInfo;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

fn app() -> (Router, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let store = FlatFileStore::new(temp_dir.path()).unwrap();
    let state = Arc::new(AppState::new(Arc::new(store), Settings::default()));
    (ws_router::create_router(state), temp_dir)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn start_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/meeting/start")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_reports_healthy() {
    let (app, _temp_dir) = app();
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"Healthy");
}

#[tokio::test]
async fn started_meeting_can_be_looked_up() {
    let (app, _temp_dir) = app();

    let response = app
        .clone()
        .oneshot(start_request(json!({"hostId": "alice", "hostName": "Alice"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: MeetingInfo = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(created.host_id, "alice");
    assert_eq!(created.host_name, "Alice");

    let uri = format!("/api/meeting/join?meetingId={}", created.meeting_id);
    let response = app
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let found: MeetingInfo = serde_json::from_value(body_json(response).await).unwrap();
    assert_eq!(found, created);
}

#[tokio::test]
async fn unknown_meeting_is_not_found() {
    let (app, _temp_dir) = app();
    let response = app
        .oneshot(
            Request::get("/api/meeting/join?meetingId=does-not-exist")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "MEET_001");
}

#[tokio::test]
async fn start_rejects_invalid_host() {
    let (app, _temp_dir) = app();
    let response = app
        .oneshot(start_request(json!({"hostId": "", "hostName": "Alice"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "VAL_001");
}

#[tokio::test]
async fn lookup_rejects_malformed_meeting_id() {
    let (app, _temp_dir) = app();
    let response = app
        .oneshot(
            Request::get("/api/meeting/join?meetingId=..%2Fetc")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
