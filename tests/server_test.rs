mod common;

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use webhook_relay::{server, DeliveryStatus, InMemoryStorage, Route, Source, SourceKind, Storage, Target, TargetKind};

use common::{harness, Harness, RecordingTransport};

async fn setup() -> (Harness, Router) {
    let storage = Arc::new(InMemoryStorage::new());
    storage
        .insert_source(Source::new("src-gl", SourceKind::Gitlab, "gl-key", "u1").with_secret("tok"))
        .await;
    storage.insert_target(Target::new("t", TargetKind::Slack, "http://slack.example")).await;
    storage.insert_route(Route::new("r", "src-gl", "t")).await;

    let h = harness(storage, RecordingTransport::ok());
    let app = server::router(h.pipeline.clone());
    (h, app)
}

fn webhook(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("x-gitlab-token", token);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn read_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_accepted_webhook_returns_receipt() {
    let (h, app) = setup().await;

    let response = app
        .oneshot(webhook(
            "/webhook/gl-key",
            Some("tok"),
            json!({"object_kind": "push", "ref": "refs/heads/main", "project": {"name": "Demo"}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await;
    assert_eq!(body["sourceId"], "src-gl");
    assert_eq!(body["sourceType"], "gitlab");
    assert_eq!(body["eventType"], "push");
    assert!(body["eventId"].as_str().is_some_and(|id| !id.is_empty()));

    h.dispatcher.shutdown().await;
    assert_eq!(h.transport.calls().len(), 1);
}

#[tokio::test]
async fn test_unknown_lookup_key_is_not_found() {
    let (_h, app) = setup().await;

    let response = app
        .oneshot(webhook("/webhook/missing", Some("tok"), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(read_json(response).await, json!({"error": "source not found"}));
}

#[tokio::test]
async fn test_wrong_token_is_unauthorized() {
    let (h, app) = setup().await;

    let response = app
        .clone()
        .oneshot(webhook("/webhook/gl-key", Some("nope"), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(webhook("/webhook/gl-key", None, json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(h.storage.events().await.is_empty());
}

#[tokio::test]
async fn test_form_encoded_body_is_accepted() {
    let (h, app) = setup().await;

    let request = Request::builder()
        .method("POST")
        .uri("/webhook/gl-key?extra=1")
        .header("content-type", "application/x-www-form-urlencoded")
        .header("x-gitlab-token", "tok")
        .body(Body::from("object_kind=note&note=hello"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["eventType"], "note");
    h.dispatcher.shutdown().await;
}

#[tokio::test]
async fn test_manual_retry_of_sent_delivery_conflicts() {
    let (h, app) = setup().await;

    let response = app
        .clone()
        .oneshot(webhook("/webhook/gl-key", Some("tok"), json!({"object_kind": "push"})))
        .await
        .unwrap();
    let event_id = read_json(response).await["eventId"].as_str().unwrap().to_string();
    h.dispatcher.shutdown().await;

    let deliveries = h.storage.deliveries_for_event(&webhook_relay::EventId::new(event_id)).await;
    let delivery = &deliveries[0];
    assert_eq!(delivery.status, DeliveryStatus::Sent);

    // Fresh pool so the retry is judged on the row, not on shutdown.
    let fresh = harness(h.storage.clone(), RecordingTransport::ok());
    let app = server::router(fresh.pipeline.clone());
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/deliveries/{}/retry", delivery.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let stored = h.storage.load_delivery(&delivery.id).await.unwrap().unwrap();
    assert_eq!(stored.attempts, 1);
}

#[tokio::test]
async fn test_manual_retry_of_unknown_delivery_is_not_found() {
    let (_h, app) = setup().await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/deliveries/does-not-exist/retry")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health() {
    let (_h, app) = setup().await;

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await, json!({"status": "ok"}));
}
