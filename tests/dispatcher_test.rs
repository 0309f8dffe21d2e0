mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use webhook_relay::types::{NewDelivery, NewEvent};
use webhook_relay::{
    DeliveryId, DeliveryStatus, DispatchError, Dispatcher, DispatcherConfig, Document, FailureReason,
    InMemoryStorage, RetryError, Route, RouteId, Scope, Source, SourceId, SourceKind, Storage, Target,
    TargetId, TargetKind, Transport,
};

use common::{bad_gateway, harness, RecordingTransport};

/// A pending delivery that was never handed to the pool.
async fn pending_delivery(storage: &InMemoryStorage) -> DeliveryId {
    storage.insert_source(Source::new("src", SourceKind::Arr, "arr", "u1")).await;
    storage.insert_target(Target::new("t", TargetKind::Slack, "http://slack.example")).await;
    storage.insert_route(Route::new("r", "src", "t")).await;

    let event_id = storage
        .create_event(NewEvent {
            source_id: SourceId::new("src"),
            event_type: "Download".to_string(),
            document: Document::new(json!({"eventType": "Download", "series": {"title": "Show"}})),
            scope: Scope::personal(),
            received_at: Utc::now(),
        })
        .await
        .unwrap();
    storage
        .create_delivery(NewDelivery {
            event_id,
            route_id: RouteId::new("r"),
            target_id: TargetId::new("t"),
            scope: Scope::personal(),
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_retry_of_pending_delivery_sends_it() {
    let storage = Arc::new(InMemoryStorage::new());
    let delivery_id = pending_delivery(&storage).await;
    let h = harness(storage.clone(), RecordingTransport::ok());

    h.dispatcher.retry(&delivery_id).await.unwrap();
    h.dispatcher.shutdown().await;

    let delivery = storage.load_delivery(&delivery_id).await.unwrap().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Sent);
    assert_eq!(delivery.attempts, 1);
    assert!(delivery.sent_at.is_some());
    assert_eq!(h.transport.calls()[0].0, "http://slack.example");
}

#[tokio::test]
async fn test_retry_of_sent_delivery_is_rejected() {
    let storage = Arc::new(InMemoryStorage::new());
    let delivery_id = pending_delivery(&storage).await;
    let h = harness(storage.clone(), RecordingTransport::ok());

    h.dispatcher.retry(&delivery_id).await.unwrap();
    h.dispatcher.shutdown().await;

    // A fresh pool over the same rows.
    let again = harness(storage.clone(), RecordingTransport::ok());
    let err = again.dispatcher.retry(&delivery_id).await.unwrap_err();
    assert!(matches!(err, RetryError::AlreadySent(ref id) if *id == delivery_id));

    let delivery = storage.load_delivery(&delivery_id).await.unwrap().unwrap();
    assert_eq!(delivery.attempts, 1);
    again.dispatcher.shutdown().await;
    assert!(again.transport.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_exhausted_attempts_is_rejected() {
    let storage = Arc::new(InMemoryStorage::new());
    let delivery_id = pending_delivery(&storage).await;
    let h = harness(storage.clone(), RecordingTransport::failing(bad_gateway()));

    h.dispatcher.retry(&delivery_id).await.unwrap();
    h.dispatcher.shutdown().await;

    let delivery = storage.load_delivery(&delivery_id).await.unwrap().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Failed);
    assert_eq!(delivery.attempts, 3);

    let again = harness(storage.clone(), RecordingTransport::ok());
    let err = again.dispatcher.retry(&delivery_id).await.unwrap_err();
    assert!(matches!(err, RetryError::MaxRetriesExceeded { attempts: 3, .. }));
    again.dispatcher.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_recovers_within_attempt_budget() {
    let storage = Arc::new(InMemoryStorage::new());
    let delivery_id = pending_delivery(&storage).await;
    let transport = RecordingTransport::scripted(vec![Err(bad_gateway())], Ok(()));
    let h = harness(storage.clone(), transport);

    h.dispatcher.retry(&delivery_id).await.unwrap();
    h.dispatcher.shutdown().await;

    let delivery = storage.load_delivery(&delivery_id).await.unwrap().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Sent);
    assert_eq!(delivery.attempts, 2);
    assert_eq!(delivery.last_error, None);
    assert_eq!(h.transport.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retry_during_backoff_keeps_the_attempt_ceiling() {
    let storage = Arc::new(InMemoryStorage::new());
    let delivery_id = pending_delivery(&storage).await;
    let h = harness(storage.clone(), RecordingTransport::failing(bad_gateway()));

    h.dispatcher.retry(&delivery_id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let waiting = storage.load_delivery(&delivery_id).await.unwrap().unwrap();
    assert_eq!(waiting.status, DeliveryStatus::Retry);
    assert_eq!(waiting.attempts, 1);

    let err = h.dispatcher.retry(&delivery_id).await.unwrap_err();
    assert!(matches!(err, RetryError::InProgress(ref id) if *id == delivery_id));

    h.dispatcher.shutdown().await;

    let delivery = storage.load_delivery(&delivery_id).await.unwrap().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Failed);
    assert_eq!(delivery.attempts, 3);
    assert_eq!(h.transport.calls().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_queued_retries_run_one_sequence() {
    let storage = Arc::new(InMemoryStorage::new());
    let delivery_id = pending_delivery(&storage).await;
    let h = harness(storage.clone(), RecordingTransport::failing(bad_gateway()));

    // Both pass validation before either worker has started.
    h.dispatcher.retry(&delivery_id).await.unwrap();
    h.dispatcher.retry(&delivery_id).await.unwrap();
    h.dispatcher.shutdown().await;

    let delivery = storage.load_delivery(&delivery_id).await.unwrap().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Failed);
    assert_eq!(delivery.attempts, 3);
    assert_eq!(h.transport.calls().len(), 3);
}

#[tokio::test]
async fn test_retry_of_unknown_delivery() {
    let storage = Arc::new(InMemoryStorage::new());
    let h = harness(storage, RecordingTransport::ok());

    let err = h.dispatcher.retry(&DeliveryId::new("nope")).await.unwrap_err();
    assert!(matches!(err, RetryError::DeliveryNotFound(_)));
}

#[tokio::test]
async fn test_retry_without_route_is_missing_context() {
    let storage = Arc::new(InMemoryStorage::new());
    storage.insert_source(Source::new("src", SourceKind::Generic, "gen", "u1")).await;
    let event_id = storage
        .create_event(NewEvent {
            source_id: SourceId::new("src"),
            event_type: "generic_event".to_string(),
            document: Document::new(json!({})),
            scope: Scope::personal(),
            received_at: Utc::now(),
        })
        .await
        .unwrap();
    let delivery_id = storage
        .create_delivery(NewDelivery {
            event_id,
            route_id: RouteId::new("gone"),
            target_id: TargetId::new("gone"),
            scope: Scope::personal(),
        })
        .await
        .unwrap();
    let h = harness(storage, RecordingTransport::ok());

    let err = h.dispatcher.retry(&delivery_id).await.unwrap_err();
    assert!(matches!(err, RetryError::MissingContext { .. }));
}

#[tokio::test]
async fn test_shutdown_rejects_new_work() {
    let storage = Arc::new(InMemoryStorage::new());
    let delivery_id = pending_delivery(&storage).await;
    let h = harness(storage.clone(), RecordingTransport::ok());
    assert!(h.dispatcher.is_running());

    h.dispatcher.shutdown().await;
    assert!(!h.dispatcher.is_running());

    let err = h.dispatcher.retry(&delivery_id).await.unwrap_err();
    assert!(matches!(err, RetryError::Dispatch(DispatchError::Shutdown)));

    let delivery = storage.load_delivery(&delivery_id).await.unwrap().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Pending);
    assert_eq!(delivery.attempts, 0);
}

#[tokio::test]
async fn test_shutdown_survives_a_panicked_worker() {
    struct Exploding;

    #[async_trait::async_trait]
    impl Transport for Exploding {
        async fn post_json(&self, _url: &str, _body: &serde_json::Value) -> Result<(), FailureReason> {
            panic!("destination handler blew up");
        }
    }

    let storage = Arc::new(InMemoryStorage::new());
    let delivery_id = pending_delivery(&storage).await;
    let config = DispatcherConfig {
        worker_count: 1,
        queue_capacity: 4,
        request_timeout: Duration::from_secs(10),
    };
    let dispatcher = Dispatcher::new(config, storage.clone(), Arc::new(Exploding));

    dispatcher.retry(&delivery_id).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), dispatcher.shutdown())
        .await
        .expect("shutdown must finish after a worker panic");
    assert!(!dispatcher.is_running());

    // The attempt was recorded before the call that panicked.
    let delivery = storage.load_delivery(&delivery_id).await.unwrap().unwrap();
    assert_eq!(delivery.attempts, 1);
    assert_eq!(delivery.status, DeliveryStatus::Pending);
}
