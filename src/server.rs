//! Inbound HTTP surface.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::error::{PipelineError, RetryError};
use crate::pipeline::{InboundRequest, Pipeline};
use crate::types::{DeliveryId, Headers};

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
}

pub fn router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/webhook/{lookup_key}", post(receive_webhook))
        .route("/deliveries/{delivery_id}/retry", post(retry_delivery))
        .route("/health", get(health))
        .with_state(AppState { pipeline })
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        match &self {
            PipelineError::SourceNotFound => error_body(StatusCode::NOT_FOUND, "source not found"),
            PipelineError::Unauthorized(_) => error_body(StatusCode::UNAUTHORIZED, "unauthorized"),
            PipelineError::Storage(err) => {
                tracing::error!(error = %err, "storage failure while ingesting webhook");
                error_body(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}

impl IntoResponse for RetryError {
    fn into_response(self) -> Response {
        let status = match &self {
            RetryError::DeliveryNotFound(_) => StatusCode::NOT_FOUND,
            RetryError::AlreadySent(_)
            | RetryError::InProgress(_)
            | RetryError::MaxRetriesExceeded { .. }
            | RetryError::MissingContext { .. } => StatusCode::CONFLICT,
            RetryError::Dispatch(_) => StatusCode::SERVICE_UNAVAILABLE,
            RetryError::Storage(err) => {
                tracing::error!(error = %err, "storage failure during manual retry");
                return error_body(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
            }
        };
        error_body(status, self.to_string())
    }
}

fn collect_headers(headers: &HeaderMap) -> Headers {
    let mut collected = Headers::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            collected.insert(name.as_str(), value);
        }
    }
    collected
}

async fn receive_webhook(
    Path(lookup_key): Path<String>,
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, PipelineError> {
    let request = InboundRequest {
        lookup_key,
        content_type: headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        headers: collect_headers(&headers),
        query,
        body: body.to_vec(),
    };
    let receipt = state.pipeline.ingest(request).await?;
    Ok((StatusCode::OK, Json(receipt)).into_response())
}

async fn retry_delivery(
    Path(delivery_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Response, RetryError> {
    let delivery_id = DeliveryId::new(delivery_id);
    state.pipeline.dispatcher().retry(&delivery_id).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "deliveryId": delivery_id, "status": "queued" }))).into_response())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
