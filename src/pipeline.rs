//! Ingestion controller.
//!
//! Runs an inbound request through authentication, extraction and
//! classification, persists the event and its delivery rows, then hands the
//! deliveries to the dispatcher. The caller learns that the event was
//! accepted, never whether its deliveries succeeded.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::classify::classify;
use crate::dispatcher::Dispatcher;
use crate::error::PipelineError;
use crate::extract::extract;
use crate::resolver::SourceResolver;
use crate::routing::RouteResolver;
use crate::signing::SignatureValidator;
use crate::storage::Storage;
use crate::types::{EventId, Headers, NewDelivery, NewEvent, SourceId, SourceKind};
use crate::worker::DeliveryJob;

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

/// Raw inbound webhook request.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    pub lookup_key: String,
    pub headers: Headers,
    pub content_type: Option<String>,
    pub query: Option<String>,
    pub body: Vec<u8>,
}

/// Acknowledgement returned to the webhook caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReceipt {
    pub event_id: EventId,
    pub source_id: SourceId,
    pub source_type: SourceKind,
    pub event_type: String,
}

pub struct Pipeline {
    storage: Arc<dyn Storage>,
    sources: SourceResolver,
    validator: SignatureValidator,
    routes: RouteResolver,
    dispatcher: Arc<Dispatcher>,
}

impl Pipeline {
    pub fn new(storage: Arc<dyn Storage>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            sources: SourceResolver::new(storage.clone()),
            validator: SignatureValidator::new(),
            routes: RouteResolver::new(storage.clone()),
            storage,
            dispatcher,
        }
    }

    pub fn with_validator(mut self, validator: SignatureValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_source_cache(mut self) -> Self {
        self.sources = SourceResolver::new(self.storage.clone()).with_cache();
        self
    }

    pub fn sources(&self) -> &SourceResolver {
        &self.sources
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub async fn ingest(&self, request: InboundRequest) -> Result<IngestReceipt, PipelineError> {
        let received_at = Utc::now();
        let source = self.sources.resolve(&request.lookup_key).await?;
        self.validator
            .validate(&source, &request.headers, &request.body)
            .inspect_err(|_| metric_inc("webhook.ingest.unauthorized"))?;

        let document = extract(
            request.content_type.as_deref(),
            &request.body,
            request.query.as_deref(),
            received_at,
        );
        let event_type = classify(source.kind, &document);

        let scope = source.scope.clone();
        let event_id = self
            .storage
            .create_event(NewEvent {
                source_id: source.id.clone(),
                event_type: event_type.clone(),
                document: document.clone(),
                scope: scope.clone(),
                received_at,
            })
            .await?;
        tracing::info!(
            event_id = %event_id,
            source_id = %source.id,
            kind = %source.kind,
            event_type = %event_type,
            "event accepted"
        );

        let routes = self.routes.resolve(&source).await?;
        let mut jobs = Vec::with_capacity(routes.len());
        for route in &routes {
            let delivery_id = self
                .storage
                .create_delivery(NewDelivery {
                    event_id: event_id.clone(),
                    route_id: route.route_id.clone(),
                    target_id: route.target_id.clone(),
                    scope: scope.clone(),
                })
                .await?;
            jobs.push(DeliveryJob::new(
                delivery_id,
                event_id.clone(),
                event_type.clone(),
                document.clone(),
                source.kind,
                route,
            ));
        }
        self.storage.mark_event_processed(&event_id).await?;
        tracing::info!(event_id = %event_id, deliveries = jobs.len(), "event processed");

        for job in jobs {
            let delivery_id = job.delivery_id.clone();
            if let Err(err) = self.dispatcher.dispatch(job).await {
                // The row stays pending and can be retried manually.
                tracing::warn!(%delivery_id, error = %err, "delivery not handed off");
            }
        }
        metric_inc("webhook.ingest.accepted");

        Ok(IngestReceipt {
            event_id,
            source_id: source.id,
            source_type: source.kind,
            event_type,
        })
    }
}
