use std::collections::HashSet;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;

use crate::adapter::adapt;
use crate::document::Document;
use crate::error::{DeliveryOutcome, FailureReason, StorageError};
use crate::format::{format_message, FormatContext};
use crate::storage::Storage;
use crate::transport::Transport;
use crate::types::{DeliveryId, DeliveryStatus, EventId, RouteDescriptor, SourceKind, TargetKind};

/// Attempt ceiling per delivery.
pub const MAX_ATTEMPTS: u32 = 3;

/// Wait after attempt N (1-based) is `RETRY_DELAYS[N - 1]`. No wait follows the last attempt.
pub const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(15),
];

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

#[cfg(feature = "metrics")]
fn metric_inc_target(name: &'static str, kind: TargetKind) {
    metrics::increment_counter!(name, "target_kind" => kind.as_str());
}

#[cfg(not(feature = "metrics"))]
fn metric_inc_target(_name: &'static str, _kind: TargetKind) {}

/// Everything needed to run one delivery's attempt sequence.
#[derive(Debug, Clone)]
pub struct DeliveryJob {
    pub delivery_id: DeliveryId,
    pub event_id: EventId,
    pub event_type: String,
    pub document: Document,
    pub source_kind: SourceKind,
    pub target_kind: TargetKind,
    pub target_url: String,
    pub template: Option<String>,
}

impl DeliveryJob {
    pub fn new(
        delivery_id: DeliveryId,
        event_id: EventId,
        event_type: impl Into<String>,
        document: Document,
        source_kind: SourceKind,
        route: &RouteDescriptor,
    ) -> Self {
        Self {
            delivery_id,
            event_id,
            event_type: event_type.into(),
            document,
            source_kind,
            target_kind: route.target_kind,
            target_url: route.target_url.clone(),
            template: route.message_template.clone(),
        }
    }
}

/// Deliveries whose attempt sequence is running in this process.
#[derive(Debug, Default)]
pub struct InFlight(std::sync::Mutex<HashSet<DeliveryId>>);

impl InFlight {
    pub fn contains(&self, id: &DeliveryId) -> bool {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).contains(id)
    }

    /// `None` when another sequence already owns `id`.
    pub fn claim(self: &Arc<Self>, id: &DeliveryId) -> Option<InFlightClaim> {
        let inserted = self
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone());
        inserted.then(|| InFlightClaim {
            set: Arc::clone(self),
            id: id.clone(),
        })
    }
}

/// Releases its delivery on drop.
#[derive(Debug)]
pub struct InFlightClaim {
    set: Arc<InFlight>,
    id: DeliveryId,
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        self.set
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Shared, read-only context for all workers.
pub struct WorkerContext {
    pub storage: Arc<dyn Storage>,
    pub transport: Arc<dyn Transport>,
    /// Upper bound on one outbound call, whatever the transport does.
    pub request_timeout: Duration,
    pub in_flight: Arc<InFlight>,
}

/// Main worker loop.
///
/// Pulls jobs from the shared queue until every sender is gone. Each job
/// runs its full attempt sequence before the next one is taken.
pub async fn worker_loop(rx: Arc<Mutex<mpsc::Receiver<DeliveryJob>>>, ctx: Arc<WorkerContext>) {
    loop {
        let job = {
            let mut guard = rx.lock().await;
            guard.recv().await
        };

        let Some(job) = job else { break };

        if let Err(err) = run_delivery(&job, &ctx).await {
            metric_inc("webhook.delivery.storage_error");
            tracing::error!(delivery_id = %job.delivery_id, error = %err, "delivery aborted by storage failure");
        }
    }
}

/// Run the attempt sequence for one delivery.
///
/// The row is re-read first: a delivery that is already sent, has used all
/// its attempts, or is being attempted by another sequence is skipped
/// untouched. The attempt counter is persisted before each outbound call and
/// the sequence stops as soon as storage refuses to raise it.
pub async fn run_delivery(job: &DeliveryJob, ctx: &WorkerContext) -> Result<DeliveryOutcome, StorageError> {
    let row = ctx
        .storage
        .load_delivery(&job.delivery_id)
        .await?
        .ok_or_else(|| StorageError::Missing {
            entity: "delivery",
            id: job.delivery_id.to_string(),
        })?;
    if row.status == DeliveryStatus::Sent || row.attempts >= MAX_ATTEMPTS {
        tracing::info!(
            delivery_id = %job.delivery_id,
            status = %row.status,
            attempts = row.attempts,
            "delivery not eligible, skipping"
        );
        return Ok(DeliveryOutcome::Skipped(row.status));
    }
    let Some(_claim) = ctx.in_flight.claim(&job.delivery_id) else {
        tracing::info!(delivery_id = %job.delivery_id, "delivery already in progress, skipping");
        return Ok(DeliveryOutcome::Skipped(row.status));
    };

    let message = format_message(
        &FormatContext {
            kind: job.source_kind,
            event_type: &job.event_type,
            template: job.template.as_deref(),
            now: Utc::now(),
        },
        &job.document,
    );
    let body = adapt(job.target_kind, &message);

    loop {
        let Some(attempts) = ctx
            .storage
            .increment_delivery_attempt(&job.delivery_id, MAX_ATTEMPTS)
            .await?
        else {
            let status = ctx
                .storage
                .load_delivery(&job.delivery_id)
                .await?
                .map_or(row.status, |current| current.status);
            tracing::info!(delivery_id = %job.delivery_id, %status, "attempt ceiling reached elsewhere, stopping");
            return Ok(DeliveryOutcome::Skipped(status));
        };
        let result = match tokio::time::timeout(
            ctx.request_timeout,
            ctx.transport.post_json(&job.target_url, &body),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(FailureReason::Timeout(format!(
                "request timed out after {}s",
                ctx.request_timeout.as_secs()
            ))),
        };

        match result {
            Ok(()) => {
                ctx.storage
                    .update_delivery_status(&job.delivery_id, DeliveryStatus::Sent, None)
                    .await?;
                metric_inc("webhook.delivery.success");
                metric_inc_target("webhook.delivery.success.target", job.target_kind);
                tracing::info!(
                    delivery_id = %job.delivery_id,
                    event_id = %job.event_id,
                    target_kind = job.target_kind.as_str(),
                    attempts,
                    "delivery sent"
                );
                return Ok(DeliveryOutcome::Sent);
            }
            Err(reason) if attempts >= MAX_ATTEMPTS => {
                ctx.storage
                    .update_delivery_status(&job.delivery_id, DeliveryStatus::Failed, Some(reason.to_string()))
                    .await?;
                metric_inc("webhook.delivery.failed");
                metric_inc_target("webhook.delivery.failed.target", job.target_kind);
                tracing::warn!(
                    delivery_id = %job.delivery_id,
                    event_id = %job.event_id,
                    attempts,
                    error = %reason,
                    "delivery failed permanently"
                );
                return Ok(DeliveryOutcome::Failed(reason));
            }
            Err(reason) => {
                ctx.storage
                    .update_delivery_status(&job.delivery_id, DeliveryStatus::Retry, Some(reason.to_string()))
                    .await?;
                metric_inc("webhook.delivery.retry");
                let delay = RETRY_DELAYS[(attempts as usize - 1).min(RETRY_DELAYS.len() - 1)];
                tracing::debug!(
                    delivery_id = %job.delivery_id,
                    attempts,
                    error = %reason,
                    delay_secs = delay.as_secs(),
                    "attempt failed, retrying"
                );
                sleep(delay).await;
            }
        }
    }
}
