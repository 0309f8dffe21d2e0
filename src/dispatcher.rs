use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::error::{DispatchError, RetryError};
use crate::storage::Storage;
use crate::transport::{Transport, DEFAULT_TIMEOUT};
use crate::types::{DeliveryId, DeliveryStatus};
use crate::worker::{worker_loop, DeliveryJob, InFlight, WorkerContext, MAX_ATTEMPTS};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub request_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        let worker_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            worker_count,
            queue_capacity: 1_024,
            request_timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Bounded worker pool running delivery attempt sequences off the request path.
///
/// Jobs go through one bounded channel shared by all workers. When the
/// channel is full the hand-off is deferred to a detached task so callers
/// never wait on outbound traffic.
pub struct Dispatcher {
    sender: Mutex<Option<mpsc::Sender<DeliveryJob>>>,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
    storage: Arc<dyn Storage>,
    in_flight: Arc<InFlight>,
    is_running: AtomicBool,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, storage: Arc<dyn Storage>, transport: Arc<dyn Transport>) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let shared_rx = Arc::new(Mutex::new(rx));

        let in_flight = Arc::new(InFlight::default());
        let ctx = Arc::new(WorkerContext {
            storage: storage.clone(),
            transport,
            request_timeout: config.request_timeout,
            in_flight: in_flight.clone(),
        });

        let worker_handles = (0..config.worker_count.max(1))
            .map(|_| tokio::spawn(worker_loop(shared_rx.clone(), ctx.clone())))
            .collect();

        tracing::info!(
            workers = config.worker_count.max(1),
            queue_capacity = config.queue_capacity.max(1),
            "dispatcher started"
        );

        Self {
            sender: Mutex::new(Some(tx)),
            worker_handles: Mutex::new(worker_handles),
            storage,
            in_flight,
            is_running: AtomicBool::new(true),
        }
    }

    /// Hand one delivery to the pool. Returns as soon as the job is queued
    /// or its deferred hand-off has been spawned.
    pub async fn dispatch(&self, job: DeliveryJob) -> Result<(), DispatchError> {
        if !self.is_running() {
            return Err(DispatchError::Shutdown);
        }
        let Some(tx) = self.sender.lock().await.clone() else {
            return Err(DispatchError::Shutdown);
        };

        match tx.try_send(job) {
            Ok(()) => {
                metric_inc("webhook.dispatch.enqueued");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                metric_inc("webhook.dispatch.deferred");
                tracing::warn!(delivery_id = %job.delivery_id, "delivery queue full, deferring hand-off");
                tokio::spawn(async move {
                    let delivery_id = job.delivery_id.clone();
                    if tx.send(job).await.is_err() {
                        tracing::warn!(%delivery_id, "dispatcher stopped before deferred delivery was queued");
                    }
                });
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                metric_inc("webhook.dispatch.shutdown");
                Err(DispatchError::Shutdown)
            }
        }
    }

    /// Manually re-run the attempt sequence of one existing delivery.
    ///
    /// Rejected when the delivery is sent, has no attempts left, or is still
    /// inside its attempt sequence here. The worker checks all three again
    /// before attempting.
    pub async fn retry(&self, delivery_id: &DeliveryId) -> Result<(), RetryError> {
        let delivery = self
            .storage
            .load_delivery(delivery_id)
            .await?
            .ok_or_else(|| RetryError::DeliveryNotFound(delivery_id.clone()))?;

        if delivery.status == DeliveryStatus::Sent {
            return Err(RetryError::AlreadySent(delivery.id));
        }
        if delivery.attempts >= MAX_ATTEMPTS {
            return Err(RetryError::MaxRetriesExceeded {
                id: delivery.id,
                attempts: delivery.attempts,
            });
        }

        if self.in_flight.contains(&delivery.id) {
            return Err(RetryError::InProgress(delivery.id));
        }

        let missing = |reason: &str| RetryError::MissingContext {
            id: delivery.id.clone(),
            reason: reason.to_string(),
        };
        let event = self
            .storage
            .load_event(&delivery.event_id)
            .await?
            .ok_or_else(|| missing("event not found"))?;
        let source = self
            .storage
            .find_source(&event.source_id)
            .await?
            .ok_or_else(|| missing("source not found"))?;
        let route = self
            .storage
            .load_route(&delivery.route_id)
            .await?
            .ok_or_else(|| missing("route not found"))?;

        let job = DeliveryJob::new(
            delivery.id.clone(),
            event.id,
            event.event_type,
            event.document,
            source.kind,
            &route,
        );
        self.dispatch(job).await?;
        metric_inc("webhook.dispatch.manual_retry");
        tracing::info!(delivery_id = %delivery.id, attempts = delivery.attempts, "manual retry queued");
        Ok(())
    }

    /// Stop accepting jobs and wait for queued ones to finish.
    pub async fn shutdown(&self) {
        self.is_running.store(false, Ordering::SeqCst);
        self.sender.lock().await.take();

        let handles: Vec<_> = self.worker_handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "worker panicked");
            }
        }
        tracing::info!("dispatcher drained");
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }
}
