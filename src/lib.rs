//! Webhook ingestion and delivery relay.
//!
//! Accepts webhooks from heterogeneous senders (hypervisors, CI systems,
//! storage appliances, container updaters, media managers, uptime monitors,
//! anything else), classifies and reformats each payload into a canonical
//! chat message, and delivers it to every scope-matched target with bounded
//! retries.
//!
//! ## Guarantees
//! - One event row per accepted request, processed even with zero routes
//! - One delivery row per (event, route), scope copied from the event
//! - At most 3 attempts per delivery, counter persisted before each call
//!
//! ## Non-Guarantees
//! - Exactly-once delivery
//! - Retry queues surviving a restart
//! - Inbound admission control
//! - Telling the webhook caller whether deliveries succeeded

pub mod adapter;
pub mod classify;
pub mod config;
pub mod dispatcher;
pub mod document;
pub mod error;
pub mod extract;
pub mod format;
pub mod pipeline;
pub mod resolver;
pub mod routing;
pub mod server;
pub mod signing;
pub mod storage;
pub mod telemetry;
pub mod transport;
pub mod types;
pub mod worker;

#[cfg(feature = "postgres")]
mod storage_postgres;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use document::Document;
pub use error::{
    AuthFailure, DeliveryOutcome, DispatchError, FailureReason, FormatError, PipelineError, RetryError,
    StorageError,
};
pub use format::{CanonicalMessage, Severity};
pub use pipeline::{InboundRequest, IngestReceipt, Pipeline};
pub use signing::{compute_signature, verify_signature, SignatureValidator};
pub use storage::{InMemoryStorage, Storage};
pub use transport::Transport;
pub use types::{
    Delivery, DeliveryId, DeliveryStatus, Event, EventId, Headers, Route, RouteDescriptor, RouteId,
    Scope, Source, SourceId, SourceKind, Target, TargetId, TargetKind, Visibility,
};

#[cfg(feature = "http")]
pub use transport::HttpTransport;

#[cfg(feature = "postgres")]
pub use storage_postgres::PostgresStorage;
