use thiserror::Error;

use crate::types::{DeliveryId, DeliveryStatus};

/// Failure reported by a [`Storage`](crate::Storage) collaborator.
///
/// Never retried by the pipeline; surfaces as a 500 for the request in progress.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("stored row could not be decoded: {0}")]
    Decode(String),

    #[error("{entity} not found: {id}")]
    Missing { entity: &'static str, id: String },
}

/// Why an inbound request failed authentication.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("missing {header} header")]
    MissingSecret { header: &'static str },

    #[error("shared secret mismatch")]
    SecretMismatch,

    #[error("signature mismatch on {header}")]
    SignatureMismatch { header: &'static str },
}

/// Errors that terminate an inbound webhook request.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Lookup key did not match an active source.
    #[error("source not found")]
    SourceNotFound,

    #[error("unauthorized: {0}")]
    Unauthorized(#[from] AuthFailure),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors returned when handing work to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("dispatcher is shut down")]
    Shutdown,
}

/// Rejections of a manual retry request.
#[derive(Debug, Error)]
pub enum RetryError {
    #[error("delivery not found: {0}")]
    DeliveryNotFound(DeliveryId),

    #[error("delivery {0} was already sent")]
    AlreadySent(DeliveryId),

    /// An attempt sequence for the delivery is still running.
    #[error("delivery {0} is already being delivered")]
    InProgress(DeliveryId),

    #[error("delivery {id} exhausted its attempts ({attempts})")]
    MaxRetriesExceeded { id: DeliveryId, attempts: u32 },

    /// Event, source or route backing the delivery is gone.
    #[error("delivery {id} cannot be rebuilt: {reason}")]
    MissingContext { id: DeliveryId, reason: String },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Final outcome of one delivery's attempt sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    Failed(FailureReason),
    /// The delivery was not attempted because its row no longer allowed it.
    Skipped(DeliveryStatus),
}

/// Reasons why a single outbound attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    /// Destination answered with a non-2xx status.
    #[error("HTTP {status}: {status_text}")]
    Http { status: u16, status_text: String },

    #[error("{0}")]
    Timeout(String),

    #[error("{0}")]
    Network(String),
}

/// A formatter could not build a message from the document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("payload is missing {0}")]
    MissingField(&'static str),

    #[error("payload is not an object")]
    NotAnObject,
}
