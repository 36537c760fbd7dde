//! Event queue error types.

use thiserror::Error;

/// Result type for event queue operations.
pub type EventResult<T> = Result<T, EventError>;

/// Errors surfaced by request routing and queue lifecycle.
#[derive(Debug, Error)]
pub enum EventError {
    /// The target event queue has stopped accepting requests.
    #[error("event queue closed")]
    QueueClosed,

    /// A store failure during topic creation or recovery.
    #[error("store error: {0}")]
    Store(#[from] logd_store::StoreError),
}
