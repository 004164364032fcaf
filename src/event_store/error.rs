//! Event Store Errors
//!
//! Error types for event store operations.

use std::time::Duration;
use uuid::Uuid;

/// Errors that can occur in the event store
#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    /// Optimistic concurrency conflict
    #[error("Concurrency conflict for aggregate {aggregate_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        aggregate_id: Uuid,
        expected: i64,
        actual: i64,
    },

    /// Another request holding the same idempotency key is still in flight
    #[error("Idempotency key is already being processed: {0}")]
    IdempotencyKeyInFlight(Uuid),

    /// The key was already used for a different operation
    #[error("Idempotency key was used for a different request: {0}")]
    IdempotencyKeyMismatch(Uuid),

    /// The store did not answer in time
    #[error("Event store {operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid event data
    #[error("Invalid event data: {0}")]
    InvalidEventData(String),
}

impl EventStoreError {
    /// Check if this error is a concurrency conflict
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, EventStoreError::ConcurrencyConflict { .. })
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EventStoreError::ConcurrencyConflict { .. }
                | EventStoreError::IdempotencyKeyInFlight(_)
                | EventStoreError::Timeout { .. }
                | EventStoreError::Database(_)
        )
    }
}
