//! Event Store module
//!
//! Persistence layer for Event Sourcing.
//! Repositories store raw events; [`EventStore`] bounds every call with a
//! timeout and rebuilds aggregates from snapshots plus trailing events.

mod error;
mod memory;
mod postgres;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::audit::sha256_hex;
use crate::domain::OperationContext;

pub use error::EventStoreError;
pub use memory::InMemoryEventRepository;
pub use postgres::PgEventRepository;

/// Stored event
#[derive(Debug, Clone, Serialize)]
pub struct StoredEvent {
    pub id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub version: i64,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub context: serde_json::Value,
    pub idempotency_key: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Operation to be performed on an aggregate
#[derive(Debug, Clone)]
pub struct AggregateOperation {
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub expected_version: i64,
    pub event_type: String,
    pub event_data: serde_json::Value,
}

impl AggregateOperation {
    /// Create a new aggregate operation
    pub fn new<E: Serialize>(
        aggregate_type: &str,
        aggregate_id: Uuid,
        expected_version: i64,
        event_type: &str,
        event: &E,
    ) -> Result<Self, EventStoreError> {
        let event_data = serde_json::to_value(event)?;
        Ok(Self {
            aggregate_type: aggregate_type.to_string(),
            aggregate_id,
            expected_version,
            event_type: event_type.to_string(),
            event_data,
        })
    }

    /// Fingerprint stored next to an idempotency key: same aggregate, same kind of event
    pub fn request_hash(&self) -> String {
        sha256_hex(&format!(
            "{}:{}:{}",
            self.aggregate_type, self.aggregate_id, self.event_type
        ))
    }
}

/// Result of an append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended(Uuid),
    /// The idempotency key was seen before; carries the original event id
    Duplicate(Uuid),
}

impl AppendOutcome {
    pub fn event_id(&self) -> Uuid {
        match self {
            AppendOutcome::Appended(id) | AppendOutcome::Duplicate(id) => *id,
        }
    }
}

/// Storage backend for events and snapshots.
///
/// Implementations:
/// - `PgEventRepository`: PostgreSQL storage
/// - `InMemoryEventRepository`: process memory, for tests and local runs
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Append one event if the aggregate is still at `op.expected_version`.
    async fn append(
        &self,
        op: AggregateOperation,
        idempotency_key: Option<Uuid>,
        context: &OperationContext,
    ) -> Result<AppendOutcome, EventStoreError>;

    /// Events with version greater than `after_version`, in version order.
    async fn load_events(
        &self,
        aggregate_id: Uuid,
        after_version: i64,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    async fn get_event(&self, event_id: Uuid) -> Result<Option<StoredEvent>, EventStoreError>;

    /// Event id recorded under a completed idempotency key
    async fn find_idempotent(&self, key: Uuid) -> Result<Option<Uuid>, EventStoreError>;

    async fn load_snapshot(
        &self,
        aggregate_type: &str,
        aggregate_id: Uuid,
    ) -> Result<Option<(i64, serde_json::Value)>, EventStoreError>;

    async fn save_snapshot(
        &self,
        aggregate_type: &str,
        aggregate_id: Uuid,
        version: i64,
        state: serde_json::Value,
    ) -> Result<(), EventStoreError>;
}

/// Event Store for persisting and retrieving events
#[derive(Clone)]
pub struct EventStore {
    repository: Arc<dyn EventRepository>,
    timeout: Duration,
}

impl EventStore {
    pub fn new(repository: Arc<dyn EventRepository>, timeout: Duration) -> Self {
        Self {
            repository,
            timeout,
        }
    }

    pub fn in_memory(timeout: Duration) -> Self {
        Self::new(Arc::new(InMemoryEventRepository::new()), timeout)
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, EventStoreError>
    where
        F: Future<Output = Result<T, EventStoreError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(operation, timeout_ms = self.timeout.as_millis() as u64, "Event store call timed out");
                Err(EventStoreError::Timeout {
                    operation,
                    after: self.timeout,
                })
            }
        }
    }

    /// Append a single event (one attempt)
    pub async fn append(
        &self,
        op: AggregateOperation,
        idempotency_key: Option<Uuid>,
        context: &OperationContext,
    ) -> Result<AppendOutcome, EventStoreError> {
        self.bounded("append", self.repository.append(op, idempotency_key, context))
            .await
    }

    // =========================================================================
    // load_aggregate with snapshot support
    // =========================================================================

    /// Load an aggregate by replaying events (with snapshot optimization)
    pub async fn load_aggregate<A>(&self, aggregate_id: Uuid) -> Result<Option<A>, EventStoreError>
    where
        A: Aggregate + DeserializeOwned,
        A::Event: DeserializeOwned,
    {
        // 1. Try to load from snapshot
        let snapshot = self
            .bounded(
                "load_snapshot",
                self.repository.load_snapshot(A::aggregate_type(), aggregate_id),
            )
            .await?;
        let (from_version, initial_state) = match snapshot {
            Some((version, state)) => (version, Some(serde_json::from_value::<A>(state)?)),
            None => (0, None),
        };

        // 2. Load events after snapshot version
        let events = self
            .bounded(
                "load_events",
                self.repository.load_events(aggregate_id, from_version),
            )
            .await?;

        // If no snapshot and no events, aggregate doesn't exist
        if initial_state.is_none() && events.is_empty() {
            return Ok(None);
        }

        // 3. Replay events on initial state
        let mut aggregate = initial_state.unwrap_or_default();
        for stored_event in events {
            if stored_event.version != aggregate.version() + 1 {
                return Err(EventStoreError::InvalidEventData(format!(
                    "gap in event stream of {}: expected version {}, got {}",
                    aggregate_id,
                    aggregate.version() + 1,
                    stored_event.version
                )));
            }
            let event: A::Event = serde_json::from_value(stored_event.event_data)?;
            aggregate = aggregate.apply(event);
        }

        Ok(Some(aggregate))
    }

    /// Save a snapshot if the aggregate version warrants it
    pub async fn save_snapshot_if_needed<A>(&self, aggregate: &A) -> Result<bool, EventStoreError>
    where
        A: Aggregate + Serialize,
    {
        if !aggregate.should_snapshot() {
            return Ok(false);
        }

        let state = serde_json::to_value(aggregate)?;
        self.bounded(
            "save_snapshot",
            self.repository.save_snapshot(
                A::aggregate_type(),
                aggregate.id(),
                aggregate.version(),
                state,
            ),
        )
        .await?;

        tracing::info!(
            "Snapshot saved for {} aggregate {} at version {}",
            A::aggregate_type(),
            aggregate.id(),
            aggregate.version()
        );

        Ok(true)
    }

    /// Get all events for an aggregate (for auditing)
    pub async fn get_events(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.bounded("load_events", self.repository.load_events(aggregate_id, 0))
            .await
    }

    pub async fn get_event(&self, event_id: Uuid) -> Result<Option<StoredEvent>, EventStoreError> {
        self.bounded("get_event", self.repository.get_event(event_id))
            .await
    }

    /// The event an earlier request stored under `key`, if that request completed
    pub async fn find_by_idempotency_key(
        &self,
        key: Uuid,
    ) -> Result<Option<StoredEvent>, EventStoreError> {
        let event_id = self
            .bounded("find_idempotent", self.repository.find_idempotent(key))
            .await?;
        match event_id {
            Some(id) => self.get_event(id).await,
            None => Ok(None),
        }
    }
}
