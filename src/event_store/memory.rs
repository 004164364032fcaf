//! In-memory event repository
//!
//! Same append semantics as the PostgreSQL repository; used by tests and by
//! `STORE_BACKEND=memory`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::OperationContext;

use super::{AggregateOperation, AppendOutcome, EventRepository, EventStoreError, StoredEvent};

#[derive(Default)]
struct State {
    streams: HashMap<Uuid, Vec<StoredEvent>>,
    by_id: HashMap<Uuid, (Uuid, usize)>,
    idempotency: HashMap<Uuid, (String, Uuid)>,
    snapshots: HashMap<(String, Uuid), (i64, serde_json::Value)>,
}

/// Event repository held in process memory
#[derive(Default)]
pub struct InMemoryEventRepository {
    state: RwLock<State>,
}

impl InMemoryEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events stored across all aggregates
    pub async fn event_count(&self) -> usize {
        self.state.read().await.by_id.len()
    }
}

#[async_trait]
impl EventRepository for InMemoryEventRepository {
    async fn append(
        &self,
        op: AggregateOperation,
        idempotency_key: Option<Uuid>,
        context: &OperationContext,
    ) -> Result<AppendOutcome, EventStoreError> {
        let context_json = serde_json::to_value(context)?;
        let request_hash = op.request_hash();

        // one write lock covers check, version compare and insert
        let mut state = self.state.write().await;

        if let Some(key) = idempotency_key {
            if let Some((stored_hash, event_id)) = state.idempotency.get(&key) {
                if *stored_hash != request_hash {
                    return Err(EventStoreError::IdempotencyKeyMismatch(key));
                }
                return Ok(AppendOutcome::Duplicate(*event_id));
            }
        }

        let current_version = state
            .streams
            .get(&op.aggregate_id)
            .and_then(|events| events.last())
            .map(|e| e.version)
            .unwrap_or(0);
        if current_version != op.expected_version {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id: op.aggregate_id,
                expected: op.expected_version,
                actual: current_version,
            });
        }

        let event_id = Uuid::new_v4();
        let stream = state.streams.entry(op.aggregate_id).or_default();
        stream.push(StoredEvent {
            id: event_id,
            aggregate_type: op.aggregate_type,
            aggregate_id: op.aggregate_id,
            version: op.expected_version + 1,
            event_type: op.event_type,
            event_data: op.event_data,
            context: context_json,
            idempotency_key,
            created_at: Utc::now(),
        });
        let position = stream.len() - 1;
        state.by_id.insert(event_id, (op.aggregate_id, position));

        if let Some(key) = idempotency_key {
            state.idempotency.insert(key, (request_hash, event_id));
        }

        Ok(AppendOutcome::Appended(event_id))
    }

    async fn load_events(
        &self,
        aggregate_id: Uuid,
        after_version: i64,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let state = self.state.read().await;
        Ok(state
            .streams
            .get(&aggregate_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.version > after_version)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_event(&self, event_id: Uuid) -> Result<Option<StoredEvent>, EventStoreError> {
        let state = self.state.read().await;
        Ok(state
            .by_id
            .get(&event_id)
            .and_then(|(aggregate_id, idx)| state.streams.get(aggregate_id)?.get(*idx))
            .cloned())
    }

    async fn find_idempotent(&self, key: Uuid) -> Result<Option<Uuid>, EventStoreError> {
        let state = self.state.read().await;
        Ok(state.idempotency.get(&key).map(|(_, event_id)| *event_id))
    }

    async fn load_snapshot(
        &self,
        aggregate_type: &str,
        aggregate_id: Uuid,
    ) -> Result<Option<(i64, serde_json::Value)>, EventStoreError> {
        let state = self.state.read().await;
        Ok(state
            .snapshots
            .get(&(aggregate_type.to_string(), aggregate_id))
            .cloned())
    }

    async fn save_snapshot(
        &self,
        aggregate_type: &str,
        aggregate_id: Uuid,
        version: i64,
        state_json: serde_json::Value,
    ) -> Result<(), EventStoreError> {
        let mut state = self.state.write().await;
        let key = (aggregate_type.to_string(), aggregate_id);
        let newer = state
            .snapshots
            .get(&key)
            .map_or(true, |(existing, _)| *existing < version);
        if newer {
            state.snapshots.insert(key, (version, state_json));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn op(aggregate_id: Uuid, expected_version: i64) -> AggregateOperation {
        AggregateOperation {
            aggregate_type: "Sale".to_string(),
            aggregate_id,
            expected_version,
            event_type: "SaleStatusChanged".to_string(),
            event_data: json!({ "n": expected_version }),
        }
    }

    #[tokio::test]
    async fn test_append_checks_expected_version() {
        let repo = InMemoryEventRepository::new();
        let id = Uuid::new_v4();
        let ctx = OperationContext::new();

        assert!(matches!(
            repo.append(op(id, 0), None, &ctx).await.unwrap(),
            AppendOutcome::Appended(_)
        ));
        let err = repo.append(op(id, 0), None, &ctx).await.unwrap_err();
        assert!(matches!(
            err,
            EventStoreError::ConcurrencyConflict {
                expected: 0,
                actual: 1,
                ..
            }
        ));
        repo.append(op(id, 1), None, &ctx).await.unwrap();

        let events = repo.load_events(id, 0).await.unwrap();
        assert_eq!(events.iter().map(|e| e.version).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(repo.load_events(id, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_idempotency_key_replays_original_event() {
        let repo = InMemoryEventRepository::new();
        let id = Uuid::new_v4();
        let key = Uuid::new_v4();
        let ctx = OperationContext::new();

        let first = repo.append(op(id, 0), Some(key), &ctx).await.unwrap();
        let second = repo.append(op(id, 1), Some(key), &ctx).await.unwrap();

        let AppendOutcome::Appended(event_id) = first else {
            panic!("first append must store the event");
        };
        assert_eq!(second, AppendOutcome::Duplicate(event_id));
        assert_eq!(repo.event_count().await, 1);
        assert_eq!(repo.get_event(event_id).await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_idempotency_key_bound_to_aggregate() {
        let repo = InMemoryEventRepository::new();
        let key = Uuid::new_v4();
        let ctx = OperationContext::new();

        repo.append(op(Uuid::new_v4(), 0), Some(key), &ctx).await.unwrap();
        let err = repo
            .append(op(Uuid::new_v4(), 0), Some(key), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, EventStoreError::IdempotencyKeyMismatch(k) if k == key));
    }

    #[tokio::test]
    async fn test_snapshots_only_move_forward() {
        let repo = InMemoryEventRepository::new();
        let id = Uuid::new_v4();

        repo.save_snapshot("Sale", id, 200, json!({"v": 200})).await.unwrap();
        repo.save_snapshot("Sale", id, 100, json!({"v": 100})).await.unwrap();

        let (version, state) = repo.load_snapshot("Sale", id).await.unwrap().unwrap();
        assert_eq!(version, 200);
        assert_eq!(state["v"], 200);
    }
}
