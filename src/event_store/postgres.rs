//! PostgreSQL event repository
//!
//! Atomic event persistence with optimistic concurrency control.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::OperationContext;

use super::{AggregateOperation, AppendOutcome, EventRepository, EventStoreError, StoredEvent};

type EventRow = (
    Uuid,
    String,
    Uuid,
    i64,
    String,
    serde_json::Value,
    serde_json::Value,
    Option<Uuid>,
    DateTime<Utc>,
);

fn into_stored(row: EventRow) -> StoredEvent {
    let (id, aggregate_type, aggregate_id, version, event_type, event_data, context, idempotency_key, created_at) =
        row;
    StoredEvent {
        id,
        aggregate_type,
        aggregate_id,
        version,
        event_type,
        event_data,
        context,
        idempotency_key,
        created_at,
    }
}

/// Event repository backed by the `events`, `event_snapshots` and
/// `idempotency_keys` tables
#[derive(Debug, Clone)]
pub struct PgEventRepository {
    pool: PgPool,
}

impl PgEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get current version of an aggregate
    async fn get_current_version(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        aggregate_id: Uuid,
    ) -> Result<i64, EventStoreError> {
        let result: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT MAX(version) FROM events WHERE aggregate_id = $1
            "#,
        )
        .bind(aggregate_id)
        .fetch_optional(&mut **tx)
        .await?
        .flatten();

        Ok(result.unwrap_or(0))
    }

    /// Check if idempotency key exists and return event ID if completed
    async fn check_idempotency_key(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        key: Uuid,
        request_hash: &str,
    ) -> Result<Option<Uuid>, EventStoreError> {
        let result: Option<(String, Option<Uuid>, String)> = sqlx::query_as(
            r#"
            SELECT processing_status, event_id, request_hash
            FROM idempotency_keys
            WHERE key = $1
            FOR UPDATE
            "#,
        )
        .bind(key)
        .fetch_optional(&mut **tx)
        .await?;

        match result {
            Some((_, _, stored_hash)) if stored_hash != request_hash => {
                Err(EventStoreError::IdempotencyKeyMismatch(key))
            }
            Some((status, event_id, _)) if status == "completed" => Ok(event_id),
            Some((status, _, _)) if status == "processing" => {
                Err(EventStoreError::IdempotencyKeyInFlight(key))
            }
            Some(_) => Ok(None),
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO idempotency_keys (key, request_hash, processing_status, processing_started_at)
                    VALUES ($1, $2, 'processing', NOW())
                    "#,
                )
                .bind(key)
                .bind(request_hash)
                .execute(&mut **tx)
                .await?;
                Ok(None)
            }
        }
    }

    /// Mark idempotency key as completed
    async fn complete_idempotency_key(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        key: Uuid,
        event_id: Uuid,
    ) -> Result<(), EventStoreError> {
        sqlx::query(
            r#"
            UPDATE idempotency_keys
            SET processing_status = 'completed', event_id = $2
            WHERE key = $1
            "#,
        )
        .bind(key)
        .bind(event_id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl EventRepository for PgEventRepository {
    // =========================================================================
    // append (single attempt; the command executor owns retries)
    // =========================================================================

    async fn append(
        &self,
        op: AggregateOperation,
        idempotency_key: Option<Uuid>,
        context: &OperationContext,
    ) -> Result<AppendOutcome, EventStoreError> {
        let context_json = serde_json::to_value(context)?;

        let mut tx = self.pool.begin().await?;

        if let Some(key) = idempotency_key {
            let request_hash = op.request_hash();
            if let Some(existing) = self.check_idempotency_key(&mut tx, key, &request_hash).await? {
                tx.rollback().await?;
                return Ok(AppendOutcome::Duplicate(existing));
            }
        }

        let current_version = self.get_current_version(&mut tx, op.aggregate_id).await?;
        if current_version != op.expected_version {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id: op.aggregate_id,
                expected: op.expected_version,
                actual: current_version,
            });
        }

        // the (aggregate_id, version) unique index turns a lost race into a conflict
        let inserted: Result<Uuid, sqlx::Error> = sqlx::query_scalar(
            r#"
            INSERT INTO events (
                aggregate_type, aggregate_id, version,
                event_type, event_data, context, idempotency_key
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(&op.aggregate_type)
        .bind(op.aggregate_id)
        .bind(op.expected_version + 1)
        .bind(&op.event_type)
        .bind(&op.event_data)
        .bind(&context_json)
        .bind(idempotency_key)
        .fetch_one(&mut *tx)
        .await;

        let event_id = match inserted {
            Ok(id) => id,
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(EventStoreError::ConcurrencyConflict {
                    aggregate_id: op.aggregate_id,
                    expected: op.expected_version,
                    actual: op.expected_version + 1,
                });
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(key) = idempotency_key {
            self.complete_idempotency_key(&mut tx, key, event_id).await?;
        }

        tx.commit().await?;

        Ok(AppendOutcome::Appended(event_id))
    }

    async fn load_events(
        &self,
        aggregate_id: Uuid,
        after_version: i64,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT id, aggregate_type, aggregate_id, version, event_type, event_data, context, idempotency_key, created_at
            FROM events
            WHERE aggregate_id = $1 AND version > $2
            ORDER BY version ASC
            "#,
        )
        .bind(aggregate_id)
        .bind(after_version)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(into_stored).collect())
    }

    async fn get_event(&self, event_id: Uuid) -> Result<Option<StoredEvent>, EventStoreError> {
        let row: Option<EventRow> = sqlx::query_as(
            r#"
            SELECT id, aggregate_type, aggregate_id, version, event_type, event_data, context, idempotency_key, created_at
            FROM events
            WHERE id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(into_stored))
    }

    async fn find_idempotent(&self, key: Uuid) -> Result<Option<Uuid>, EventStoreError> {
        let event_id: Option<Option<Uuid>> = sqlx::query_scalar(
            r#"
            SELECT event_id
            FROM idempotency_keys
            WHERE key = $1 AND processing_status = 'completed'
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(event_id.flatten())
    }

    async fn load_snapshot(
        &self,
        aggregate_type: &str,
        aggregate_id: Uuid,
    ) -> Result<Option<(i64, serde_json::Value)>, EventStoreError> {
        let result: Option<(i64, serde_json::Value)> = sqlx::query_as(
            r#"
            SELECT version, state
            FROM event_snapshots
            WHERE aggregate_type = $1 AND aggregate_id = $2
            "#,
        )
        .bind(aggregate_type)
        .bind(aggregate_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    async fn save_snapshot(
        &self,
        aggregate_type: &str,
        aggregate_id: Uuid,
        version: i64,
        state: serde_json::Value,
    ) -> Result<(), EventStoreError> {
        sqlx::query(
            r#"
            INSERT INTO event_snapshots (aggregate_type, aggregate_id, version, state)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (aggregate_type, aggregate_id)
            DO UPDATE SET version = $3, state = $4, created_at = NOW()
            WHERE event_snapshots.version < $3
            "#,
        )
        .bind(aggregate_type)
        .bind(aggregate_id)
        .bind(version)
        .bind(state)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
