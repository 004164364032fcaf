use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::OperationContext;

use super::{
    verify_chain, AuditLog, AuditLogBuilder, AuditLogEntry, AuditLogError,
    ChainVerificationResult, GENESIS_HASH,
};

/// Serializes writers of the chain across connections
const AUDIT_CHAIN_LOCK: i64 = 0x5a1e_1ed6;

type AuditRow = (
    Uuid,
    i64,
    Option<Uuid>,
    Option<Uuid>,
    Option<Uuid>,
    String,
    Option<String>,
    Option<Uuid>,
    Option<serde_json::Value>,
    Option<serde_json::Value>,
    String,
    String,
    DateTime<Utc>,
);

fn into_entry(row: AuditRow) -> AuditLogEntry {
    let (
        id,
        sequence_number,
        api_key_id,
        request_user_id,
        correlation_id,
        action,
        resource_type,
        resource_id,
        before_state,
        after_state,
        previous_hash,
        current_hash,
        created_at,
    ) = row;
    AuditLogEntry {
        id,
        sequence_number,
        api_key_id,
        request_user_id,
        correlation_id,
        action,
        resource_type,
        resource_id,
        before_state,
        after_state,
        previous_hash,
        current_hash,
        created_at,
    }
}

/// Audit trail in the `audit_logs` table
#[derive(Debug, Clone)]
pub struct PgAuditLog {
    pool: PgPool,
}

impl PgAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLog for PgAuditLog {
    async fn log(
        &self,
        builder: AuditLogBuilder,
        context: &OperationContext,
    ) -> Result<Uuid, AuditLogError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(AUDIT_CHAIN_LOCK)
            .execute(&mut *tx)
            .await?;

        let last: Option<(i64, String)> = sqlx::query_as(
            r#"
            SELECT sequence_number, current_hash
            FROM audit_logs
            ORDER BY sequence_number DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;
        let (sequence_number, previous_hash) = match last {
            Some((seq, hash)) => (seq + 1, hash),
            None => (1, GENESIS_HASH.to_string()),
        };

        let entry = AuditLogEntry::seal(builder, context, sequence_number, previous_hash);

        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, sequence_number, api_key_id, request_user_id, correlation_id,
                action, resource_type, resource_id,
                before_state, after_state, previous_hash, current_hash, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(entry.id)
        .bind(entry.sequence_number)
        .bind(entry.api_key_id)
        .bind(entry.request_user_id)
        .bind(entry.correlation_id)
        .bind(&entry.action)
        .bind(&entry.resource_type)
        .bind(entry.resource_id)
        .bind(&entry.before_state)
        .bind(&entry.after_state)
        .bind(&entry.previous_hash)
        .bind(&entry.current_hash)
        .bind(entry.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(
            audit_id = %entry.id,
            action = %entry.action,
            "Audit log entry created"
        );

        Ok(entry.id)
    }

    async fn recent(&self, limit: i64) -> Result<Vec<AuditLogEntry>, AuditLogError> {
        let rows: Vec<AuditRow> = sqlx::query_as(
            r#"
            SELECT id, sequence_number, api_key_id, request_user_id, correlation_id,
                   action, resource_type, resource_id,
                   before_state, after_state, previous_hash, current_hash, created_at
            FROM audit_logs
            ORDER BY sequence_number DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(into_entry).collect())
    }

    async fn verify_hash_chain(
        &self,
        limit: Option<i64>,
    ) -> Result<ChainVerificationResult, AuditLogError> {
        let rows: Vec<AuditRow> = sqlx::query_as(
            r#"
            SELECT id, sequence_number, api_key_id, request_user_id, correlation_id,
                   action, resource_type, resource_id,
                   before_state, after_state, previous_hash, current_hash, created_at
            FROM audit_logs
            ORDER BY sequence_number ASC
            LIMIT $1
            "#,
        )
        .bind(limit.unwrap_or(1000))
        .fetch_all(&self.pool)
        .await?;

        let entries: Vec<AuditLogEntry> = rows.into_iter().map(into_entry).collect();
        Ok(verify_chain(&entries))
    }
}
