//! Audit Log Service
//!
//! Tamper-evident audit logging with hash chain verification.
//! Every ledger mutation is recorded; cancellations always are.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::OperationContext;

pub use memory::MemoryAuditLog;
pub use postgres::PgAuditLog;

/// `previous_hash` of the first entry in the chain
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Audit log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub sequence_number: i64,
    pub api_key_id: Option<Uuid>,
    pub request_user_id: Option<Uuid>,
    pub correlation_id: Option<Uuid>,
    pub action: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<Uuid>,
    pub before_state: Option<serde_json::Value>,
    pub after_state: Option<serde_json::Value>,
    pub previous_hash: String,
    pub current_hash: String,
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    /// Hash over the entry's identity, content and predecessor
    pub fn compute_hash(&self) -> String {
        let hash_input = format!(
            "{}{}{}{}{}{}{}",
            self.id,
            self.sequence_number,
            self.action,
            self.request_user_id.map(|u| u.to_string()).unwrap_or_default(),
            self.before_state.as_ref().map(|v| v.to_string()).unwrap_or_default(),
            self.after_state.as_ref().map(|v| v.to_string()).unwrap_or_default(),
            self.previous_hash
        );
        sha256_hex(&hash_input)
    }

    /// Build the next link of the chain and seal it
    pub(crate) fn seal(
        builder: AuditLogBuilder,
        context: &OperationContext,
        sequence_number: i64,
        previous_hash: String,
    ) -> Self {
        let mut entry = Self {
            id: Uuid::new_v4(),
            sequence_number,
            api_key_id: context.api_key_id,
            request_user_id: context.actor_id,
            correlation_id: context.correlation_id,
            action: builder.action,
            resource_type: builder.resource_type,
            resource_id: builder.resource_id,
            before_state: builder.before_state,
            after_state: builder.after_state,
            previous_hash,
            current_hash: String::new(),
            created_at: Utc::now(),
        };
        entry.current_hash = entry.compute_hash();
        entry
    }
}

/// Audit action types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    SaleCreated,
    SaleImported,
    PaymentPlanAdded,
    PaymentRecorded,
    PaymentConfirmed,
    PaymentRefunded,
    NextPaymentDueScheduled,
    CommissionPaid,
    CommissionAdjusted,
    SaleStatusChanged,
    SaleCancelled,
    PermissionDenied,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::SaleCreated => "sale.created",
            AuditAction::SaleImported => "sale.imported",
            AuditAction::PaymentPlanAdded => "plan.added",
            AuditAction::PaymentRecorded => "payment.recorded",
            AuditAction::PaymentConfirmed => "payment.confirmed",
            AuditAction::PaymentRefunded => "payment.refunded",
            AuditAction::NextPaymentDueScheduled => "plan.next_due_scheduled",
            AuditAction::CommissionPaid => "commission.paid",
            AuditAction::CommissionAdjusted => "commission.adjusted",
            AuditAction::SaleStatusChanged => "sale.status_changed",
            AuditAction::SaleCancelled => "sale.cancelled",
            AuditAction::PermissionDenied => "auth.permission_denied",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Builder for creating audit log entries
#[derive(Debug, Clone)]
pub struct AuditLogBuilder {
    action: String,
    resource_type: Option<String>,
    resource_id: Option<Uuid>,
    before_state: Option<serde_json::Value>,
    after_state: Option<serde_json::Value>,
}

impl AuditLogBuilder {
    pub fn new(action: AuditAction) -> Self {
        Self {
            action: action.as_str().to_string(),
            resource_type: None,
            resource_id: None,
            before_state: None,
            after_state: None,
        }
    }

    /// Shorthand for an entry about a sale
    pub fn sale(action: AuditAction, sale_id: Uuid) -> Self {
        Self::new(action).resource_type("Sale").resource_id(sale_id)
    }

    pub fn resource_type(mut self, resource_type: &str) -> Self {
        self.resource_type = Some(resource_type.to_string());
        self
    }

    pub fn resource_id(mut self, resource_id: Uuid) -> Self {
        self.resource_id = Some(resource_id);
        self
    }

    pub fn before_state<T: Serialize>(mut self, state: &T) -> Self {
        self.before_state = serde_json::to_value(state).ok();
        self
    }

    pub fn after_state<T: Serialize>(mut self, state: &T) -> Self {
        self.after_state = serde_json::to_value(state).ok();
        self
    }

    pub fn action(&self) -> &str {
        &self.action
    }
}

/// Result of hash chain verification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainVerificationResult {
    pub is_valid: bool,
    pub entries_checked: u64,
    pub first_invalid_entry: Option<Uuid>,
    pub expected_hash: Option<String>,
    pub actual_hash: Option<String>,
}

impl ChainVerificationResult {
    fn valid(entries_checked: u64) -> Self {
        Self {
            is_valid: true,
            entries_checked,
            first_invalid_entry: None,
            expected_hash: None,
            actual_hash: None,
        }
    }

    fn broken(entries_checked: u64, entry: Uuid, expected: String, actual: String) -> Self {
        Self {
            is_valid: false,
            entries_checked,
            first_invalid_entry: Some(entry),
            expected_hash: Some(expected),
            actual_hash: Some(actual),
        }
    }
}

/// Verify linkage and hashes of entries ordered by sequence number, starting at genesis
pub fn verify_chain(entries: &[AuditLogEntry]) -> ChainVerificationResult {
    let mut previous_hash = GENESIS_HASH.to_string();

    for (checked, entry) in entries.iter().enumerate() {
        let checked = checked as u64 + 1;
        if entry.previous_hash != previous_hash {
            return ChainVerificationResult::broken(
                checked,
                entry.id,
                previous_hash,
                entry.previous_hash.clone(),
            );
        }

        let calculated_hash = entry.compute_hash();
        if calculated_hash != entry.current_hash {
            return ChainVerificationResult::broken(
                checked,
                entry.id,
                calculated_hash,
                entry.current_hash.clone(),
            );
        }

        previous_hash = entry.current_hash.clone();
    }

    ChainVerificationResult::valid(entries.len() as u64)
}

/// Calculate SHA-256 hash and return as hex string
pub fn sha256_hex(input: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Audit log errors
#[derive(Debug, thiserror::Error)]
pub enum AuditLogError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Append-only, hash-chained audit trail
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Write an audit log entry and return its id
    async fn log(
        &self,
        builder: AuditLogBuilder,
        context: &OperationContext,
    ) -> Result<Uuid, AuditLogError>;

    /// Most recent entries, newest first
    async fn recent(&self, limit: i64) -> Result<Vec<AuditLogEntry>, AuditLogError>;

    /// Verify the first `limit` entries of the chain
    async fn verify_hash_chain(
        &self,
        limit: Option<i64>,
    ) -> Result<ChainVerificationResult, AuditLogError>;
}

// =========================================================================
// Tests
// =========================================================================
