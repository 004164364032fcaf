//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use super::model::SaleStatus;
use super::money::AmountError;

/// Business rule violations and domain invariant failures.
///
/// Every rejection carries the precise reason; nothing is clamped to a
/// "closest legal value".
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Malformed or out-of-range input
    #[error("Validation failed for `{field}`: {message}")]
    Validation { field: String, message: String },

    /// Operation not permitted in the current sale or plan state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Commission disbursement larger than what is currently payable
    #[error("Commission payment of {requested} exceeds payable commission of {payable}")]
    ExceedsAccrued { requested: Decimal, payable: Decimal },

    /// Nothing is payable yet
    #[error("No commission payable: accrued {accrued}, already paid {paid}")]
    NoAccrual { accrued: Decimal, paid: Decimal },

    /// Illegal sale status edge
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: SaleStatus, to: SaleStatus },

    /// Another writer modified the sale first
    #[error("Concurrent modification of sale {sale_id}: expected version {expected}, found {found}")]
    ConcurrentModification {
        sale_id: Uuid,
        expected: i64,
        found: i64,
    },

    #[error("Sale not found: {0}")]
    SaleNotFound(Uuid),

    #[error("Payment plan not found: {0}")]
    PlanNotFound(Uuid),

    #[error("Payment not found: {0}")]
    PaymentNotFound(Uuid),
}

impl DomainError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Wrap a money parse/validation failure for a named field
    pub fn amount(field: &str, err: AmountError) -> Self {
        Self::validation(field, err.to_string())
    }

    /// Check if this is a client error (caller must change the request)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::InvalidState(_)
                | Self::ExceedsAccrued { .. }
                | Self::NoAccrual { .. }
                | Self::InvalidTransition { .. }
        )
    }

    /// Check if this is a conflict error (retry may help)
    pub fn is_conflict_error(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }

    /// Only a lost optimistic-concurrency race is worth retrying unchanged
    pub fn is_retryable(&self) -> bool {
        self.is_conflict_error()
    }
}
