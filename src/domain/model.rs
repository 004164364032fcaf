//! Sale ledger model
//!
//! Value types owned by the [`Sale`](crate::aggregate::Sale) aggregate.
//! Amounts are raw decimals here; validation happens when a command is decided,
//! so replaying history never rejects a stored fact.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the buyer settles the sale price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentPlanType {
    FullPayment,
    Installment,
}

/// Sale lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    Reservation,
    Agreement,
    Processing,
    Completed,
    Cancelled,
}

impl SaleStatus {
    /// Completed and Cancelled accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SaleStatus::Completed | SaleStatus::Cancelled)
    }

    /// Forward edges plus cancellation from any non-terminal state.
    pub fn can_transition_to(&self, next: SaleStatus) -> bool {
        use SaleStatus::*;
        matches!(
            (*self, next),
            (Reservation, Agreement)
                | (Agreement, Processing)
                | (Processing, Completed)
                | (Reservation | Agreement | Processing, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SaleStatus::Reservation => "reservation",
            SaleStatus::Agreement => "agreement",
            SaleStatus::Processing => "processing",
            SaleStatus::Completed => "completed",
            SaleStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SaleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Installment plan status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    Active,
    Completed,
}

/// Payment event status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    BankTransfer,
    Cheque,
    Card,
    MobileMoney,
    Other,
}

impl Default for PaymentMethod {
    fn default() -> Self {
        Self::BankTransfer
    }
}

/// A client payment, owned by a plan or directly by the sale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub amount: Decimal,
    pub payment_date: DateTime<Utc>,
    pub payment_method: PaymentMethod,
    pub status: PaymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_by: Option<Uuid>,
}

impl Payment {
    pub fn is_completed(&self) -> bool {
        self.status == PaymentStatus::Completed
    }
}

/// Installment schedule attached to a sale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentPlan {
    pub id: Uuid,
    pub total_amount: Decimal,
    pub initial_deposit: Decimal,
    pub installment_amount: Decimal,
    pub outstanding_balance: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_payment_due: Option<DateTime<Utc>>,
    pub status: PlanStatus,
    #[serde(default)]
    pub payments: Vec<Payment>,
}

impl PaymentPlan {
    /// A fresh plan owes its full total and has not started.
    pub fn new(
        id: Uuid,
        total_amount: Decimal,
        initial_deposit: Decimal,
        installment_amount: Decimal,
        next_payment_due: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            total_amount,
            initial_deposit,
            installment_amount,
            outstanding_balance: total_amount,
            next_payment_due,
            status: PlanStatus::Pending,
            payments: Vec::new(),
        }
    }
}

/// Commission entry kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionEntryKind {
    /// Money paid out to the agent
    Disbursement,
    /// Explicit negative correction of earlier disbursements
    Adjustment,
}

impl Default for CommissionEntryKind {
    fn default() -> Self {
        Self::Disbursement
    }
}

/// Commission paid out (or corrected) against a sale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionPayment {
    pub id: Uuid,
    pub amount: Decimal,
    pub payment_date: DateTime<Utc>,
    pub payment_method: PaymentMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_to: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub kind: CommissionEntryKind,
}

/// Derived commission status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionStatus {
    Pending,
    Partial,
    Paid,
}

/// Commission configuration and disbursement history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Commission {
    /// Agent rate in percent; `None` on legacy sales falls back to the policy default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<Uuid>,
    #[serde(default)]
    pub payments: Vec<CommissionPayment>,
}
