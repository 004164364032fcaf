//! Domain Events
//!
//! Event definitions for Event Sourcing.
//! Events are immutable facts about a sale; a sale's state is their fold.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::model::{CommissionPayment, Payment, PaymentPlanType, SaleStatus};

/// Sale-related events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SaleEvent {
    /// Sale was opened (in Reservation)
    SaleCreated {
        sale_id: Uuid,
        unit_reference: String,
        quantity: u32,
        sale_price: Decimal,
        payment_plan_type: PaymentPlanType,
        commission_percentage: Option<Decimal>,
        agent_id: Option<Uuid>,
        /// Scalar `amountPaid` carried over from legacy records
        #[serde(default)]
        legacy_amount_paid: Option<Decimal>,
        created_at: DateTime<Utc>,
    },

    /// A legacy record was ingested with its payment history already resolved
    SaleImported {
        sale_id: Uuid,
        unit_reference: String,
        quantity: u32,
        sale_price: Decimal,
        payment_plan_type: PaymentPlanType,
        status: SaleStatus,
        commission_percentage: Option<Decimal>,
        agent_id: Option<Uuid>,
        #[serde(default)]
        payments: Vec<Payment>,
        #[serde(default)]
        legacy_amount_paid: Option<Decimal>,
        imported_at: DateTime<Utc>,
    },

    /// An installment plan was attached
    PaymentPlanAdded {
        sale_id: Uuid,
        plan_id: Uuid,
        total_amount: Decimal,
        initial_deposit: Decimal,
        installment_amount: Decimal,
        next_payment_due: Option<DateTime<Utc>>,
        added_at: DateTime<Utc>,
    },

    /// A client payment was recorded against a plan or the sale directly
    PaymentRecorded {
        sale_id: Uuid,
        plan_id: Option<Uuid>,
        payment: Payment,
        recorded_at: DateTime<Utc>,
    },

    /// A pending payment cleared
    PaymentConfirmed {
        sale_id: Uuid,
        payment_id: Uuid,
        confirmed_at: DateTime<Utc>,
    },

    /// A payment was refunded to the client
    PaymentRefunded {
        sale_id: Uuid,
        payment_id: Uuid,
        reopen_plan: bool,
        reason: String,
        refunded_at: DateTime<Utc>,
    },

    /// A plan's next due date was (re)scheduled or cleared
    NextPaymentDueScheduled {
        sale_id: Uuid,
        plan_id: Uuid,
        next_payment_due: Option<DateTime<Utc>>,
        scheduled_at: DateTime<Utc>,
    },

    /// Commission was disbursed to the agent or explicitly adjusted
    CommissionPaymentRecorded {
        sale_id: Uuid,
        commission_payment: CommissionPayment,
        recorded_at: DateTime<Utc>,
    },

    /// Forward status transition
    SaleStatusChanged {
        sale_id: Uuid,
        from: SaleStatus,
        to: SaleStatus,
        changed_by: Option<Uuid>,
        changed_at: DateTime<Utc>,
    },

    /// Sale was cancelled; terminal
    SaleCancelled {
        sale_id: Uuid,
        from: SaleStatus,
        reason: String,
        cancelled_by: Option<Uuid>,
        cancelled_at: DateTime<Utc>,
    },
}

impl SaleEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            SaleEvent::SaleCreated { .. } => "SaleCreated",
            SaleEvent::SaleImported { .. } => "SaleImported",
            SaleEvent::PaymentPlanAdded { .. } => "PaymentPlanAdded",
            SaleEvent::PaymentRecorded { .. } => "PaymentRecorded",
            SaleEvent::PaymentConfirmed { .. } => "PaymentConfirmed",
            SaleEvent::PaymentRefunded { .. } => "PaymentRefunded",
            SaleEvent::NextPaymentDueScheduled { .. } => "NextPaymentDueScheduled",
            SaleEvent::CommissionPaymentRecorded { .. } => "CommissionPaymentRecorded",
            SaleEvent::SaleStatusChanged { .. } => "SaleStatusChanged",
            SaleEvent::SaleCancelled { .. } => "SaleCancelled",
        }
    }

    /// Get the sale ID this event relates to
    pub fn sale_id(&self) -> Uuid {
        match self {
            SaleEvent::SaleCreated { sale_id, .. }
            | SaleEvent::SaleImported { sale_id, .. }
            | SaleEvent::PaymentPlanAdded { sale_id, .. }
            | SaleEvent::PaymentRecorded { sale_id, .. }
            | SaleEvent::PaymentConfirmed { sale_id, .. }
            | SaleEvent::PaymentRefunded { sale_id, .. }
            | SaleEvent::NextPaymentDueScheduled { sale_id, .. }
            | SaleEvent::CommissionPaymentRecorded { sale_id, .. }
            | SaleEvent::SaleStatusChanged { sale_id, .. }
            | SaleEvent::SaleCancelled { sale_id, .. } => *sale_id,
        }
    }
}
