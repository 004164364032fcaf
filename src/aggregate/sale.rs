//! Sale Aggregate
//!
//! Sale is the root aggregate of the ledger. Plans, payments and commission
//! entries are owned by it and only change through its events.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::money;
use crate::domain::{
    Amount, Commission, CommissionEntryKind, CommissionPayment, DomainError, Payment,
    PaymentMethod, PaymentPlan, PaymentPlanType, PaymentStatus, Percentage, PlanStatus,
    SaleEvent, SaleStatus,
};
use crate::reconcile::ledger::{self, PaymentLocation};
use crate::reconcile::plan;
use crate::reconcile::CommissionCalculator;

use super::Aggregate;

/// Reason recorded when a sale is cancelled through a plain status change
pub const DEFAULT_CANCEL_REASON: &str = "status changed to cancelled";

// =========================================================================
// Command inputs
// =========================================================================

/// Validated input for opening a sale
#[derive(Debug, Clone)]
pub struct NewSale {
    pub sale_id: Uuid,
    pub unit_reference: String,
    pub quantity: u32,
    pub sale_price: Decimal,
    pub payment_plan_type: PaymentPlanType,
    pub commission_percentage: Option<Percentage>,
    pub agent_id: Option<Uuid>,
    pub legacy_amount_paid: Option<Decimal>,
}

/// A legacy record whose payment shape was already resolved to one source
#[derive(Debug, Clone)]
pub struct ImportedSale {
    pub sale: NewSale,
    pub status: SaleStatus,
    pub payments: Vec<Payment>,
}

#[derive(Debug, Clone)]
pub struct NewPaymentPlan {
    pub plan_id: Uuid,
    pub total_amount: Amount,
    pub initial_deposit: Decimal,
    pub installment_amount: Decimal,
    pub next_payment_due: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub payment_id: Uuid,
    pub amount: Amount,
    /// Defaults to the time of recording
    pub payment_date: Option<DateTime<Utc>>,
    pub payment_method: PaymentMethod,
    /// Completed unless explicitly Pending
    pub status: Option<PaymentStatus>,
    pub transaction_reference: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewCommissionPayment {
    pub payment_id: Uuid,
    pub amount: Amount,
    pub payment_date: Option<DateTime<Utc>>,
    pub payment_method: PaymentMethod,
    pub paid_to: Option<Uuid>,
    pub reference: Option<String>,
    pub notes: Option<String>,
}

/// Sale Aggregate
///
/// State is derived from events, never directly mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sale {
    id: Uuid,
    unit_reference: String,
    quantity: u32,
    sale_price: Decimal,
    payment_plan_type: PaymentPlanType,
    status: SaleStatus,
    plans: Vec<PaymentPlan>,
    payments: Vec<Payment>,
    commission: Commission,
    legacy_amount_paid: Option<Decimal>,
    cancellation_reason: Option<String>,
    version: i64,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl Default for Sale {
    fn default() -> Self {
        Self {
            id: Uuid::nil(),
            unit_reference: String::new(),
            quantity: 0,
            sale_price: Decimal::ZERO,
            payment_plan_type: PaymentPlanType::FullPayment,
            status: SaleStatus::Reservation,
            plans: Vec::new(),
            payments: Vec::new(),
            commission: Commission::default(),
            legacy_amount_paid: None,
            cancellation_reason: None,
            version: 0,
            created_at: None,
            updated_at: None,
        }
    }
}

fn required_text(field: &str, value: &str) -> Result<(), DomainError> {
    if value.trim().is_empty() {
        return Err(DomainError::validation(field, "must not be empty"));
    }
    Ok(())
}

fn non_negative_money(field: &str, value: Decimal) -> Result<(), DomainError> {
    if value < Decimal::ZERO {
        return Err(DomainError::validation(field, "must not be negative"));
    }
    money::check_bounds(value).map_err(|e| DomainError::amount(field, e))
}

impl Sale {
    // =========================================================================
    // Sale::create()
    // =========================================================================

    /// Open a sale in Reservation and generate its creation event
    pub fn create(input: NewSale, now: DateTime<Utc>) -> Result<(Self, SaleEvent), DomainError> {
        required_text("unit_reference", &input.unit_reference)?;
        if input.quantity == 0 {
            return Err(DomainError::validation("quantity", "must be at least 1"));
        }
        non_negative_money("sale_price", input.sale_price)?;
        if let Some(legacy) = input.legacy_amount_paid {
            non_negative_money("amount_paid", legacy)?;
        }

        let event = SaleEvent::SaleCreated {
            sale_id: input.sale_id,
            unit_reference: input.unit_reference.trim().to_string(),
            quantity: input.quantity,
            sale_price: input.sale_price,
            payment_plan_type: input.payment_plan_type,
            commission_percentage: input.commission_percentage.map(|p| p.value()),
            agent_id: input.agent_id,
            legacy_amount_paid: input.legacy_amount_paid,
            created_at: now,
        };

        Ok((Self::default().apply(event.clone()), event))
    }

    /// Ingest a legacy sale. History is taken as recorded: payments may be in any
    /// status and the sale may already be past Reservation.
    pub fn import(input: ImportedSale, now: DateTime<Utc>) -> Result<(Self, SaleEvent), DomainError> {
        let ImportedSale {
            sale,
            status,
            payments,
        } = input;

        required_text("unit_reference", &sale.unit_reference)?;
        if sale.quantity == 0 {
            return Err(DomainError::validation("quantity", "must be at least 1"));
        }
        non_negative_money("sale_price", sale.sale_price)?;
        if !payments.is_empty() && sale.legacy_amount_paid.is_some() {
            return Err(DomainError::validation(
                "amount_paid",
                "a record carries either a payment list or a scalar amount, not both",
            ));
        }
        if let Some(legacy) = sale.legacy_amount_paid {
            non_negative_money("amount_paid", legacy)?;
        }
        for (idx, payment) in payments.iter().enumerate() {
            Amount::new(payment.amount)
                .map_err(|e| DomainError::amount(&format!("payments[{}].amount", idx), e))?;
            if payments[..idx].iter().any(|p| p.id == payment.id) {
                return Err(DomainError::validation(
                    format!("payments[{}].id", idx),
                    "duplicate payment id",
                ));
            }
        }

        let event = SaleEvent::SaleImported {
            sale_id: sale.sale_id,
            unit_reference: sale.unit_reference.trim().to_string(),
            quantity: sale.quantity,
            sale_price: sale.sale_price,
            payment_plan_type: sale.payment_plan_type,
            status,
            commission_percentage: sale.commission_percentage.map(|p| p.value()),
            agent_id: sale.agent_id,
            payments,
            legacy_amount_paid: sale.legacy_amount_paid,
            imported_at: now,
        };

        Ok((Self::default().apply(event.clone()), event))
    }

    // =========================================================================
    // Payment plans
    // =========================================================================

    pub fn add_payment_plan(
        &self,
        input: NewPaymentPlan,
        now: DateTime<Utc>,
    ) -> Result<SaleEvent, DomainError> {
        ledger::ensure_accepts_payments(self)?;
        if self.payment_plan_type != PaymentPlanType::Installment {
            return Err(DomainError::invalid_state(
                "payment plans can only be attached to installment sales",
            ));
        }
        if !self.payments.is_empty() || self.legacy_amount_paid.is_some() {
            return Err(DomainError::invalid_state(
                "sale already tracks payments directly; a plan would split the source of truth",
            ));
        }
        if self.plan(input.plan_id).is_some() {
            return Err(DomainError::validation("plan_id", "plan already exists"));
        }

        let total = input.total_amount.value();
        if input.initial_deposit < Decimal::ZERO || input.initial_deposit > total {
            return Err(DomainError::validation(
                "initial_deposit",
                format!("must be between 0 and the plan total {}", total),
            ));
        }
        if input.installment_amount < Decimal::ZERO {
            return Err(DomainError::validation("installment_amount", "must not be negative"));
        }
        let planned: Decimal = self.plans.iter().map(|p| p.total_amount).sum();
        if planned + total > self.sale_price {
            return Err(DomainError::validation(
                "total_amount",
                format!(
                    "plans would total {} which exceeds the sale price {}",
                    planned + total,
                    self.sale_price
                ),
            ));
        }

        Ok(SaleEvent::PaymentPlanAdded {
            sale_id: self.id,
            plan_id: input.plan_id,
            total_amount: total,
            initial_deposit: input.initial_deposit,
            installment_amount: input.installment_amount,
            next_payment_due: input.next_payment_due,
            added_at: now,
        })
    }

    pub fn schedule_next_payment_due(
        &self,
        plan_id: Uuid,
        next_payment_due: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<SaleEvent, DomainError> {
        ledger::ensure_accepts_payments(self)?;
        let plan = self.plan(plan_id).ok_or(DomainError::PlanNotFound(plan_id))?;
        if plan.status == PlanStatus::Completed && next_payment_due.is_some() {
            return Err(DomainError::invalid_state(format!(
                "payment plan {} is completed; nothing left to schedule",
                plan_id
            )));
        }

        Ok(SaleEvent::NextPaymentDueScheduled {
            sale_id: self.id,
            plan_id,
            next_payment_due,
            scheduled_at: now,
        })
    }

    // =========================================================================
    // Client payments
    // =========================================================================

    /// Record a client payment against a plan, or the sale when it has no plans
    pub fn record_payment(
        &self,
        plan_id: Option<Uuid>,
        input: NewPayment,
        recorded_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<SaleEvent, DomainError> {
        let status = input.status.unwrap_or(PaymentStatus::Completed);
        if status == PaymentStatus::Refunded {
            return Err(DomainError::validation(
                "status",
                "a new payment must be completed or pending",
            ));
        }
        if ledger::locate_payment(self, input.payment_id).is_some() {
            return Err(DomainError::validation("payment_id", "payment already recorded"));
        }
        ledger::validate_payment_target(self, plan_id, input.amount.value())?;

        Ok(SaleEvent::PaymentRecorded {
            sale_id: self.id,
            plan_id,
            payment: Payment {
                id: input.payment_id,
                amount: input.amount.value(),
                payment_date: input.payment_date.unwrap_or(now),
                payment_method: input.payment_method,
                status,
                transaction_reference: input.transaction_reference,
                notes: input.notes,
                recorded_by,
            },
            recorded_at: now,
        })
    }

    /// Clear a pending payment; the overpayment rule is checked again
    pub fn confirm_payment(
        &self,
        payment_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<SaleEvent, DomainError> {
        ledger::ensure_accepts_payments(self)?;
        let (plan, payment) =
            ledger::find_payment(self, payment_id).ok_or(DomainError::PaymentNotFound(payment_id))?;
        if payment.status != PaymentStatus::Pending {
            return Err(DomainError::invalid_state(format!(
                "payment {} is {:?}; only pending payments can be confirmed",
                payment_id, payment.status
            )));
        }

        let outstanding = match plan {
            Some(plan) => plan.outstanding_balance,
            None => ledger::direct_outstanding(self),
        };
        if payment.amount > outstanding {
            return Err(DomainError::invalid_state(format!(
                "confirming {} would exceed the outstanding balance of {}",
                payment.amount, outstanding
            )));
        }

        Ok(SaleEvent::PaymentConfirmed {
            sale_id: self.id,
            payment_id,
            confirmed_at: now,
        })
    }

    /// Mark a completed payment refunded. A completed plan only reopens on request.
    pub fn refund_payment(
        &self,
        payment_id: Uuid,
        reopen_plan: bool,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<SaleEvent, DomainError> {
        required_text("reason", &reason)?;
        if self.status.is_terminal() {
            return Err(DomainError::invalid_state(format!(
                "sale {} is {}; its ledger is frozen",
                self.id, self.status
            )));
        }
        let (plan, payment) =
            ledger::find_payment(self, payment_id).ok_or(DomainError::PaymentNotFound(payment_id))?;
        if payment.status != PaymentStatus::Completed {
            return Err(DomainError::invalid_state(format!(
                "payment {} is {:?}; only completed payments can be refunded",
                payment_id, payment.status
            )));
        }
        if let Some(plan) = plan {
            if plan.status == PlanStatus::Completed && !reopen_plan {
                return Err(DomainError::invalid_state(format!(
                    "payment plan {} is completed; refunding requires reopen_plan",
                    plan.id
                )));
            }
        }

        Ok(SaleEvent::PaymentRefunded {
            sale_id: self.id,
            payment_id,
            reopen_plan,
            reason,
            refunded_at: now,
        })
    }

    // =========================================================================
    // Commission
    // =========================================================================

    pub fn record_commission_payment(
        &self,
        input: NewCommissionPayment,
        calculator: &CommissionCalculator,
        now: DateTime<Utc>,
    ) -> Result<SaleEvent, DomainError> {
        calculator.validate_disbursement(self, input.amount.value())?;

        Ok(SaleEvent::CommissionPaymentRecorded {
            sale_id: self.id,
            commission_payment: CommissionPayment {
                id: input.payment_id,
                amount: input.amount.value(),
                payment_date: input.payment_date.unwrap_or(now),
                payment_method: input.payment_method,
                paid_to: input.paid_to.or(self.commission.agent_id),
                reference: input.reference,
                notes: input.notes,
                kind: CommissionEntryKind::Disbursement,
            },
            recorded_at: now,
        })
    }

    /// Correct earlier disbursements with a negative entry
    pub fn record_commission_adjustment(
        &self,
        adjustment_id: Uuid,
        amount: Amount,
        reason: String,
        calculator: &CommissionCalculator,
        now: DateTime<Utc>,
    ) -> Result<SaleEvent, DomainError> {
        calculator.validate_adjustment(self, amount.value(), &reason)?;

        Ok(SaleEvent::CommissionPaymentRecorded {
            sale_id: self.id,
            commission_payment: CommissionPayment {
                id: adjustment_id,
                amount: -amount.value(),
                payment_date: now,
                payment_method: PaymentMethod::Other,
                paid_to: self.commission.agent_id,
                reference: None,
                notes: Some(reason),
                kind: CommissionEntryKind::Adjustment,
            },
            recorded_at: now,
        })
    }

    // =========================================================================
    // Status
    // =========================================================================

    pub fn transition_status(
        &self,
        to: SaleStatus,
        changed_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<SaleEvent, DomainError> {
        if to == SaleStatus::Cancelled {
            return self.cancel(DEFAULT_CANCEL_REASON.to_string(), changed_by, now);
        }
        if !self.status.can_transition_to(to) {
            return Err(DomainError::InvalidTransition {
                from: self.status,
                to,
            });
        }

        Ok(SaleEvent::SaleStatusChanged {
            sale_id: self.id,
            from: self.status,
            to,
            changed_by,
            changed_at: now,
        })
    }

    /// Cancel from any non-terminal state. Recorded payments stay as they are.
    pub fn cancel(
        &self,
        reason: String,
        cancelled_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<SaleEvent, DomainError> {
        if !self.status.can_transition_to(SaleStatus::Cancelled) {
            return Err(DomainError::InvalidTransition {
                from: self.status,
                to: SaleStatus::Cancelled,
            });
        }
        required_text("reason", &reason)?;

        Ok(SaleEvent::SaleCancelled {
            sale_id: self.id,
            from: self.status,
            reason,
            cancelled_by,
            cancelled_at: now,
        })
    }

    // =========================================================================
    // Getters
    // =========================================================================

    pub fn unit_reference(&self) -> &str {
        &self.unit_reference
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    pub fn sale_price(&self) -> Decimal {
        self.sale_price
    }

    pub fn payment_plan_type(&self) -> PaymentPlanType {
        self.payment_plan_type
    }

    pub fn status(&self) -> SaleStatus {
        self.status
    }

    pub fn plans(&self) -> &[PaymentPlan] {
        &self.plans
    }

    pub fn plan(&self, plan_id: Uuid) -> Option<&PaymentPlan> {
        self.plans.iter().find(|p| p.id == plan_id)
    }

    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    pub fn commission(&self) -> &Commission {
        &self.commission
    }

    pub fn legacy_amount_paid(&self) -> Option<Decimal> {
        self.legacy_amount_paid
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn exists(&self) -> bool {
        self.version > 0
    }

    fn payment_mut(&mut self, payment_id: Uuid) -> Option<(&mut Payment, Option<usize>)> {
        match ledger::locate_payment(self, payment_id)? {
            PaymentLocation::Direct(idx) => Some((&mut self.payments[idx], None)),
            PaymentLocation::Plan { plan, payment } => {
                Some((&mut self.plans[plan].payments[payment], Some(plan)))
            }
        }
    }
}

impl Aggregate for Sale {
    type Event = SaleEvent;

    fn aggregate_type() -> &'static str {
        "Sale"
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn apply(mut self, event: Self::Event) -> Self {
        match event {
            SaleEvent::SaleCreated {
                sale_id,
                unit_reference,
                quantity,
                sale_price,
                payment_plan_type,
                commission_percentage,
                agent_id,
                legacy_amount_paid,
                created_at,
            } => {
                self.id = sale_id;
                self.unit_reference = unit_reference;
                self.quantity = quantity;
                self.sale_price = sale_price;
                self.payment_plan_type = payment_plan_type;
                self.status = SaleStatus::Reservation;
                self.commission = Commission {
                    percentage: commission_percentage,
                    agent_id,
                    payments: Vec::new(),
                };
                self.legacy_amount_paid = legacy_amount_paid;
                self.created_at = Some(created_at);
                self.updated_at = Some(created_at);
            }

            SaleEvent::SaleImported {
                sale_id,
                unit_reference,
                quantity,
                sale_price,
                payment_plan_type,
                status,
                commission_percentage,
                agent_id,
                payments,
                legacy_amount_paid,
                imported_at,
            } => {
                self.id = sale_id;
                self.unit_reference = unit_reference;
                self.quantity = quantity;
                self.sale_price = sale_price;
                self.payment_plan_type = payment_plan_type;
                self.status = status;
                self.commission = Commission {
                    percentage: commission_percentage,
                    agent_id,
                    payments: Vec::new(),
                };
                self.payments = payments;
                self.legacy_amount_paid = legacy_amount_paid;
                self.created_at = Some(imported_at);
                self.updated_at = Some(imported_at);
            }

            SaleEvent::PaymentPlanAdded {
                plan_id,
                total_amount,
                initial_deposit,
                installment_amount,
                next_payment_due,
                added_at,
                ..
            } => {
                self.plans.push(PaymentPlan::new(
                    plan_id,
                    total_amount,
                    initial_deposit,
                    installment_amount,
                    next_payment_due,
                ));
                self.updated_at = Some(added_at);
            }

            SaleEvent::PaymentRecorded {
                plan_id,
                payment,
                recorded_at,
                ..
            } => {
                match plan_id {
                    Some(plan_id) => match self.plans.iter_mut().find(|p| p.id == plan_id) {
                        Some(plan) => plan::apply_payment(plan, payment),
                        None => {
                            tracing::error!(
                                "PaymentRecorded references unknown plan {} on sale {}",
                                plan_id,
                                self.id
                            );
                        }
                    },
                    None => self.payments.push(payment),
                }
                self.updated_at = Some(recorded_at);
            }

            SaleEvent::PaymentConfirmed {
                payment_id,
                confirmed_at,
                ..
            } => {
                let sale_id = self.id;
                match self.payment_mut(payment_id) {
                    Some((payment, plan_idx)) => {
                        payment.status = PaymentStatus::Completed;
                        if let Some(idx) = plan_idx {
                            plan::recompute(&mut self.plans[idx], false);
                        }
                    }
                    None => {
                        tracing::error!(
                            "PaymentConfirmed references unknown payment {} on sale {}",
                            payment_id,
                            sale_id
                        );
                    }
                }
                self.updated_at = Some(confirmed_at);
            }

            SaleEvent::PaymentRefunded {
                payment_id,
                reopen_plan,
                refunded_at,
                ..
            } => {
                let sale_id = self.id;
                match self.payment_mut(payment_id) {
                    Some((payment, plan_idx)) => {
                        payment.status = PaymentStatus::Refunded;
                        if let Some(idx) = plan_idx {
                            plan::recompute(&mut self.plans[idx], reopen_plan);
                        }
                    }
                    None => {
                        tracing::error!(
                            "PaymentRefunded references unknown payment {} on sale {}",
                            payment_id,
                            sale_id
                        );
                    }
                }
                self.updated_at = Some(refunded_at);
            }

            SaleEvent::NextPaymentDueScheduled {
                plan_id,
                next_payment_due,
                scheduled_at,
                ..
            } => {
                match self.plans.iter_mut().find(|p| p.id == plan_id) {
                    Some(plan) => plan.next_payment_due = next_payment_due,
                    None => {
                        tracing::error!(
                            "NextPaymentDueScheduled references unknown plan {} on sale {}",
                            plan_id,
                            self.id
                        );
                    }
                }
                self.updated_at = Some(scheduled_at);
            }

            SaleEvent::CommissionPaymentRecorded {
                commission_payment,
                recorded_at,
                ..
            } => {
                self.commission.payments.push(commission_payment);
                self.updated_at = Some(recorded_at);
            }

            SaleEvent::SaleStatusChanged { to, changed_at, .. } => {
                self.status = to;
                self.updated_at = Some(changed_at);
            }

            SaleEvent::SaleCancelled {
                reason,
                cancelled_at,
                ..
            } => {
                self.status = SaleStatus::Cancelled;
                self.cancellation_reason = Some(reason);
                self.updated_at = Some(cancelled_at);
            }
        }

        self.version += 1;
        self
    }
}

// =========================================================================
// Sale unit tests
// =========================================================================
