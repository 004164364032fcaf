//! Payment Ledger
//!
//! Resolves which payment list is authoritative for a sale and totals it by status.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::aggregate::{Aggregate, Sale};
use crate::domain::money::{self, clamp_non_negative};
use crate::domain::{DomainError, Payment, PaymentPlan, PaymentStatus, PlanStatus, SaleStatus};

/// The payment source of truth for a sale.
///
/// Resolution order: plan payments, then direct payments, then the legacy
/// scalar `amountPaid`. A source only counts once it holds at least one payment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PaymentSource<'a> {
    Plans(&'a [PaymentPlan]),
    Direct(&'a [Payment]),
    Legacy(Decimal),
    Empty,
}

impl<'a> PaymentSource<'a> {
    pub fn resolve(sale: &'a Sale) -> Self {
        if sale.plans().iter().any(|plan| !plan.payments.is_empty()) {
            PaymentSource::Plans(sale.plans())
        } else if !sale.payments().is_empty() {
            PaymentSource::Direct(sale.payments())
        } else if let Some(legacy) = sale.legacy_amount_paid() {
            PaymentSource::Legacy(legacy)
        } else {
            PaymentSource::Empty
        }
    }

    fn total_with_status(&self, status: PaymentStatus) -> Decimal {
        match self {
            PaymentSource::Plans(plans) => money::sum(
                plans
                    .iter()
                    .flat_map(|plan| plan.payments.iter())
                    .filter(|p| p.status == status)
                    .map(|p| p.amount),
            ),
            PaymentSource::Direct(payments) => sum_with_status(payments, status),
            PaymentSource::Legacy(amount) if status == PaymentStatus::Completed => *amount,
            PaymentSource::Legacy(_) | PaymentSource::Empty => Decimal::ZERO,
        }
    }
}

pub(crate) fn sum_with_status(payments: &[Payment], status: PaymentStatus) -> Decimal {
    money::sum(
        payments
            .iter()
            .filter(|p| p.status == status)
            .map(|p| p.amount),
    )
}

/// Completed money according to the payment events alone (no status shortcut).
pub fn ledger_paid(sale: &Sale) -> Decimal {
    PaymentSource::resolve(sale).total_with_status(PaymentStatus::Completed)
}

/// Amount the client has paid.
///
/// A Completed sale reports its full price; otherwise completed payments from the
/// resolved source, then the legacy scalar, then zero.
pub fn amount_paid(sale: &Sale) -> Decimal {
    if sale.status() == SaleStatus::Completed {
        return sale.sale_price();
    }
    ledger_paid(sale)
}

pub fn total_pending(sale: &Sale) -> Decimal {
    PaymentSource::resolve(sale).total_with_status(PaymentStatus::Pending)
}

pub fn total_refunded(sale: &Sale) -> Decimal {
    PaymentSource::resolve(sale).total_with_status(PaymentStatus::Refunded)
}

/// Balance still owed on direct payments; never negative.
pub fn direct_outstanding(sale: &Sale) -> Decimal {
    clamp_non_negative(
        sale.sale_price() - sum_with_status(sale.payments(), PaymentStatus::Completed),
    )
}

/// Where a payment lives inside the sale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentLocation {
    Direct(usize),
    Plan { plan: usize, payment: usize },
}

pub fn locate_payment(sale: &Sale, payment_id: Uuid) -> Option<PaymentLocation> {
    if let Some(idx) = sale.payments().iter().position(|p| p.id == payment_id) {
        return Some(PaymentLocation::Direct(idx));
    }
    sale.plans().iter().enumerate().find_map(|(plan_idx, plan)| {
        plan.payments
            .iter()
            .position(|p| p.id == payment_id)
            .map(|payment_idx| PaymentLocation::Plan {
                plan: plan_idx,
                payment: payment_idx,
            })
    })
}

pub fn find_payment(sale: &Sale, payment_id: Uuid) -> Option<(Option<&PaymentPlan>, &Payment)> {
    match locate_payment(sale, payment_id)? {
        PaymentLocation::Direct(idx) => Some((None, &sale.payments()[idx])),
        PaymentLocation::Plan { plan, payment } => {
            let plan = &sale.plans()[plan];
            Some((Some(plan), &plan.payments[payment]))
        }
    }
}

/// Sale-level guard for anything that moves client money.
pub fn ensure_accepts_payments(sale: &Sale) -> Result<(), DomainError> {
    match sale.status() {
        SaleStatus::Cancelled => Err(DomainError::invalid_state(format!(
            "sale {} is cancelled; no further payments are accepted",
            sale.id()
        ))),
        SaleStatus::Completed => Err(DomainError::invalid_state(format!(
            "sale {} is completed; no further payments are accepted",
            sale.id()
        ))),
        _ => Ok(()),
    }
}

/// Check that `amount` may be recorded against the target (plan or sale).
///
/// Overpayment is rejected outright: the amount must not exceed the current
/// outstanding balance of the target.
pub fn validate_payment_target(
    sale: &Sale,
    plan_id: Option<Uuid>,
    amount: Decimal,
) -> Result<(), DomainError> {
    if amount <= Decimal::ZERO {
        return Err(DomainError::validation("amount", "amount must be greater than zero"));
    }
    ensure_accepts_payments(sale)?;

    match plan_id {
        Some(plan_id) => {
            let plan = sale
                .plan(plan_id)
                .ok_or(DomainError::PlanNotFound(plan_id))?;
            if plan.status == PlanStatus::Completed {
                return Err(DomainError::invalid_state(format!(
                    "payment plan {} is already completed",
                    plan_id
                )));
            }
            if amount > plan.outstanding_balance {
                return Err(DomainError::invalid_state(format!(
                    "payment of {} exceeds outstanding plan balance of {}",
                    amount, plan.outstanding_balance
                )));
            }
        }
        None => {
            if !sale.plans().is_empty() {
                return Err(DomainError::invalid_state(
                    "sale has payment plans; payments must target a plan",
                ));
            }
            if sale.payments().is_empty() && sale.legacy_amount_paid().is_some() {
                return Err(DomainError::invalid_state(
                    "sale only carries a legacy paid amount; cancel it and import the record \
                     with its payment history under a new sale id",
                ));
            }
            let outstanding = direct_outstanding(sale);
            if amount > outstanding {
                return Err(DomainError::invalid_state(format!(
                    "payment of {} exceeds outstanding balance of {}",
                    amount, outstanding
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Sale;
    use crate::domain::{PaymentPlanType, SaleEvent};
    use crate::reconcile::fixtures::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_plan_payments_are_the_source() {
        let (sale, plan_id) = installment_sale(dec!(1000000), None);
        let sale = pay_plan(sale, plan_id, payment(dec!(300000), PaymentStatus::Completed, 1));
        let sale = pay_plan(sale, plan_id, payment(dec!(200000), PaymentStatus::Completed, 2));
        let sale = pay_plan(sale, plan_id, payment(dec!(50000), PaymentStatus::Pending, 3));

        assert!(matches!(PaymentSource::resolve(&sale), PaymentSource::Plans(_)));
        assert_eq!(amount_paid(&sale), dec!(500000));
        assert_eq!(total_pending(&sale), dec!(50000));
        assert_eq!(total_refunded(&sale), Decimal::ZERO);
    }

    #[test]
    fn test_direct_payments_when_no_plan() {
        let sale = full_payment_sale(dec!(250000), None);
        let sale = pay_direct(sale, payment(dec!(100000), PaymentStatus::Completed, 0));
        let sale = pay_direct(sale, payment(dec!(20000), PaymentStatus::Refunded, 0));

        assert!(matches!(PaymentSource::resolve(&sale), PaymentSource::Direct(_)));
        assert_eq!(amount_paid(&sale), dec!(100000));
        assert_eq!(total_refunded(&sale), dec!(20000));
        assert_eq!(direct_outstanding(&sale), dec!(150000));
    }

    #[test]
    fn test_legacy_scalar_fallback() {
        let sale = Sale::default().apply(SaleEvent::SaleCreated {
            sale_id: Uuid::new_v4(),
            unit_reference: "LEGACY-7".to_string(),
            quantity: 1,
            sale_price: dec!(90000),
            payment_plan_type: PaymentPlanType::FullPayment,
            commission_percentage: None,
            agent_id: None,
            legacy_amount_paid: Some(dec!(40000)),
            created_at: t0(),
        });

        assert_eq!(PaymentSource::resolve(&sale), PaymentSource::Legacy(dec!(40000)));
        assert_eq!(amount_paid(&sale), dec!(40000));
        assert_eq!(total_pending(&sale), Decimal::ZERO);
    }

    #[test]
    fn test_empty_sale_has_paid_nothing() {
        let sale = full_payment_sale(dec!(90000), None);
        assert_eq!(PaymentSource::resolve(&sale), PaymentSource::Empty);
        assert_eq!(amount_paid(&sale), Decimal::ZERO);
    }

    #[test]
    fn test_completed_sale_reports_full_price() {
        let sale = full_payment_sale(dec!(90000), None);
        let sale = pay_direct(sale, payment(dec!(10000), PaymentStatus::Completed, 0));
        let sale = with_status(sale, crate::domain::SaleStatus::Completed);

        assert_eq!(amount_paid(&sale), dec!(90000));
        assert_eq!(ledger_paid(&sale), dec!(10000));
    }

    #[test]
    fn test_overpayment_rejected_on_plan() {
        let (sale, plan_id) = installment_sale(dec!(1000), None);
        let sale = pay_plan(sale, plan_id, payment(dec!(900), PaymentStatus::Completed, 0));

        assert!(validate_payment_target(&sale, Some(plan_id), dec!(100)).is_ok());
        assert!(matches!(
            validate_payment_target(&sale, Some(plan_id), dec!(100.01)),
            Err(DomainError::InvalidState(_))
        ));
    }

    #[test]
    fn test_direct_payment_rejected_when_plans_exist() {
        let (sale, _) = installment_sale(dec!(1000), None);
        assert!(matches!(
            validate_payment_target(&sale, None, dec!(10)),
            Err(DomainError::InvalidState(_))
        ));
    }

    #[test]
    fn test_non_positive_amount_is_validation_error() {
        let sale = full_payment_sale(dec!(1000), None);
        assert!(matches!(
            validate_payment_target(&sale, None, Decimal::ZERO),
            Err(DomainError::Validation { .. })
        ));
    }

    #[test]
    fn test_unknown_plan() {
        let (sale, _) = installment_sale(dec!(1000), None);
        let missing = Uuid::new_v4();
        assert_eq!(
            validate_payment_target(&sale, Some(missing), dec!(10)),
            Err(DomainError::PlanNotFound(missing))
        );
    }

    #[test]
    fn test_locate_payment() {
        let (sale, plan_id) = installment_sale(dec!(1000), None);
        let p = payment(dec!(10), PaymentStatus::Completed, 0);
        let payment_id = p.id;
        let sale = pay_plan(sale, plan_id, p);

        assert_eq!(
            locate_payment(&sale, payment_id),
            Some(PaymentLocation::Plan { plan: 0, payment: 0 })
        );
        let (plan, found) = find_payment(&sale, payment_id).unwrap();
        assert_eq!(plan.map(|p| p.id), Some(plan_id));
        assert_eq!(found.amount, dec!(10));
        assert!(locate_payment(&sale, Uuid::new_v4()).is_none());
    }
}
