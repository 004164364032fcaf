//! Payment Plan Tracker
//!
//! Balance recomputation, overdue detection and display state for installment plans.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::money::clamp_non_negative;
use crate::domain::{Payment, PaymentPlan, PaymentStatus, PlanStatus};

use super::ledger::sum_with_status;

/// Append a payment to the plan and recompute its balance and status.
pub fn apply_payment(plan: &mut PaymentPlan, payment: Payment) {
    plan.payments.push(payment);
    recompute(plan, false);
}

/// Recompute `outstanding_balance` from the completed payments.
///
/// A Completed plan stays Completed unless `reopen` is set; refunds are the only
/// caller that reopens.
pub fn recompute(plan: &mut PaymentPlan, reopen: bool) {
    let completed = sum_with_status(&plan.payments, PaymentStatus::Completed);
    plan.outstanding_balance = clamp_non_negative(plan.total_amount - completed);

    if plan.status == PlanStatus::Completed && !reopen {
        return;
    }

    plan.status = if plan.outstanding_balance.is_zero() {
        PlanStatus::Completed
    } else if plan.payments.is_empty() {
        PlanStatus::Pending
    } else {
        PlanStatus::Active
    };
}

fn last_completed_payment(plan: &PaymentPlan) -> Option<DateTime<Utc>> {
    plan.payments
        .iter()
        .filter(|p| p.status == PaymentStatus::Completed)
        .map(|p| p.payment_date)
        .max()
}

/// Whether the plan is overdue at `as_of`.
///
/// With a due date set the due date decides. Without one, the plan needs a
/// reference point: a completed payment older than `overdue_after_days` while a
/// balance remains.
pub fn is_overdue(plan: &PaymentPlan, as_of: DateTime<Utc>, overdue_after_days: i64) -> bool {
    if plan.status == PlanStatus::Completed {
        return false;
    }

    match plan.next_payment_due {
        Some(due) => as_of > due,
        None => match last_completed_payment(plan) {
            Some(last) => {
                as_of - last > Duration::days(overdue_after_days)
                    && plan.outstanding_balance > Decimal::ZERO
            }
            None => false,
        },
    }
}

/// Badge shown next to a plan in list views
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanStatusDisplay {
    pub label: &'static str,
    pub is_warning: bool,
}

pub fn plan_status_display(
    plan: &PaymentPlan,
    as_of: DateTime<Utc>,
    overdue_after_days: i64,
) -> PlanStatusDisplay {
    if plan.status == PlanStatus::Completed {
        return PlanStatusDisplay {
            label: "Completed",
            is_warning: false,
        };
    }
    if is_overdue(plan, as_of, overdue_after_days) {
        return PlanStatusDisplay {
            label: "Overdue",
            is_warning: true,
        };
    }
    let label = match plan.status {
        PlanStatus::Active => "Active",
        _ => "Pending",
    };
    PlanStatusDisplay {
        label,
        is_warning: false,
    }
}
