//! Sale statement
//!
//! The read model handed to list views and reports: one call, one snapshot.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::aggregate::{Aggregate, Sale};
use crate::domain::{PaymentPlanType, PlanStatus, SaleStatus};

use super::commission::CommissionSummary;
use super::plan::{self, PlanStatusDisplay};
use super::statistics::SaleStatistics;
use super::EnginePolicy;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanStatement {
    pub plan_id: Uuid,
    pub total_amount: Decimal,
    pub outstanding_balance: Decimal,
    pub next_payment_due: Option<DateTime<Utc>>,
    pub status: PlanStatus,
    pub display: PlanStatusDisplay,
    pub is_overdue: bool,
    pub payment_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaleStatement {
    pub sale_id: Uuid,
    pub unit_reference: String,
    pub quantity: u32,
    pub payment_plan_type: PaymentPlanType,
    pub status: SaleStatus,
    pub version: i64,
    pub statistics: SaleStatistics,
    pub plans: Vec<PlanStatement>,
    pub commission: CommissionSummary,
    pub as_of: DateTime<Utc>,
}

impl SaleStatement {
    pub fn build(sale: &Sale, policy: &EnginePolicy, as_of: DateTime<Utc>) -> Self {
        let plans = sale
            .plans()
            .iter()
            .map(|p| PlanStatement {
                plan_id: p.id,
                total_amount: p.total_amount,
                outstanding_balance: p.outstanding_balance,
                next_payment_due: p.next_payment_due,
                status: p.status,
                display: plan::plan_status_display(p, as_of, policy.overdue_after_days),
                is_overdue: plan::is_overdue(p, as_of, policy.overdue_after_days),
                payment_count: p.payments.len(),
            })
            .collect();

        Self {
            sale_id: sale.id(),
            unit_reference: sale.unit_reference().to_string(),
            quantity: sale.quantity(),
            payment_plan_type: sale.payment_plan_type(),
            status: sale.status(),
            version: sale.version(),
            statistics: SaleStatistics::compute(sale),
            plans,
            commission: policy.commission_calculator().summary(sale),
            as_of,
        }
    }

    pub fn has_warnings(&self) -> bool {
        self.plans.iter().any(|p| p.display.is_warning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PaymentStatus;
    use crate::reconcile::fixtures::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    #[test]
    fn test_statement_combines_views() {
        let (sale, plan_id) = installment_sale(dec!(1000000), Some(dec!(5)));
        let sale = pay_plan(sale, plan_id, payment(dec!(300000), PaymentStatus::Completed, 0));
        let sale = pay_plan(sale, plan_id, payment(dec!(200000), PaymentStatus::Completed, 0));

        let statement = SaleStatement::build(&sale, &EnginePolicy::default(), t0() + Duration::days(45));

        assert_eq!(statement.sale_id, sale.id());
        assert_eq!(statement.statistics.paid_percentage, dec!(50));
        assert_eq!(statement.commission.accrued, dec!(25000));
        assert_eq!(statement.plans.len(), 1);
        assert!(statement.plans[0].is_overdue);
        assert_eq!(statement.plans[0].display.label, "Overdue");
        assert!(statement.has_warnings());
    }

    #[test]
    fn test_statement_serializes_decimals_as_strings() {
        let sale = full_payment_sale(dec!(1500.50), None);
        let statement = SaleStatement::build(&sale, &EnginePolicy::default(), t0());
        let json = serde_json::to_value(&statement).unwrap();

        assert_eq!(json["statistics"]["total_amount"], "1500.50");
        assert_eq!(json["status"], "reservation");
    }
}
