//! Reconciliation engine
//!
//! Pure derivations over a [`Sale`](crate::aggregate::Sale) snapshot: amounts paid,
//! plan balances and overdue state, commission accrual, sale statistics.
//! Nothing here performs I/O, so every read can run against any consistent snapshot.

pub mod commission;
pub mod ledger;
pub mod plan;
pub mod statement;
pub mod statistics;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use commission::{CommissionCalculator, CommissionSummary};
pub use ledger::PaymentSource;
pub use plan::PlanStatusDisplay;
pub use statement::{PlanStatement, SaleStatement};
pub use statistics::SaleStatistics;

/// Default agent rate (percent) for sales without an explicit commission percentage
pub const DEFAULT_COMMISSION_RATE_PERCENT: i64 = 5;

/// Days without a completed payment before an undated plan counts as overdue
pub const DEFAULT_OVERDUE_AFTER_DAYS: i64 = 30;

/// Tunables injected into the calculator and tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnginePolicy {
    pub default_commission_rate: Decimal,
    pub overdue_after_days: i64,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            default_commission_rate: Decimal::from(DEFAULT_COMMISSION_RATE_PERCENT),
            overdue_after_days: DEFAULT_OVERDUE_AFTER_DAYS,
        }
    }
}

impl EnginePolicy {
    pub fn commission_calculator(&self) -> CommissionCalculator {
        CommissionCalculator::new(self.default_commission_rate)
    }
}
