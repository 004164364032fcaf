use rust_decimal::Decimal;
use serde::Serialize;

use crate::aggregate::Sale;
use crate::domain::money::percentage_of;

use super::ledger;

/// Headline figures for a sale
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaleStatistics {
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub pending_amount: Decimal,
    /// total − paid − pending; negative means the sale was overpaid
    pub remaining_amount: Decimal,
    pub paid_percentage: Decimal,
}

impl SaleStatistics {
    pub fn compute(sale: &Sale) -> Self {
        let total_amount = sale.sale_price();
        let paid_amount = ledger::amount_paid(sale);
        let pending_amount = ledger::total_pending(sale);

        Self {
            total_amount,
            paid_amount,
            pending_amount,
            remaining_amount: total_amount - paid_amount - pending_amount,
            paid_percentage: percentage_of(paid_amount, total_amount),
        }
    }

    pub fn is_overpaid(&self) -> bool {
        self.remaining_amount < Decimal::ZERO
    }
}
