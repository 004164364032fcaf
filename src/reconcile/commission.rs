//! Commission Accrual Calculator
//!
//! Commission is earned against money the client has actually paid, never against
//! the nominal sale price.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::aggregate::{Aggregate, Sale};
use crate::domain::money::{self, clamp_non_negative, multiply_by_rate};
use crate::domain::{CommissionStatus, DomainError, PaymentPlanType, SaleStatus};

use super::ledger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommissionCalculator {
    default_rate: Decimal,
}

/// Commission figures for one sale
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommissionSummary {
    pub percentage: Decimal,
    /// salePrice × percentage; informational only
    pub nominal: Decimal,
    pub accrued: Decimal,
    pub paid: Decimal,
    pub payable: Decimal,
    pub status: CommissionStatus,
}

impl CommissionCalculator {
    pub fn new(default_rate: Decimal) -> Self {
        Self { default_rate }
    }

    pub fn default_rate(&self) -> Decimal {
        self.default_rate
    }

    /// Configured percentage, or the injected default for sales without one.
    pub fn rate(&self, sale: &Sale) -> Decimal {
        sale.commission().percentage.unwrap_or(self.default_rate)
    }

    /// Money the commission accrues against.
    ///
    /// Only FullPayment sales marked Completed use the sale price; every other
    /// sale accrues on the payment ledger even when administratively Completed.
    pub fn commission_base(&self, sale: &Sale) -> Decimal {
        if sale.status() == SaleStatus::Completed
            && sale.payment_plan_type() == PaymentPlanType::FullPayment
        {
            sale.sale_price()
        } else {
            ledger::ledger_paid(sale)
        }
    }

    pub fn nominal(&self, sale: &Sale) -> Decimal {
        multiply_by_rate(sale.sale_price(), self.rate(sale))
    }

    pub fn accrued(&self, sale: &Sale) -> Decimal {
        multiply_by_rate(self.commission_base(sale), self.rate(sale))
    }

    /// Signed sum of every commission entry; adjustments are stored negative.
    pub fn paid(&self, sale: &Sale) -> Decimal {
        money::sum(sale.commission().payments.iter().map(|p| p.amount))
    }

    pub fn payable(&self, sale: &Sale) -> Decimal {
        clamp_non_negative(self.accrued(sale) - self.paid(sale))
    }

    pub fn status(&self, sale: &Sale) -> CommissionStatus {
        status_for(self.paid(sale), self.accrued(sale))
    }

    pub fn summary(&self, sale: &Sale) -> CommissionSummary {
        let accrued = self.accrued(sale);
        let paid = self.paid(sale);
        CommissionSummary {
            percentage: self.rate(sale),
            nominal: self.nominal(sale),
            accrued,
            paid,
            payable: clamp_non_negative(accrued - paid),
            status: status_for(paid, accrued),
        }
    }

    /// Guard a disbursement of `amount` against the current payable commission.
    pub fn validate_disbursement(&self, sale: &Sale, amount: Decimal) -> Result<(), DomainError> {
        if amount <= Decimal::ZERO {
            return Err(DomainError::validation(
                "amount",
                "commission payment must be greater than zero",
            ));
        }
        if sale.status() == SaleStatus::Cancelled {
            return Err(DomainError::invalid_state(format!(
                "sale {} is cancelled; commission is frozen",
                sale.id()
            )));
        }

        let accrued = self.accrued(sale);
        let paid = self.paid(sale);
        let payable = clamp_non_negative(accrued - paid);
        if payable <= Decimal::ZERO {
            return Err(DomainError::NoAccrual { accrued, paid });
        }
        if amount > payable {
            return Err(DomainError::ExceedsAccrued {
                requested: amount,
                payable,
            });
        }
        Ok(())
    }

    /// Guard a corrective adjustment of `magnitude` (positive) against what was paid.
    pub fn validate_adjustment(
        &self,
        sale: &Sale,
        magnitude: Decimal,
        reason: &str,
    ) -> Result<(), DomainError> {
        if magnitude <= Decimal::ZERO {
            return Err(DomainError::validation(
                "amount",
                "adjustment amount must be greater than zero",
            ));
        }
        if reason.trim().is_empty() {
            return Err(DomainError::validation("reason", "adjustment requires a reason"));
        }
        if sale.status() == SaleStatus::Cancelled {
            return Err(DomainError::invalid_state(format!(
                "sale {} is cancelled; commission is frozen",
                sale.id()
            )));
        }
        let paid = self.paid(sale);
        if magnitude > paid {
            return Err(DomainError::invalid_state(format!(
                "adjustment of {} exceeds commission paid so far ({})",
                magnitude, paid
            )));
        }
        Ok(())
    }
}

fn status_for(paid: Decimal, accrued: Decimal) -> CommissionStatus {
    if paid <= Decimal::ZERO {
        CommissionStatus::Pending
    } else if paid >= accrued {
        CommissionStatus::Paid
    } else {
        CommissionStatus::Partial
    }
}
