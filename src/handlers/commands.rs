//! Command definitions
//!
//! Commands represent intentions to change a sale. Amounts travel as strings
//! and are parsed into exact decimals before any rule runs.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{ImportedSale, NewCommissionPayment, NewPayment, NewPaymentPlan, NewSale};
use crate::domain::money::{parse_decimal, parse_non_negative};
use crate::domain::{
    Amount, DomainError, Payment, PaymentMethod, PaymentPlanType, PaymentStatus, Percentage,
    SaleStatus,
};

fn parse_amount(field: &str, raw: &str) -> Result<Amount, DomainError> {
    raw.parse().map_err(|e| DomainError::amount(field, e))
}

fn parse_optional_non_negative(field: &str, raw: Option<&str>) -> Result<Decimal, DomainError> {
    match raw {
        Some(raw) => parse_non_negative(raw).map_err(|e| DomainError::amount(field, e)),
        None => Ok(Decimal::ZERO),
    }
}

fn parse_percentage(raw: Option<&str>) -> Result<Option<Percentage>, DomainError> {
    raw.map(|p| p.parse().map_err(|e| DomainError::amount("commission_percentage", e)))
        .transpose()
}

// =========================================================================
// CreateSale
// =========================================================================

/// Open a new sale in Reservation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSaleCommand {
    #[serde(default)]
    pub sale_id: Option<Uuid>,
    pub unit_reference: String,
    pub quantity: u32,
    pub sale_price: String,
    pub payment_plan_type: PaymentPlanType,
    #[serde(default)]
    pub commission_percentage: Option<String>,
    #[serde(default)]
    pub agent_id: Option<Uuid>,
}

impl CreateSaleCommand {
    pub fn new(unit_reference: &str, sale_price: &str, payment_plan_type: PaymentPlanType) -> Self {
        Self {
            sale_id: None,
            unit_reference: unit_reference.to_string(),
            quantity: 1,
            sale_price: sale_price.to_string(),
            payment_plan_type,
            commission_percentage: None,
            agent_id: None,
        }
    }

    pub fn with_commission(mut self, percentage: &str, agent_id: Option<Uuid>) -> Self {
        self.commission_percentage = Some(percentage.to_string());
        self.agent_id = agent_id;
        self
    }

    pub fn into_input(self) -> Result<NewSale, DomainError> {
        let sale_price =
            parse_non_negative(&self.sale_price).map_err(|e| DomainError::amount("sale_price", e))?;
        Ok(NewSale {
            sale_id: self.sale_id.unwrap_or_else(Uuid::new_v4),
            unit_reference: self.unit_reference,
            quantity: self.quantity,
            sale_price,
            payment_plan_type: self.payment_plan_type,
            commission_percentage: parse_percentage(self.commission_percentage.as_deref())?,
            agent_id: self.agent_id,
            legacy_amount_paid: None,
        })
    }
}

// =========================================================================
// ImportLegacySale
// =========================================================================

/// Monetary value as legacy records carry it: a string or a bare JSON number
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LegacyAmount {
    Text(String),
    Number(serde_json::Number),
}

impl LegacyAmount {
    fn as_text(&self) -> String {
        match self {
            LegacyAmount::Text(s) => s.clone(),
            LegacyAmount::Number(n) => n.to_string(),
        }
    }

    fn to_decimal(&self, field: &str) -> Result<Decimal, DomainError> {
        parse_decimal(&self.as_text()).map_err(|e| DomainError::amount(field, e))
    }

    /// Price or scalar total: held to the same bounds as any other money input
    fn to_money(&self, field: &str) -> Result<Decimal, DomainError> {
        parse_non_negative(&self.as_text()).map_err(|e| DomainError::amount(field, e))
    }

    fn to_payment_amount(&self, field: &str) -> Result<Decimal, DomainError> {
        self.as_text()
            .parse::<Amount>()
            .map(|a| a.value())
            .map_err(|e| DomainError::amount(field, e))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyPayment {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub amount: LegacyAmount,
    #[serde(default, alias = "paymentDate", alias = "date")]
    pub payment_date: Option<DateTime<Utc>>,
    #[serde(default, alias = "paymentMethod")]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub status: Option<PaymentStatus>,
    #[serde(default, alias = "transactionReference")]
    pub transaction_reference: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LegacySaleData {
    #[serde(default)]
    pub payments: Option<Vec<LegacyPayment>>,
}

/// The payment history of a legacy record, resolved to exactly one source
#[derive(Debug, Clone, PartialEq)]
pub enum LegacyPaymentHistory {
    Payments(Vec<Payment>),
    AmountPaid(Decimal),
    Empty,
}

/// Ingest a sale from a legacy record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportLegacySaleCommand {
    #[serde(default)]
    pub sale_id: Option<Uuid>,
    #[serde(alias = "unitReference")]
    pub unit_reference: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(alias = "salePrice")]
    pub sale_price: LegacyAmount,
    #[serde(alias = "paymentPlanType")]
    pub payment_plan_type: PaymentPlanType,
    #[serde(default)]
    pub status: Option<SaleStatus>,
    #[serde(default, alias = "commissionPercentage")]
    pub commission_percentage: Option<LegacyAmount>,
    #[serde(default, alias = "agentId")]
    pub agent_id: Option<Uuid>,

    // the three historical shapes of "what has been paid"
    #[serde(default)]
    pub payments: Option<Vec<LegacyPayment>>,
    #[serde(default, rename = "saleData", alias = "sale_data")]
    pub sale_data: Option<LegacySaleData>,
    #[serde(default, rename = "amountPaid", alias = "amount_paid")]
    pub amount_paid: Option<LegacyAmount>,
}

fn default_quantity() -> u32 {
    1
}

impl ImportLegacySaleCommand {
    /// Pick one source: top-level `payments`, then `saleData.payments`, then `amountPaid`
    pub fn resolve_history(&self, now: DateTime<Utc>) -> Result<LegacyPaymentHistory, DomainError> {
        let list = self
            .payments
            .as_ref()
            .filter(|p| !p.is_empty())
            .or_else(|| {
                self.sale_data
                    .as_ref()
                    .and_then(|d| d.payments.as_ref())
                    .filter(|p| !p.is_empty())
            });

        if let Some(list) = list {
            let payments = list
                .iter()
                .enumerate()
                .map(|(idx, p)| -> Result<Payment, DomainError> {
                    Ok(Payment {
                        id: p.id.unwrap_or_else(Uuid::new_v4),
                        amount: p.amount.to_payment_amount(&format!("payments[{}].amount", idx))?,
                        payment_date: p.payment_date.unwrap_or(now),
                        payment_method: p.payment_method.unwrap_or_default(),
                        status: p.status.unwrap_or(PaymentStatus::Completed),
                        transaction_reference: p.transaction_reference.clone(),
                        notes: p.notes.clone(),
                        recorded_by: None,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(LegacyPaymentHistory::Payments(payments));
        }

        match &self.amount_paid {
            Some(amount) => Ok(LegacyPaymentHistory::AmountPaid(amount.to_money("amount_paid")?)),
            None => Ok(LegacyPaymentHistory::Empty),
        }
    }

    pub fn into_input(self, now: DateTime<Utc>) -> Result<ImportedSale, DomainError> {
        let history = self.resolve_history(now)?;
        let commission_percentage = match &self.commission_percentage {
            Some(raw) => Some(
                Percentage::new(raw.to_decimal("commission_percentage")?)
                    .map_err(|e| DomainError::amount("commission_percentage", e))?,
            ),
            None => None,
        };

        let (payments, legacy_amount_paid) = match history {
            LegacyPaymentHistory::Payments(payments) => (payments, None),
            LegacyPaymentHistory::AmountPaid(amount) => (Vec::new(), Some(amount)),
            LegacyPaymentHistory::Empty => (Vec::new(), None),
        };

        Ok(ImportedSale {
            sale: NewSale {
                sale_id: self.sale_id.unwrap_or_else(Uuid::new_v4),
                unit_reference: self.unit_reference,
                quantity: self.quantity,
                sale_price: self.sale_price.to_money("sale_price")?,
                payment_plan_type: self.payment_plan_type,
                commission_percentage,
                agent_id: self.agent_id,
                legacy_amount_paid,
            },
            status: self.status.unwrap_or(SaleStatus::Reservation),
            payments,
        })
    }
}

// =========================================================================
// Payment plans
// =========================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddPaymentPlanCommand {
    #[serde(default)]
    pub plan_id: Option<Uuid>,
    pub total_amount: String,
    #[serde(default)]
    pub initial_deposit: Option<String>,
    #[serde(default)]
    pub installment_amount: Option<String>,
    #[serde(default)]
    pub next_payment_due: Option<DateTime<Utc>>,
}

impl AddPaymentPlanCommand {
    pub fn new(total_amount: &str) -> Self {
        Self {
            plan_id: None,
            total_amount: total_amount.to_string(),
            initial_deposit: None,
            installment_amount: None,
            next_payment_due: None,
        }
    }

    pub fn into_input(self) -> Result<NewPaymentPlan, DomainError> {
        Ok(NewPaymentPlan {
            plan_id: self.plan_id.unwrap_or_else(Uuid::new_v4),
            total_amount: parse_amount("total_amount", &self.total_amount)?,
            initial_deposit: parse_optional_non_negative(
                "initial_deposit",
                self.initial_deposit.as_deref(),
            )?,
            installment_amount: parse_optional_non_negative(
                "installment_amount",
                self.installment_amount.as_deref(),
            )?,
            next_payment_due: self.next_payment_due,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleNextPaymentDueCommand {
    /// `None` clears the due date
    #[serde(default)]
    pub next_payment_due: Option<DateTime<Utc>>,
}

// =========================================================================
// Client payments
// =========================================================================

/// Record a client payment; `plan_id` targets a plan, otherwise the sale itself
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordPaymentCommand {
    #[serde(default)]
    pub plan_id: Option<Uuid>,
    pub amount: String,
    #[serde(default)]
    pub payment_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub status: Option<PaymentStatus>,
    #[serde(default)]
    pub transaction_reference: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl RecordPaymentCommand {
    pub fn new(amount: &str) -> Self {
        Self {
            plan_id: None,
            amount: amount.to_string(),
            payment_date: None,
            payment_method: None,
            status: None,
            transaction_reference: None,
            notes: None,
        }
    }

    pub fn for_plan(mut self, plan_id: Uuid) -> Self {
        self.plan_id = Some(plan_id);
        self
    }

    pub fn pending(mut self) -> Self {
        self.status = Some(PaymentStatus::Pending);
        self
    }

    pub fn into_input(self) -> Result<(Option<Uuid>, NewPayment), DomainError> {
        let payment = NewPayment {
            payment_id: Uuid::new_v4(),
            amount: parse_amount("amount", &self.amount)?,
            payment_date: self.payment_date,
            payment_method: self.payment_method.unwrap_or_default(),
            status: self.status,
            transaction_reference: self.transaction_reference,
            notes: self.notes,
        };
        Ok((self.plan_id, payment))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundPaymentCommand {
    pub reason: String,
    #[serde(default)]
    pub reopen_plan: bool,
}

// =========================================================================
// Commission
// =========================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordCommissionPaymentCommand {
    pub amount: String,
    #[serde(default)]
    pub payment_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    /// Defaults to the sale's agent
    #[serde(default)]
    pub paid_to: Option<Uuid>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl RecordCommissionPaymentCommand {
    pub fn new(amount: &str) -> Self {
        Self {
            amount: amount.to_string(),
            payment_date: None,
            payment_method: None,
            paid_to: None,
            reference: None,
            notes: None,
        }
    }

    pub fn into_input(self) -> Result<NewCommissionPayment, DomainError> {
        Ok(NewCommissionPayment {
            payment_id: Uuid::new_v4(),
            amount: parse_amount("amount", &self.amount)?,
            payment_date: self.payment_date,
            payment_method: self.payment_method.unwrap_or_default(),
            paid_to: self.paid_to,
            reference: self.reference,
            notes: self.notes,
        })
    }
}

/// Claw back part of what was disbursed; `amount` is the positive magnitude
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommissionAdjustmentCommand {
    pub amount: String,
    pub reason: String,
}

impl CommissionAdjustmentCommand {
    pub fn parsed_amount(&self) -> Result<Amount, DomainError> {
        parse_amount("amount", &self.amount)
    }
}

// =========================================================================
// Status
// =========================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionStatusCommand {
    pub status: SaleStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelSaleCommand {
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn legacy(body: serde_json::Value) -> ImportLegacySaleCommand {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_legacy_amounts_are_bounded() {
        let result = legacy(json!({
            "unit_reference": "OLD-9",
            "sale_price": "79228162514264337593543950335",
            "payment_plan_type": "full_payment",
            "commission_percentage": "5"
        }))
        .into_input(now());
        assert!(matches!(
            result,
            Err(DomainError::Validation { field, .. }) if field == "sale_price"
        ));

        let result = legacy(json!({
            "unit_reference": "OLD-9",
            "sale_price": "1000",
            "payment_plan_type": "full_payment",
            "payments": [{ "amount": "0.001" }]
        }))
        .resolve_history(now());
        assert!(matches!(
            result,
            Err(DomainError::Validation { field, .. }) if field == "payments[0].amount"
        ));

        let result = legacy(json!({
            "unit_reference": "OLD-9",
            "sale_price": 1000,
            "payment_plan_type": "full_payment",
            "amountPaid": "2000000000000"
        }))
        .resolve_history(now());
        assert!(matches!(
            result,
            Err(DomainError::Validation { field, .. }) if field == "amount_paid"
        ));
    }

    #[test]
    fn test_create_sale_command_parses_amounts() {
        let input = CreateSaleCommand::new("A-101", "1000000.00", PaymentPlanType::Installment)
            .with_commission("5", None)
            .into_input()
            .unwrap();
        assert_eq!(input.sale_price, dec!(1000000));
        assert_eq!(input.commission_percentage.unwrap().value(), dec!(5));
    }

    #[test]
    fn test_create_sale_command_rejects_bad_percentage() {
        let result = CreateSaleCommand::new("A-101", "100", PaymentPlanType::FullPayment)
            .with_commission("150", None)
            .into_input();
        assert!(matches!(
            result,
            Err(DomainError::Validation { field, .. }) if field == "commission_percentage"
        ));
    }

    #[test]
    fn test_record_payment_command_rejects_non_numeric() {
        let result = RecordPaymentCommand::new("12abc").into_input();
        assert!(matches!(result, Err(DomainError::Validation { .. })));

        let result = RecordPaymentCommand::new("0").into_input();
        assert!(matches!(result, Err(DomainError::Validation { .. })));
    }

    #[test]
    fn test_legacy_top_level_payments_win() {
        let cmd = legacy(json!({
            "unitReference": "OLD-1",
            "salePrice": 500000,
            "paymentPlanType": "full_payment",
            "payments": [{ "amount": "1000.50" }],
            "saleData": { "payments": [{ "amount": 99 }] },
            "amountPaid": "42"
        }));

        match cmd.resolve_history(now()).unwrap() {
            LegacyPaymentHistory::Payments(p) => {
                assert_eq!(p.len(), 1);
                assert_eq!(p[0].amount, dec!(1000.50));
                assert_eq!(p[0].status, PaymentStatus::Completed);
                assert_eq!(p[0].payment_date, now());
            }
            other => panic!("expected payments, got {:?}", other),
        }
    }

    #[test]
    fn test_legacy_nested_payments() {
        let cmd = legacy(json!({
            "unit_reference": "OLD-2",
            "sale_price": "300000",
            "payment_plan_type": "installment",
            "saleData": { "payments": [{ "amount": 150000, "status": "pending" }] }
        }));

        let input = cmd.into_input(now()).unwrap();
        assert_eq!(input.payments.len(), 1);
        assert_eq!(input.payments[0].amount, dec!(150000));
        assert_eq!(input.payments[0].status, PaymentStatus::Pending);
        assert_eq!(input.sale.legacy_amount_paid, None);
    }

    #[test]
    fn test_legacy_scalar_amount_paid() {
        let cmd = legacy(json!({
            "unitReference": "OLD-3",
            "salePrice": "800000",
            "paymentPlanType": "full_payment",
            "status": "agreement",
            "amountPaid": 200000
        }));

        let input = cmd.into_input(now()).unwrap();
        assert!(input.payments.is_empty());
        assert_eq!(input.sale.legacy_amount_paid, Some(dec!(200000)));
        assert_eq!(input.status, SaleStatus::Agreement);
    }

    #[test]
    fn test_legacy_without_history() {
        let cmd = legacy(json!({
            "unitReference": "OLD-4",
            "salePrice": "10",
            "paymentPlanType": "full_payment",
            "payments": []
        }));
        assert_eq!(cmd.resolve_history(now()).unwrap(), LegacyPaymentHistory::Empty);
    }

    #[test]
    fn test_legacy_malformed_amount() {
        let cmd = legacy(json!({
            "unitReference": "OLD-5",
            "salePrice": "10",
            "paymentPlanType": "full_payment",
            "amountPaid": "ten"
        }));
        assert!(matches!(
            cmd.resolve_history(now()),
            Err(DomainError::Validation { field, .. }) if field == "amount_paid"
        ));
    }
}
