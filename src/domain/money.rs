//! Money primitives
//!
//! Fixed-point helpers for currency amounts and percentages. Every value in the
//! ledger is a [`Decimal`]; binary floating point never touches a balance.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum accepted single amount (one trillion currency units)
const MAX_AMOUNT: &str = "1000000000000";

/// Smallest currency unit is the cent
const CENT_SCALE: u32 = 2;

/// Amount is a validated, strictly positive monetary value.
///
/// # Invariants
/// - Value is always positive (> 0)
/// - At most 2 decimal places
/// - At most one trillion
///
/// # Example
/// ```
/// use rust_decimal::Decimal;
/// use sale_ledger::domain::Amount;
///
/// let amount = Amount::new(Decimal::new(30_000_000, 2)).unwrap();
/// assert_eq!(amount.value(), Decimal::new(300_000, 0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(Decimal);

/// Errors that can occur when parsing or validating money
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("Amount must be positive (got {0})")]
    NotPositive(Decimal),

    #[error("Amount must not be negative (got {0})")]
    Negative(Decimal),

    #[error("Amount has too many decimal places (max {CENT_SCALE}, got {0})")]
    TooManyDecimals(u32),

    #[error("Amount exceeds maximum allowed value ({MAX_AMOUNT})")]
    Overflow,

    #[error("Invalid amount format: {0}")]
    ParseError(String),

    #[error("Percentage must be between 0 and 100 (got {0})")]
    PercentageOutOfRange(Decimal),
}

impl Amount {
    /// Create a new Amount with validation.
    ///
    /// # Errors
    /// - `AmountError::NotPositive` if value <= 0
    /// - `AmountError::TooManyDecimals` if finer than a cent
    /// - `AmountError::Overflow` if value > one trillion
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value <= Decimal::ZERO {
            return Err(AmountError::NotPositive(value));
        }
        check_bounds(value)?;
        Ok(Self(value.normalize()))
    }

    /// Get the underlying Decimal value.
    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Amount::new(parse_decimal(s)?)
    }
}

impl TryFrom<String> for Amount {
    type Error = AmountError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Amount::from_str(&value)
    }
}

impl From<Amount> for String {
    fn from(amount: Amount) -> Self {
        format!("{:.2}", amount.0)
    }
}

/// Percentage in the closed range 0..=100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Percentage(Decimal);

impl Percentage {
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
            return Err(AmountError::PercentageOutOfRange(value));
        }
        Ok(Self(value.normalize()))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

impl FromStr for Percentage {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Percentage::new(parse_decimal(s)?)
    }
}

impl TryFrom<String> for Percentage {
    type Error = AmountError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Percentage::from_str(&value)
    }
}

impl From<Percentage> for String {
    fn from(percentage: Percentage) -> Self {
        percentage.0.to_string()
    }
}

/// Parse a decimal from its string form. Only malformed input fails.
pub fn parse_decimal(s: &str) -> Result<Decimal, AmountError> {
    Decimal::from_str(s.trim()).map_err(|e| AmountError::ParseError(e.to_string()))
}

/// Parse a non-negative money value (prices, plan totals, deposits).
pub fn parse_non_negative(s: &str) -> Result<Decimal, AmountError> {
    let value = parse_decimal(s)?;
    if value < Decimal::ZERO {
        return Err(AmountError::Negative(value));
    }
    check_bounds(value)?;
    Ok(value)
}

/// Cent scale and the one-trillion ceiling, shared by every money input.
pub fn check_bounds(value: Decimal) -> Result<(), AmountError> {
    if value.normalize().scale() > CENT_SCALE {
        return Err(AmountError::TooManyDecimals(value.normalize().scale()));
    }
    let max = Decimal::from(1_000_000_000_000i64);
    if value.abs() > max {
        return Err(AmountError::Overflow);
    }
    Ok(())
}

pub fn add(a: Decimal, b: Decimal) -> Decimal {
    a + b
}

pub fn subtract(a: Decimal, b: Decimal) -> Decimal {
    a - b
}

/// `amount × percent / 100`, rounded half-up to the cent.
pub fn multiply_by_rate(amount: Decimal, percent: Decimal) -> Decimal {
    round_to_cents(amount * percent / Decimal::ONE_HUNDRED)
}

pub fn clamp_non_negative(value: Decimal) -> Decimal {
    value.max(Decimal::ZERO)
}

/// Round half-up (away from zero) to two decimal places.
pub fn round_to_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(CENT_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// `100 × part / total`, rounded to the cent; a zero total yields 0.
pub fn percentage_of(part: Decimal, total: Decimal) -> Decimal {
    if total.is_zero() {
        return Decimal::ZERO;
    }
    round_to_cents(part * Decimal::ONE_HUNDRED / total)
}

/// Sum an iterator of decimals.
pub fn sum<I: IntoIterator<Item = Decimal>>(values: I) -> Decimal {
    values.into_iter().fold(Decimal::ZERO, add)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount_positive() {
        let amount = Amount::new(dec!(100));
        assert!(amount.is_ok());
        assert_eq!(amount.unwrap().value(), dec!(100));
    }

    #[test]
    fn test_amount_zero_rejected() {
        assert!(matches!(Amount::new(Decimal::ZERO), Err(AmountError::NotPositive(_))));
    }

    #[test]
    fn test_amount_negative_rejected() {
        assert!(matches!(Amount::new(dec!(-100)), Err(AmountError::NotPositive(_))));
    }

    #[test]
    fn test_amount_sub_cent_rejected() {
        assert!(matches!(Amount::new(dec!(0.001)), Err(AmountError::TooManyDecimals(3))));
    }

    #[test]
    fn test_amount_trailing_zeros_accepted() {
        // 10.500 is still a whole number of cents
        let amount = Amount::new(dec!(10.500)).unwrap();
        assert_eq!(amount.value(), dec!(10.5));
    }

    #[test]
    fn test_amount_overflow() {
        assert!(matches!(Amount::new(dec!(1000000000000.01)), Err(AmountError::Overflow)));
        assert!(Amount::new(dec!(1000000000000)).is_ok());
    }

    #[test]
    fn test_amount_from_str() {
        let amount: Amount = "300000.00".parse().unwrap();
        assert_eq!(amount.value(), dec!(300000));
        assert!(matches!("abc".parse::<Amount>(), Err(AmountError::ParseError(_))));
    }

    #[test]
    fn test_amount_serde_as_string() {
        let amount = Amount::new(dec!(1250.5)).unwrap();
        assert_eq!(serde_json::to_string(&amount).unwrap(), r#""1250.50""#);
        let back: Amount = serde_json::from_str(r#""1250.50""#).unwrap();
        assert_eq!(back, amount);
    }

    #[test]
    fn test_percentage_bounds() {
        assert!(Percentage::new(dec!(0)).is_ok());
        assert!(Percentage::new(dec!(100)).is_ok());
        assert!(Percentage::new(dec!(100.01)).is_err());
        assert!(Percentage::new(dec!(-1)).is_err());
    }

    #[test]
    fn test_multiply_by_rate_rounds_half_up() {
        assert_eq!(multiply_by_rate(dec!(500000), dec!(5)), dec!(25000));
        // 0.05 * 10.10 = 0.505 -> 0.51
        assert_eq!(multiply_by_rate(dec!(10.10), dec!(5)), dec!(0.51));
        // 0.05 * 10.30 = 0.515 -> 0.52
        assert_eq!(multiply_by_rate(dec!(10.30), dec!(5)), dec!(0.52));
    }

    #[test]
    fn test_percentage_of_zero_total() {
        assert_eq!(percentage_of(dec!(10), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(percentage_of(dec!(500000), dec!(1000000)), dec!(50));
    }

    #[test]
    fn test_clamp_and_round() {
        assert_eq!(clamp_non_negative(dec!(-3)), Decimal::ZERO);
        assert_eq!(clamp_non_negative(dec!(3)), dec!(3));
        assert_eq!(round_to_cents(dec!(2.345)), dec!(2.35));
        assert_eq!(round_to_cents(dec!(-2.345)), dec!(-2.35));
    }

    #[test]
    fn test_many_small_payments_do_not_drift() {
        let total = sum(std::iter::repeat(dec!(0.1)).take(1000));
        assert_eq!(total, dec!(100));
    }

    #[test]
    fn test_parse_non_negative() {
        assert_eq!(parse_non_negative("0").unwrap(), Decimal::ZERO);
        assert!(matches!(parse_non_negative("-5"), Err(AmountError::Negative(_))));
    }
}
