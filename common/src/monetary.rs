//! Monetary types for MicroBank.
//!
//! Cash and wallet balances are kept as integer cents (`u64`). Rates arrive as
//! decimals and are converted to integer cents exactly once, in
//! [`Rate::cents_per_unit`]; everything after that is checked integer math.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::MonetaryError;

/// Number of cash-equivalent units (cents) in one major unit.
pub const CENTS_PER_UNIT: u64 = 100;

/// Three-letter currency code, always upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    /// Parse and normalize a currency code.
    pub fn parse(code: &str) -> Result<Self, MonetaryError> {
        let code = code.trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(MonetaryError::InvalidCurrencyCode(code.to_string()));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    /// Get the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn rub() -> Self {
        Self("RUB".to_string())
    }

    pub fn eur() -> Self {
        Self("EUR".to_string())
    }

    pub fn cny() -> Self {
        Self("CNY".to_string())
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CurrencyCode {
    type Err = MonetaryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = MonetaryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CurrencyCode> for String {
    fn from(code: CurrencyCode) -> Self {
        code.0
    }
}

/// Price of one unit of a currency, in major cash units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rate(Decimal);

impl Rate {
    /// Create a rate; the price must be strictly positive.
    pub fn new(price: Decimal) -> Result<Self, MonetaryError> {
        if price <= Decimal::ZERO {
            return Err(MonetaryError::NonPositiveRate(price));
        }
        Ok(Self(price))
    }

    /// The decimal price.
    pub fn price(&self) -> Decimal {
        self.0
    }

    /// Price of one unit in whole cents, rounded down.
    ///
    /// A rate below one cent per unit would make purchases free and is
    /// rejected.
    pub fn cents_per_unit(&self) -> Result<u64, MonetaryError> {
        let cents = self
            .0
            .checked_mul(Decimal::from(CENTS_PER_UNIT))
            .ok_or(MonetaryError::Overflow)?
            .floor();

        match cents.to_u64() {
            Some(0) => Err(MonetaryError::SubCentRate(self.0)),
            Some(cents) => Ok(cents),
            None => Err(MonetaryError::Overflow),
        }
    }

    /// Total cost in cents of `units` whole units.
    pub fn cost_of(&self, units: u64) -> Result<u64, MonetaryError> {
        self.cents_per_unit()?
            .checked_mul(units)
            .ok_or(MonetaryError::Overflow)
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Rate {
    type Err = MonetaryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let price = Decimal::from_str(s.trim())
            .map_err(|_| MonetaryError::MalformedRate(s.to_string()))?;
        Self::new(price)
    }
}

/// Render cents as a major-unit amount with two decimals, e.g. `778` → `"7.78"`.
pub fn format_cents(cents: u64) -> String {
    format!("{}.{:02}", cents / CENTS_PER_UNIT, cents % CENTS_PER_UNIT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_currency_code_normalization() {
        assert_eq!(CurrencyCode::parse("eur").unwrap(), CurrencyCode::eur());
        assert_eq!(CurrencyCode::parse(" RUB ").unwrap().as_str(), "RUB");
    }

    #[test]
    fn test_currency_code_rejects_garbage() {
        assert!(CurrencyCode::parse("").is_err());
        assert!(CurrencyCode::parse("EURO").is_err());
        assert!(CurrencyCode::parse("E1R").is_err());
    }

    #[test]
    fn test_cents_per_unit_floors() {
        assert_eq!(Rate::new(dec!(1.11)).unwrap().cents_per_unit().unwrap(), 111);
        assert_eq!(Rate::new(dec!(0.14)).unwrap().cents_per_unit().unwrap(), 14);
        assert_eq!(Rate::new(dec!(0.999)).unwrap().cents_per_unit().unwrap(), 99);
        assert_eq!(Rate::new(dec!(0.011)).unwrap().cents_per_unit().unwrap(), 1);
    }

    #[test]
    fn test_cost_of() {
        let rate = Rate::new(dec!(1.11)).unwrap();
        assert_eq!(rate.cost_of(2).unwrap(), 222);
        assert_eq!(rate.cost_of(0).unwrap(), 0);
        assert!(matches!(rate.cost_of(u64::MAX), Err(MonetaryError::Overflow)));
    }

    #[test]
    fn test_rate_validation() {
        assert!(matches!(
            Rate::new(Decimal::ZERO),
            Err(MonetaryError::NonPositiveRate(_))
        ));
        assert!(matches!(
            Rate::new(dec!(0.001)).unwrap().cents_per_unit(),
            Err(MonetaryError::SubCentRate(_))
        ));
    }

    #[test]
    fn test_rate_parse() {
        assert_eq!("1.11".parse::<Rate>().unwrap().price(), dec!(1.11));
        assert!(matches!(
            "abc".parse::<Rate>(),
            Err(MonetaryError::MalformedRate(_))
        ));
        assert!("-2".parse::<Rate>().is_err());
    }

    #[test]
    fn test_format_cents() {
        assert_eq!(format_cents(778), "7.78");
        assert_eq!(format_cents(5), "0.05");
        assert_eq!(format_cents(100_000), "1000.00");
    }
}
