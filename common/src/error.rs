//! Error types shared across MicroBank crates.

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors from monetary parsing and arithmetic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MonetaryError {
    /// Currency code is not three ASCII letters.
    #[error("Invalid currency code: {0:?}")]
    InvalidCurrencyCode(String),

    /// Rate is zero or negative.
    #[error("Rate must be positive, got {0}")]
    NonPositiveRate(Decimal),

    /// Rate rounds down to zero cents per unit.
    #[error("Rate {0} is below one cent per unit")]
    SubCentRate(Decimal),

    /// Rate text could not be parsed as a decimal.
    #[error("Malformed rate: {0:?}")]
    MalformedRate(String),

    /// Integer arithmetic overflowed.
    #[error("Amount overflow")]
    Overflow,
}

/// Why a request stopped before completing.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,

    /// The request deadline passed.
    #[error("request deadline exceeded")]
    DeadlineExceeded,
}
