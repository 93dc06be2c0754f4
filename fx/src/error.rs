//! FX error types.

use microbank_common::{CurrencyCode, Interrupted, MonetaryError};
use thiserror::Error;

/// Errors that can occur while resolving a rate.
#[derive(Debug, Error)]
pub enum FxError {
    /// Currency is outside the supported set.
    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(CurrencyCode),

    /// Cache backend failed or is unreachable.
    #[error("Rate cache error: {0}")]
    Cache(String),

    /// Quote source is unreachable or answered with an error status.
    #[error("Quote source error: {0}")]
    QuoteSource(String),

    /// Quote source answered with data that cannot be used as a rate.
    #[error("Malformed quote for {currency}: {reason}")]
    MalformedQuote {
        currency: CurrencyCode,
        reason: String,
    },

    /// Resolved price is not a usable rate.
    #[error("Invalid rate: {0}")]
    InvalidRate(#[from] MonetaryError),

    /// Request was cancelled or timed out.
    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

/// Result type for FX operations.
pub type FxResult<T> = Result<T, FxError>;
