//! Ledger error types.

use microbank_common::{CurrencyCode, Interrupted, MonetaryError, UserId};
use thiserror::Error;

use crate::balance::BalanceError;

/// Errors returned by [`BalanceStore`](crate::store::BalanceStore) implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("User not found")]
    UserNotFound,

    #[error("Currency not found: {0}")]
    CurrencyNotFound(CurrencyCode),

    #[error("Wallet not found for user {user_id} and currency {currency}")]
    WalletNotFound {
        user_id: UserId,
        currency: CurrencyCode,
    },

    /// Insert collided with an existing unique key.
    #[error("Unique constraint violation: {0}")]
    UniqueViolation(String),

    /// The locked rows no longer allow the change. Nothing was written.
    #[error("Balance check failed at commit: {0}")]
    Balance(#[from] BalanceError),

    /// I/O, connectivity or any other backend failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                return StoreError::UniqueViolation(db.message().to_string());
            }
        }
        StoreError::Storage(err.to_string())
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by the ledger engine.
///
/// Every variant except `Internal` is an expected outcome the caller can map to
/// a specific response. `Internal` carries no detail; the cause is logged where
/// it is produced.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LedgerError {
    #[error("user not found")]
    UserNotFound,

    #[error("currency code not found")]
    CurrencyNotFound,

    #[error("wallet not found")]
    WalletNotFound,

    #[error("not enough money on balance")]
    NotEnoughMoney,

    #[error("not enough currency on wallet")]
    NotEnoughCurrency,

    /// Zero amount, or an amount whose cost does not fit in a balance.
    #[error("invalid amount: {0}")]
    InvalidAmount(&'static str),

    #[error("request cancelled")]
    Cancelled,

    #[error("request deadline exceeded")]
    DeadlineExceeded,

    #[error("internal error")]
    Internal,
}

impl LedgerError {
    /// Get error code for the delivery layer.
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::UserNotFound => "USER_NOT_FOUND",
            LedgerError::CurrencyNotFound => "CURRENCY_NOT_FOUND",
            LedgerError::WalletNotFound => "WALLET_NOT_FOUND",
            LedgerError::NotEnoughMoney => "NOT_ENOUGH_MONEY",
            LedgerError::NotEnoughCurrency => "NOT_ENOUGH_CURRENCY",
            LedgerError::InvalidAmount(_) => "INVALID_AMOUNT",
            LedgerError::Cancelled => "CANCELLED",
            LedgerError::DeadlineExceeded => "DEADLINE_EXCEEDED",
            LedgerError::Internal => "INTERNAL_ERROR",
        }
    }

    /// Check if this error is caused by the request rather than the system.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            LedgerError::UserNotFound
                | LedgerError::CurrencyNotFound
                | LedgerError::NotEnoughMoney
                | LedgerError::NotEnoughCurrency
                | LedgerError::InvalidAmount(_)
        )
    }
}

impl From<Interrupted> for LedgerError {
    fn from(reason: Interrupted) -> Self {
        match reason {
            Interrupted::Cancelled => LedgerError::Cancelled,
            Interrupted::DeadlineExceeded => LedgerError::DeadlineExceeded,
        }
    }
}

impl From<BalanceError> for LedgerError {
    fn from(err: BalanceError) -> Self {
        match err {
            BalanceError::InsufficientCash { .. } => LedgerError::NotEnoughMoney,
            BalanceError::InsufficientCurrency { .. } => LedgerError::NotEnoughCurrency,
            BalanceError::Overflow => LedgerError::InvalidAmount("resulting balance overflows"),
        }
    }
}

impl From<MonetaryError> for LedgerError {
    fn from(err: MonetaryError) -> Self {
        match err {
            MonetaryError::Overflow => LedgerError::InvalidAmount("cost overflows"),
            _ => LedgerError::Internal,
        }
    }
}

/// Result type for engine operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_error_mapping() {
        let cash = BalanceError::InsufficientCash {
            required: 2,
            available: 1,
        };
        let currency = BalanceError::InsufficientCurrency {
            required: 2,
            available: 1,
        };

        assert_eq!(LedgerError::from(cash), LedgerError::NotEnoughMoney);
        assert_eq!(LedgerError::from(currency), LedgerError::NotEnoughCurrency);
        assert_eq!(
            LedgerError::from(BalanceError::Overflow).error_code(),
            "INVALID_AMOUNT"
        );
    }

    #[test]
    fn test_internal_error_is_opaque() {
        assert_eq!(LedgerError::Internal.to_string(), "internal error");
        assert!(!LedgerError::Internal.is_client_error());
        assert!(LedgerError::NotEnoughMoney.is_client_error());
    }

    #[test]
    fn test_interrupted_mapping() {
        assert_eq!(
            LedgerError::from(Interrupted::DeadlineExceeded),
            LedgerError::DeadlineExceeded
        );
    }
}
