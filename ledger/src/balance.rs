//! Balance arithmetic.
//!
//! These functions are the only place new balances are computed. The engine
//! runs them against the balances it read to reject a request early, and the
//! store runs them again against the locked rows right before writing, so a
//! concurrent change between the two reads can never produce a negative
//! balance.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A rejected balance change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BalanceError {
    /// Cash balance does not cover the debit.
    #[error("Insufficient cash: required {required}, available {available}")]
    InsufficientCash { required: u64, available: u64 },

    /// Wallet balance does not cover the sale.
    #[error("Insufficient currency: required {required}, available {available}")]
    InsufficientCurrency { required: u64, available: u64 },

    /// The credited balance would not fit in a `u64`.
    #[error("Balance overflow")]
    Overflow,
}

/// Change to a user's cash balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CashChange {
    /// Deposit.
    Credit(u64),
    /// Withdrawal.
    Debit(u64),
}

impl CashChange {
    /// Compute the balance after this change.
    pub fn apply(self, balance: u64) -> Result<u64, BalanceError> {
        match self {
            CashChange::Credit(amount) => balance.checked_add(amount).ok_or(BalanceError::Overflow),
            CashChange::Debit(amount) => {
                balance
                    .checked_sub(amount)
                    .ok_or(BalanceError::InsufficientCash {
                        required: amount,
                        available: balance,
                    })
            }
        }
    }
}

/// Direction of a currency exchange, from the user's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeDirection {
    /// Cash into wallet.
    Buy,
    /// Wallet into cash.
    Sell,
}

/// Cash and wallet balances of one user/currency pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balances {
    pub cash: u64,
    pub wallet: u64,
}

/// A buy or sell of `cost` cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeChange {
    pub direction: ExchangeDirection,
    pub cost: u64,
}

impl ExchangeChange {
    pub fn buy(cost: u64) -> Self {
        Self {
            direction: ExchangeDirection::Buy,
            cost,
        }
    }

    pub fn sell(cost: u64) -> Self {
        Self {
            direction: ExchangeDirection::Sell,
            cost,
        }
    }

    /// Compute the balances after this change. Cash and wallet move by the
    /// same amount in opposite directions.
    pub fn apply(&self, current: Balances) -> Result<Balances, BalanceError> {
        match self.direction {
            ExchangeDirection::Buy => {
                let cash = current.cash.checked_sub(self.cost).ok_or(
                    BalanceError::InsufficientCash {
                        required: self.cost,
                        available: current.cash,
                    },
                )?;
                let wallet = current
                    .wallet
                    .checked_add(self.cost)
                    .ok_or(BalanceError::Overflow)?;
                Ok(Balances { cash, wallet })
            }
            ExchangeDirection::Sell => {
                let wallet = current.wallet.checked_sub(self.cost).ok_or(
                    BalanceError::InsufficientCurrency {
                        required: self.cost,
                        available: current.wallet,
                    },
                )?;
                let cash = current
                    .cash
                    .checked_add(self.cost)
                    .ok_or(BalanceError::Overflow)?;
                Ok(Balances { cash, wallet })
            }
        }
    }
}
