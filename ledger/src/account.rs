//! Rows the ledger reads and writes.

use microbank_common::{CurrencyCode, CurrencyId, UserId, WalletId};
use serde::{Deserialize, Serialize};

/// A bank user as seen by the ledger.
///
/// Identity fields (password hash, names) belong to the identity subsystem and
/// are not loaded here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Stable row id.
    pub id: UserId,
    /// Unique lookup key.
    pub email: String,
    /// Cash balance in cents.
    pub balance: u64,
}

/// Reference row for a supported currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    pub id: CurrencyId,
    pub code: CurrencyCode,
}

/// A user's holding of one currency.
///
/// The balance is kept in cash-equivalent cents: buying moves the paid cost
/// into the wallet, selling moves the same cost back out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub user_id: UserId,
    pub currency: CurrencyCode,
    pub balance: u64,
}

/// Wallet listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletBalance {
    pub currency: CurrencyCode,
    pub balance: u64,
}
