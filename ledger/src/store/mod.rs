//! Transactional persistence boundary for balances.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use microbank_common::{CurrencyCode, UserId};

use crate::account::{User, Wallet, WalletBalance};
use crate::balance::{Balances, CashChange, ExchangeChange};
use crate::error::StoreResult;

pub use memory::MemoryBalanceStore;
pub use postgres::PgBalanceStore;

/// Storage for users, wallets and the currency reference table.
///
/// Mutating operations lock the rows they touch, recompute the new balances
/// from the locked values, and either write every row or none. Each call runs
/// in its own transaction; dropping the returned future before it resolves
/// leaves no partial effect.
#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// Look up a user by email.
    async fn get_user(&self, email: &str) -> StoreResult<User>;

    /// Look up the wallet of `user_id` for `currency`.
    async fn get_wallet(&self, user_id: UserId, currency: &CurrencyCode) -> StoreResult<Wallet>;

    /// All wallets of a user, ordered by currency code.
    async fn wallets(&self, user_id: UserId) -> StoreResult<Vec<WalletBalance>>;

    /// Apply `change` to the user's cash balance and return the new balance.
    async fn update_cash_balance(&self, user_id: UserId, change: CashChange) -> StoreResult<u64>;

    /// Apply `change` to the user's cash balance and wallet in one transaction
    /// and return the committed balances.
    async fn update_exchange(
        &self,
        user_id: UserId,
        currency: &CurrencyCode,
        change: ExchangeChange,
    ) -> StoreResult<Balances>;

    /// Insert a user and one zero-balance wallet per known currency.
    async fn create_user_with_wallets(&self, email: &str, balance: u64) -> StoreResult<UserId>;

    /// Remove a user together with their wallets.
    async fn delete_user(&self, user_id: UserId) -> StoreResult<()>;

    /// Make sure every code exists in the currency table. Existing rows are kept.
    async fn seed_currencies(&self, codes: &[CurrencyCode]) -> StoreResult<()>;
}
