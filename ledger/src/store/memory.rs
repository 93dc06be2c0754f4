//! In-process balance store.
//!
//! All tables sit behind one write lock, so every mutation is serialized.
//! Writes go through [`MemoryTx`], which restores the previous values when it
//! is dropped without [`MemoryTx::commit`]. Fault injection hooks let tests
//! fail a transaction between its two writes.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use microbank_common::{CurrencyCode, CurrencyId, UserId, WalletId};
use parking_lot::{RwLock, RwLockWriteGuard};
use tracing::debug;

use crate::account::{Currency, User, Wallet, WalletBalance};
use crate::balance::{Balances, CashChange, ExchangeChange};
use crate::error::{StoreError, StoreResult};
use crate::store::BalanceStore;

type WalletKey = (UserId, CurrencyId);

#[derive(Debug, Clone)]
struct WalletRow {
    id: WalletId,
    balance: u64,
}

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    currencies: BTreeMap<CurrencyCode, CurrencyId>,
    users: HashMap<UserId, User>,
    emails: HashMap<String, UserId>,
    wallets: HashMap<WalletKey, WalletRow>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn currency_id(&self, code: &CurrencyCode) -> StoreResult<CurrencyId> {
        self.currencies
            .get(code)
            .copied()
            .ok_or_else(|| StoreError::CurrencyNotFound(code.clone()))
    }

    fn wallet_key(&self, user_id: UserId, code: &CurrencyCode) -> StoreResult<WalletKey> {
        let key = (user_id, self.currency_id(code)?);
        if self.wallets.contains_key(&key) {
            Ok(key)
        } else {
            Err(StoreError::WalletNotFound {
                user_id,
                currency: code.clone(),
            })
        }
    }

    fn user_balance(&self, user_id: UserId) -> StoreResult<u64> {
        self.users
            .get(&user_id)
            .map(|u| u.balance)
            .ok_or(StoreError::UserNotFound)
    }

    fn insert_wallet(&mut self, key: WalletKey) {
        if !self.wallets.contains_key(&key) {
            let id = WalletId::new(self.next_id());
            self.wallets.insert(key, WalletRow { id, balance: 0 });
        }
    }
}

enum Undo {
    UserBalance(UserId, u64),
    WalletBalance(WalletKey, u64),
}

/// Write scope over the tables. Rolls back on drop unless committed.
struct MemoryTx<'a> {
    tables: RwLockWriteGuard<'a, Tables>,
    undo: Vec<Undo>,
    committed: bool,
}

impl<'a> MemoryTx<'a> {
    fn begin(tables: RwLockWriteGuard<'a, Tables>) -> Self {
        Self {
            tables,
            undo: Vec::new(),
            committed: false,
        }
    }

    fn set_user_balance(&mut self, user_id: UserId, balance: u64) -> StoreResult<()> {
        let user = self
            .tables
            .users
            .get_mut(&user_id)
            .ok_or(StoreError::UserNotFound)?;
        self.undo.push(Undo::UserBalance(user_id, user.balance));
        user.balance = balance;
        Ok(())
    }

    fn set_wallet_balance(&mut self, key: WalletKey, balance: u64) -> StoreResult<()> {
        let wallet = self
            .tables
            .wallets
            .get_mut(&key)
            .ok_or_else(|| StoreError::Storage("wallet row vanished".to_string()))?;
        self.undo.push(Undo::WalletBalance(key, wallet.balance));
        wallet.balance = balance;
        Ok(())
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for MemoryTx<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        while let Some(undo) = self.undo.pop() {
            match undo {
                Undo::UserBalance(id, balance) => {
                    if let Some(user) = self.tables.users.get_mut(&id) {
                        user.balance = balance;
                    }
                }
                Undo::WalletBalance(key, balance) => {
                    if let Some(wallet) = self.tables.wallets.get_mut(&key) {
                        wallet.balance = balance;
                    }
                }
            }
        }
    }
}

/// Balance store kept in process memory.
#[derive(Default)]
pub struct MemoryBalanceStore {
    tables: RwLock<Tables>,
    fail_next_read: AtomicBool,
    fail_next_wallet_write: AtomicBool,
}

impl MemoryBalanceStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with the given currencies already seeded.
    pub fn with_currencies(codes: impl IntoIterator<Item = CurrencyCode>) -> Self {
        let store = Self::new();
        {
            let mut tables = store.tables.write();
            for code in codes {
                let id = CurrencyId::new(tables.next_id());
                tables.currencies.entry(code).or_insert(id);
            }
        }
        store
    }

    /// Make the next user lookup fail with a storage error.
    pub fn fail_next_read(&self) {
        self.fail_next_read.store(true, Ordering::SeqCst);
    }

    /// Make the next exchange fail after the cash row was written and before
    /// the wallet row is.
    pub fn fail_next_wallet_write(&self) {
        self.fail_next_wallet_write.store(true, Ordering::SeqCst);
    }

    /// Drop a wallet row, breaking the one-wallet-per-currency invariant.
    pub fn remove_wallet(&self, user_id: UserId, code: &CurrencyCode) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let key = tables.wallet_key(user_id, code)?;
        tables.wallets.remove(&key);
        Ok(())
    }

    /// All currencies in the reference table.
    pub fn currencies(&self) -> Vec<Currency> {
        self.tables
            .read()
            .currencies
            .iter()
            .map(|(code, id)| Currency {
                id: *id,
                code: code.clone(),
            })
            .collect()
    }

    fn apply_cash(&self, user_id: UserId, change: CashChange) -> StoreResult<u64> {
        let mut tx = MemoryTx::begin(self.tables.write());
        let current = tx.tables.user_balance(user_id)?;
        let next = change.apply(current)?;
        tx.set_user_balance(user_id, next)?;
        tx.commit();
        Ok(next)
    }

    fn apply_exchange(
        &self,
        user_id: UserId,
        code: &CurrencyCode,
        change: ExchangeChange,
    ) -> StoreResult<Balances> {
        let mut tx = MemoryTx::begin(self.tables.write());
        let cash = tx.tables.user_balance(user_id)?;
        let key = tx.tables.wallet_key(user_id, code)?;
        let wallet = tx.tables.wallets[&key].balance;

        let next = change.apply(Balances { cash, wallet })?;

        tx.set_user_balance(user_id, next.cash)?;
        if self.fail_next_wallet_write.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Storage("injected wallet write failure".to_string()));
        }
        tx.set_wallet_balance(key, next.wallet)?;
        tx.commit();
        Ok(next)
    }

    fn create_user(&self, email: &str, balance: u64) -> StoreResult<UserId> {
        let mut tables = self.tables.write();
        if tables.emails.contains_key(email) {
            return Err(StoreError::UniqueViolation(format!(
                "users.email {email} already exists"
            )));
        }

        let id = UserId::new(tables.next_id());
        tables.users.insert(
            id,
            User {
                id,
                email: email.to_string(),
                balance,
            },
        );
        tables.emails.insert(email.to_string(), id);

        let currency_ids: Vec<CurrencyId> = tables.currencies.values().copied().collect();
        for currency_id in currency_ids {
            tables.insert_wallet((id, currency_id));
        }

        debug!(user_id = %id, "User created");
        Ok(id)
    }
}

#[async_trait]
impl BalanceStore for MemoryBalanceStore {
    async fn get_user(&self, email: &str) -> StoreResult<User> {
        if self.fail_next_read.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Storage("injected read failure".to_string()));
        }
        let tables = self.tables.read();
        tables
            .emails
            .get(email)
            .and_then(|id| tables.users.get(id))
            .cloned()
            .ok_or(StoreError::UserNotFound)
    }

    async fn get_wallet(&self, user_id: UserId, currency: &CurrencyCode) -> StoreResult<Wallet> {
        let tables = self.tables.read();
        let key = tables.wallet_key(user_id, currency)?;
        let row = &tables.wallets[&key];
        Ok(Wallet {
            id: row.id,
            user_id,
            currency: currency.clone(),
            balance: row.balance,
        })
    }

    async fn wallets(&self, user_id: UserId) -> StoreResult<Vec<WalletBalance>> {
        let tables = self.tables.read();
        if !tables.users.contains_key(&user_id) {
            return Err(StoreError::UserNotFound);
        }
        // BTreeMap iteration keeps code order.
        Ok(tables
            .currencies
            .iter()
            .filter_map(|(code, currency_id)| {
                tables
                    .wallets
                    .get(&(user_id, *currency_id))
                    .map(|row| WalletBalance {
                        currency: code.clone(),
                        balance: row.balance,
                    })
            })
            .collect())
    }

    async fn update_cash_balance(&self, user_id: UserId, change: CashChange) -> StoreResult<u64> {
        self.apply_cash(user_id, change)
    }

    async fn update_exchange(
        &self,
        user_id: UserId,
        currency: &CurrencyCode,
        change: ExchangeChange,
    ) -> StoreResult<Balances> {
        self.apply_exchange(user_id, currency, change)
    }

    async fn create_user_with_wallets(&self, email: &str, balance: u64) -> StoreResult<UserId> {
        self.create_user(email, balance)
    }

    async fn delete_user(&self, user_id: UserId) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let user = tables
            .users
            .remove(&user_id)
            .ok_or(StoreError::UserNotFound)?;
        tables.emails.remove(&user.email);
        tables.wallets.retain(|(owner, _), _| *owner != user_id);
        Ok(())
    }

    async fn seed_currencies(&self, codes: &[CurrencyCode]) -> StoreResult<()> {
        let mut tables = self.tables.write();
        for code in codes {
            if tables.currencies.contains_key(code) {
                continue;
            }
            let currency_id = CurrencyId::new(tables.next_id());
            tables.currencies.insert(code.clone(), currency_id);

            let user_ids: Vec<UserId> = tables.users.keys().copied().collect();
            for user_id in user_ids {
                tables.insert_wallet((user_id, currency_id));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryBalanceStore {
        MemoryBalanceStore::with_currencies([
            CurrencyCode::rub(),
            CurrencyCode::eur(),
            CurrencyCode::cny(),
        ])
    }

    #[tokio::test]
    async fn test_create_user_with_wallets() {
        let store = store();
        let id = store
            .create_user_with_wallets("a@example.com", 1000)
            .await
            .unwrap();

        let user = store.get_user("a@example.com").await.unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.balance, 1000);

        let wallets = store.wallets(id).await.unwrap();
        let codes: Vec<&str> = wallets.iter().map(|w| w.currency.as_str()).collect();
        assert_eq!(codes, ["CNY", "EUR", "RUB"]);
        assert!(wallets.iter().all(|w| w.balance == 0));
    }

    #[tokio::test]
    async fn test_duplicate_email() {
        let store = store();
        store.create_user_with_wallets("a@example.com", 0).await.unwrap();

        let result = store.create_user_with_wallets("a@example.com", 0).await;

        assert!(matches!(result, Err(StoreError::UniqueViolation(_))));
    }

    #[tokio::test]
    async fn test_exchange_rechecks_locked_balance() {
        let store = store();
        let id = store.create_user_with_wallets("a@example.com", 100).await.unwrap();

        let result = store
            .update_exchange(id, &CurrencyCode::eur(), ExchangeChange::buy(111))
            .await;

        assert!(matches!(result, Err(StoreError::Balance(_))));
        assert_eq!(store.get_user("a@example.com").await.unwrap().balance, 100);
    }

    #[tokio::test]
    async fn test_injected_failure_rolls_back_cash_write() {
        let store = store();
        let id = store.create_user_with_wallets("a@example.com", 1000).await.unwrap();
        store.fail_next_wallet_write();

        let result = store
            .update_exchange(id, &CurrencyCode::eur(), ExchangeChange::buy(222))
            .await;

        assert!(matches!(result, Err(StoreError::Storage(_))));
        assert_eq!(store.get_user("a@example.com").await.unwrap().balance, 1000);
        assert_eq!(
            store.get_wallet(id, &CurrencyCode::eur()).await.unwrap().balance,
            0
        );
    }

    #[tokio::test]
    async fn test_missing_rows() {
        let store = store();
        let id = store.create_user_with_wallets("a@example.com", 0).await.unwrap();
        let usd = CurrencyCode::parse("USD").unwrap();

        assert!(matches!(
            store.get_wallet(id, &usd).await,
            Err(StoreError::CurrencyNotFound(_))
        ));

        store.remove_wallet(id, &CurrencyCode::eur()).unwrap();
        assert!(matches!(
            store.get_wallet(id, &CurrencyCode::eur()).await,
            Err(StoreError::WalletNotFound { .. })
        ));
        assert!(matches!(
            store.get_user("nobody@example.com").await,
            Err(StoreError::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn test_seeding_adds_wallets_for_existing_users() {
        let store = MemoryBalanceStore::with_currencies([CurrencyCode::eur()]);
        let id = store.create_user_with_wallets("a@example.com", 0).await.unwrap();

        store
            .seed_currencies(&[CurrencyCode::eur(), CurrencyCode::cny()])
            .await
            .unwrap();

        assert_eq!(store.currencies().len(), 2);
        assert_eq!(store.wallets(id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_user() {
        let store = store();
        let id = store.create_user_with_wallets("a@example.com", 0).await.unwrap();

        store.delete_user(id).await.unwrap();

        assert!(matches!(
            store.get_user("a@example.com").await,
            Err(StoreError::UserNotFound)
        ));
        assert!(matches!(
            store.delete_user(id).await,
            Err(StoreError::UserNotFound)
        ));
    }
}
