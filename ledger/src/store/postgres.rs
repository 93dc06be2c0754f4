//! PostgreSQL balance store.

use std::time::Duration;

use async_trait::async_trait;
use microbank_common::{CurrencyCode, UserId, WalletId};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Executor, Postgres, Transaction};
use tracing::{debug, info, instrument};

use crate::account::{User, Wallet, WalletBalance};
use crate::balance::{Balances, CashChange, ExchangeChange};
use crate::error::{StoreError, StoreResult};
use crate::store::BalanceStore;

/// Balance store backed by a PostgreSQL connection pool.
///
/// Balances are `BIGINT` columns with a `CHECK (balance >= 0)` constraint.
/// Mutations take row locks with `SELECT ... FOR UPDATE` in a fixed order
/// (user row, then wallet row), so concurrent requests for the same user queue
/// instead of deadlocking. Every balance transaction sets `lock_timeout` and
/// `statement_timeout`, so a commit stuck behind another one fails with a
/// storage error instead of waiting forever.
#[derive(Debug, Clone)]
pub struct PgBalanceStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgBalanceStore {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Set how long a transaction waits for a row lock or a single statement.
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Open a pool against `url`.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await?;
        info!(max_connections, "Database pool opened");
        Ok(Self::new(pool))
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        info!("Database migrations applied");
        Ok(())
    }

    /// Start a transaction bounded by the configured timeouts.
    async fn begin(&self) -> StoreResult<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        // Simple-query protocol, so both statements run in one round trip.
        (&mut *tx)
            .execute(timeout_statement(self.lock_timeout).as_str())
            .await?;
        Ok(tx)
    }

    async fn lock_user(tx: &mut Transaction<'_, Postgres>, user_id: UserId) -> StoreResult<u64> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT balance FROM users WHERE id = $1 FOR UPDATE")
                .bind(user_id.get())
                .fetch_optional(&mut **tx)
                .await?;
        let (balance,) = row.ok_or(StoreError::UserNotFound)?;
        to_cents(balance)
    }

    async fn lock_wallet(
        tx: &mut Transaction<'_, Postgres>,
        user_id: UserId,
        currency: &CurrencyCode,
    ) -> StoreResult<(WalletId, u64)> {
        let currency_id = currency_id(&mut **tx, currency).await?;
        let row: Option<(i64, i64)> = sqlx::query_as(
            "SELECT id, balance FROM wallets \
             WHERE user_id = $1 AND currency_id = $2 FOR UPDATE",
        )
        .bind(user_id.get())
        .bind(currency_id)
        .fetch_optional(&mut **tx)
        .await?;
        let (id, balance) = row.ok_or_else(|| StoreError::WalletNotFound {
            user_id,
            currency: currency.clone(),
        })?;
        Ok((WalletId::new(id), to_cents(balance)?))
    }
}

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// `SET LOCAL` does not take bind parameters; the values are plain integers.
fn timeout_statement(timeout: Duration) -> String {
    let ms = timeout.as_millis().clamp(1, i32::MAX as u128);
    format!("SET LOCAL lock_timeout = {ms}; SET LOCAL statement_timeout = {ms}")
}

async fn currency_id<'e, E>(executor: E, currency: &CurrencyCode) -> StoreResult<i64>
where
    E: sqlx::PgExecutor<'e>,
{
    let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM currencies WHERE code = $1")
        .bind(currency.as_str())
        .fetch_optional(executor)
        .await?;
    row.map(|(id,)| id)
        .ok_or_else(|| StoreError::CurrencyNotFound(currency.clone()))
}

fn to_cents(value: i64) -> StoreResult<u64> {
    u64::try_from(value).map_err(|_| StoreError::Storage(format!("negative balance {value} in storage")))
}

fn to_column(value: u64) -> StoreResult<i64> {
    i64::try_from(value).map_err(|_| StoreError::Storage(format!("balance {value} exceeds column range")))
}

#[async_trait]
impl BalanceStore for PgBalanceStore {
    #[instrument(skip(self))]
    async fn get_user(&self, email: &str) -> StoreResult<User> {
        let row: Option<(i64, String, i64)> =
            sqlx::query_as("SELECT id, email, balance FROM users WHERE email = $1")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;
        let (id, email, balance) = row.ok_or(StoreError::UserNotFound)?;
        Ok(User {
            id: UserId::new(id),
            email,
            balance: to_cents(balance)?,
        })
    }

    #[instrument(skip(self), fields(user_id = %user_id, currency = %currency))]
    async fn get_wallet(&self, user_id: UserId, currency: &CurrencyCode) -> StoreResult<Wallet> {
        let currency_id = currency_id(&self.pool, currency).await?;
        let row: Option<(i64, i64)> = sqlx::query_as(
            "SELECT id, balance FROM wallets WHERE user_id = $1 AND currency_id = $2",
        )
        .bind(user_id.get())
        .bind(currency_id)
        .fetch_optional(&self.pool)
        .await?;
        let (id, balance) = row.ok_or_else(|| StoreError::WalletNotFound {
            user_id,
            currency: currency.clone(),
        })?;
        Ok(Wallet {
            id: WalletId::new(id),
            user_id,
            currency: currency.clone(),
            balance: to_cents(balance)?,
        })
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn wallets(&self, user_id: UserId) -> StoreResult<Vec<WalletBalance>> {
        let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE id = $1")
            .bind(user_id.get())
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(StoreError::UserNotFound);
        }

        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT c.code, w.balance FROM wallets w \
             JOIN currencies c ON c.id = w.currency_id \
             WHERE w.user_id = $1 ORDER BY c.code",
        )
        .bind(user_id.get())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(code, balance)| {
                let currency = CurrencyCode::parse(&code)
                    .map_err(|e| StoreError::Storage(format!("bad currency row: {e}")))?;
                Ok(WalletBalance {
                    currency,
                    balance: to_cents(balance)?,
                })
            })
            .collect()
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn update_cash_balance(&self, user_id: UserId, change: CashChange) -> StoreResult<u64> {
        let mut tx = self.begin().await?;

        let current = Self::lock_user(&mut tx, user_id).await?;
        let next = change.apply(current)?;

        sqlx::query("UPDATE users SET balance = $1 WHERE id = $2")
            .bind(to_column(next)?)
            .bind(user_id.get())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(balance = next, "Cash balance committed");
        Ok(next)
    }

    #[instrument(skip(self), fields(user_id = %user_id, currency = %currency))]
    async fn update_exchange(
        &self,
        user_id: UserId,
        currency: &CurrencyCode,
        change: ExchangeChange,
    ) -> StoreResult<Balances> {
        let mut tx = self.begin().await?;

        let cash = Self::lock_user(&mut tx, user_id).await?;
        let (wallet_id, wallet) = Self::lock_wallet(&mut tx, user_id, currency).await?;
        let next = change.apply(Balances { cash, wallet })?;

        sqlx::query("UPDATE users SET balance = $1 WHERE id = $2")
            .bind(to_column(next.cash)?)
            .bind(user_id.get())
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE wallets SET balance = $1 WHERE id = $2")
            .bind(to_column(next.wallet)?)
            .bind(wallet_id.get())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(cash = next.cash, wallet = next.wallet, "Exchange committed");
        Ok(next)
    }

    #[instrument(skip(self))]
    async fn create_user_with_wallets(&self, email: &str, balance: u64) -> StoreResult<UserId> {
        let mut tx = self.begin().await?;

        let (id,): (i64,) =
            sqlx::query_as("INSERT INTO users (email, balance) VALUES ($1, $2) RETURNING id")
                .bind(email)
                .bind(to_column(balance)?)
                .fetch_one(&mut *tx)
                .await?;
        sqlx::query(
            "INSERT INTO wallets (user_id, currency_id, balance) \
             SELECT $1, id, 0 FROM currencies",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(UserId::new(id))
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn delete_user(&self, user_id: UserId) -> StoreResult<()> {
        // Wallets go with the user through ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id.get())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::UserNotFound);
        }
        Ok(())
    }

    #[instrument(skip(self, codes), fields(count = codes.len()))]
    async fn seed_currencies(&self, codes: &[CurrencyCode]) -> StoreResult<()> {
        let mut tx = self.begin().await?;

        for code in codes {
            sqlx::query("INSERT INTO currencies (code) VALUES ($1) ON CONFLICT (code) DO NOTHING")
                .bind(code.as_str())
                .execute(&mut *tx)
                .await?;
        }
        // Existing users get a wallet for any newly added currency.
        sqlx::query(
            "INSERT INTO wallets (user_id, currency_id, balance) \
             SELECT u.id, c.id, 0 FROM users u CROSS JOIN currencies c \
             ON CONFLICT (user_id, currency_id) DO NOTHING",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_conversions() {
        assert_eq!(to_cents(778).unwrap(), 778);
        assert!(matches!(to_cents(-1), Err(StoreError::Storage(_))));
        assert_eq!(to_column(222).unwrap(), 222);
        assert!(matches!(to_column(u64::MAX), Err(StoreError::Storage(_))));
    }

    #[test]
    fn test_timeout_statement() {
        assert_eq!(
            timeout_statement(Duration::from_millis(250)),
            "SET LOCAL lock_timeout = 250; SET LOCAL statement_timeout = 250"
        );
        // Zero would disable the timeout entirely.
        assert!(timeout_statement(Duration::ZERO).contains("lock_timeout = 1;"));
        assert!(timeout_statement(Duration::from_secs(u64::MAX)).contains("= 2147483647;"));
    }
}
