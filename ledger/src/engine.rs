//! Ledger engine: deposit, withdraw, buy, sell and wallet listing.

use std::sync::Arc;

use microbank_common::{format_cents, CurrencyCode, MonetaryError, Rate, RequestContext};
use microbank_fx::{FxError, RateResolver};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::account::{User, Wallet, WalletBalance};
use crate::balance::{Balances, CashChange, ExchangeChange};
use crate::error::{LedgerError, LedgerResult, StoreError};
use crate::notify::{Notification, Notifier};
use crate::store::BalanceStore;

/// Outcome of a committed buy or sell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub currency: CurrencyCode,
    /// Whole currency units bought or sold.
    pub units: u64,
    /// Cash moved, in cents.
    pub cost: u64,
    /// Rate the cost was computed from.
    pub rate: Rate,
    /// Cash balance after commit.
    pub cash_balance: u64,
    /// Wallet balance after commit.
    pub wallet_balance: u64,
}

/// Orchestrates balance mutations against the store and rate resolver.
///
/// Holds no per-request state and performs no locking of its own; the store
/// serializes mutations per user. Safe to share across tasks.
pub struct LedgerEngine {
    store: Arc<dyn BalanceStore>,
    rates: Arc<dyn RateResolver>,
    notifier: Arc<dyn Notifier>,
}

impl LedgerEngine {
    pub fn new(
        store: Arc<dyn BalanceStore>,
        rates: Arc<dyn RateResolver>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            rates,
            notifier,
        }
    }

    /// Add `amount` cents to the user's cash balance. Returns the new balance.
    #[instrument(skip(self, ctx), fields(request_id = %ctx.id()))]
    pub async fn deposit(&self, ctx: &RequestContext, email: &str, amount: u64) -> LedgerResult<u64> {
        require_positive(amount)?;
        let user = self.load_user(ctx, email).await?;

        let change = CashChange::Credit(amount);
        change.apply(user.balance)?;

        let balance = self.commit_cash(ctx, &user, change).await?;
        info!(user_id = %user.id, balance, "Deposit committed");

        self.notify(email, format!("Successfully deposited {}", format_cents(amount)))
            .await;
        Ok(balance)
    }

    /// Take `amount` cents from the user's cash balance. Returns the new balance.
    #[instrument(skip(self, ctx), fields(request_id = %ctx.id()))]
    pub async fn withdraw(
        &self,
        ctx: &RequestContext,
        email: &str,
        amount: u64,
    ) -> LedgerResult<u64> {
        require_positive(amount)?;
        let user = self.load_user(ctx, email).await?;

        let change = CashChange::Debit(amount);
        if let Err(e) = change.apply(user.balance) {
            info!(user_id = %user.id, balance = user.balance, "Withdrawal rejected");
            return Err(e.into());
        }

        let balance = self.commit_cash(ctx, &user, change).await?;
        info!(user_id = %user.id, balance, "Withdrawal committed");

        self.notify(email, format!("Successfully withdrew {}", format_cents(amount)))
            .await;
        Ok(balance)
    }

    /// Buy `units` whole units of `currency` with cash.
    #[instrument(skip(self, ctx), fields(request_id = %ctx.id(), currency = %currency))]
    pub async fn buy(
        &self,
        ctx: &RequestContext,
        email: &str,
        currency: &CurrencyCode,
        units: u64,
    ) -> LedgerResult<Trade> {
        let trade = self
            .exchange(ctx, email, currency, units, ExchangeChange::buy)
            .await?;
        self.notify(email, format!("Successfully bought {units} {currency}"))
            .await;
        Ok(trade)
    }

    /// Sell `units` whole units of `currency` for cash.
    #[instrument(skip(self, ctx), fields(request_id = %ctx.id(), currency = %currency))]
    pub async fn sell(
        &self,
        ctx: &RequestContext,
        email: &str,
        currency: &CurrencyCode,
        units: u64,
    ) -> LedgerResult<Trade> {
        let trade = self
            .exchange(ctx, email, currency, units, ExchangeChange::sell)
            .await?;
        self.notify(email, format!("Successfully sold {units} {currency}"))
            .await;
        Ok(trade)
    }

    /// All wallets of the user, ordered by currency code.
    #[instrument(skip(self, ctx), fields(request_id = %ctx.id()))]
    pub async fn wallets(
        &self,
        ctx: &RequestContext,
        email: &str,
    ) -> LedgerResult<Vec<WalletBalance>> {
        let user = self.load_user(ctx, email).await?;
        ctx.run(self.store.wallets(user.id))
            .await?
            .map_err(store_failure)
    }

    async fn exchange(
        &self,
        ctx: &RequestContext,
        email: &str,
        currency: &CurrencyCode,
        units: u64,
        make_change: fn(u64) -> ExchangeChange,
    ) -> LedgerResult<Trade> {
        require_positive(units)?;
        let user = self.load_user(ctx, email).await?;

        let rate = self
            .rates
            .get_rate(ctx, currency)
            .await
            .map_err(rate_failure)?;
        let cost = rate.cost_of(units).map_err(cost_failure)?;
        let change = make_change(cost);

        let wallet = self.load_wallet(ctx, &user, currency).await?;
        let current = Balances {
            cash: user.balance,
            wallet: wallet.balance,
        };
        if let Err(e) = change.apply(current) {
            info!(
                user_id = %user.id,
                cost,
                cash = current.cash,
                wallet = current.wallet,
                direction = ?change.direction,
                "Exchange rejected"
            );
            return Err(e.into());
        }

        // Last point at which the request may still be abandoned.
        ctx.check()?;
        let committed = self
            .store
            .update_exchange(user.id, currency, change)
            .await
            .map_err(store_failure)?;

        info!(
            user_id = %user.id,
            units,
            cost,
            rate = %rate,
            direction = ?change.direction,
            "Exchange committed"
        );

        Ok(Trade {
            currency: currency.clone(),
            units,
            cost,
            rate,
            cash_balance: committed.cash,
            wallet_balance: committed.wallet,
        })
    }

    async fn load_user(&self, ctx: &RequestContext, email: &str) -> LedgerResult<User> {
        ctx.run(self.store.get_user(email))
            .await?
            .map_err(store_failure)
    }

    async fn load_wallet(
        &self,
        ctx: &RequestContext,
        user: &User,
        currency: &CurrencyCode,
    ) -> LedgerResult<Wallet> {
        ctx.run(self.store.get_wallet(user.id, currency))
            .await?
            .map_err(store_failure)
    }

    async fn commit_cash(
        &self,
        ctx: &RequestContext,
        user: &User,
        change: CashChange,
    ) -> LedgerResult<u64> {
        // Once started, a commit runs to completion so its outcome is never
        // ambiguous to the caller.
        ctx.check()?;
        self.store
            .update_cash_balance(user.id, change)
            .await
            .map_err(store_failure)
    }

    async fn notify(&self, email: &str, message: String) {
        if let Err(e) = self.notifier.notify(Notification::new(email, message)).await {
            warn!(error = %e, "Notification dropped");
        }
    }
}

fn require_positive(amount: u64) -> LedgerResult<()> {
    if amount == 0 {
        return Err(LedgerError::InvalidAmount("amount must be positive"));
    }
    Ok(())
}

fn store_failure(err: StoreError) -> LedgerError {
    match err {
        StoreError::UserNotFound => LedgerError::UserNotFound,
        StoreError::CurrencyNotFound(_) => LedgerError::CurrencyNotFound,
        StoreError::WalletNotFound { user_id, currency } => {
            error!(user_id = %user_id, currency = %currency, "Wallet missing for known currency");
            LedgerError::WalletNotFound
        }
        StoreError::Balance(e) => e.into(),
        StoreError::UniqueViolation(_) | StoreError::Storage(_) => {
            error!(error = %err, "Balance store failure");
            LedgerError::Internal
        }
    }
}

fn rate_failure(err: FxError) -> LedgerError {
    match err {
        FxError::UnsupportedCurrency(_) => LedgerError::CurrencyNotFound,
        FxError::Interrupted(reason) => reason.into(),
        other => {
            error!(error = %other, "Rate resolution failed");
            LedgerError::Internal
        }
    }
}

fn cost_failure(err: MonetaryError) -> LedgerError {
    let mapped = LedgerError::from(err.clone());
    if mapped == LedgerError::Internal {
        error!(error = %err, "Cost computation failed");
    }
    mapped
}
