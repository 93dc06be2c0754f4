//! MicroBank Ledger Engine
//!
//! Deposit, withdraw, buy and sell against a transactional balance store, with
//! best-effort notifications after every committed change.

pub mod account;
pub mod balance;
pub mod engine;
pub mod error;
pub mod notify;
pub mod store;

pub use account::{Currency, User, Wallet, WalletBalance};
pub use balance::{BalanceError, Balances, CashChange, ExchangeChange, ExchangeDirection};
pub use engine::{LedgerEngine, Trade};
pub use error::{LedgerError, LedgerResult, StoreError, StoreResult};
pub use notify::{ChannelNotifier, LoggingNotifier, Notification, Notifier, NotifyError};
pub use store::{BalanceStore, MemoryBalanceStore, PgBalanceStore};
