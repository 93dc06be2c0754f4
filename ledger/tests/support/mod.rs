//! Shared fixtures for ledger integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use microbank_common::CurrencyCode;
use microbank_fx::{CachedRateResolver, MemoryRateCache, MockQuoteSource, ResolverConfig};
use microbank_ledger::{BalanceStore, LedgerEngine, LoggingNotifier, MemoryBalanceStore};
use rust_decimal_macros::dec;

pub const EMAIL: &str = "alice@example.com";

pub struct Bank {
    pub store: Arc<MemoryBalanceStore>,
    pub source: Arc<MockQuoteSource>,
    pub cache: Arc<MemoryRateCache>,
    pub engine: Arc<LedgerEngine>,
}

impl Bank {
    pub async fn cash(&self) -> u64 {
        self.store.get_user(EMAIL).await.unwrap().balance
    }

    pub async fn wallet(&self, currency: &CurrencyCode) -> u64 {
        let user = self.store.get_user(EMAIL).await.unwrap();
        self.store.get_wallet(user.id, currency).await.unwrap().balance
    }
}

pub fn currencies() -> [CurrencyCode; 3] {
    [CurrencyCode::rub(), CurrencyCode::eur(), CurrencyCode::cny()]
}

/// Engine over an in-memory store holding one user with `balance` cents.
pub async fn bank(balance: u64) -> Bank {
    let store = Arc::new(MemoryBalanceStore::with_currencies(currencies()));
    store.create_user_with_wallets(EMAIL, balance).await.unwrap();

    let source = Arc::new(MockQuoteSource::new("mock"));
    source.set_rate(CurrencyCode::rub(), dec!(0.011));
    source.set_rate(CurrencyCode::eur(), dec!(1.11));
    source.set_rate(CurrencyCode::cny(), dec!(0.14));

    let cache = Arc::new(MemoryRateCache::new());
    let resolver = Arc::new(CachedRateResolver::new(
        source.clone(),
        cache.clone(),
        ResolverConfig::default(),
    ));
    let engine = Arc::new(LedgerEngine::new(
        store.clone(),
        resolver,
        Arc::new(LoggingNotifier),
    ));

    Bank {
        store,
        source,
        cache,
        engine,
    }
}
