//! Concurrent mutations against one user.
//!
//! Every task waits on a barrier so the requests hit the store together.

mod support;

use std::sync::Arc;

use microbank_common::{CurrencyCode, RequestContext};
use microbank_ledger::LedgerError;
use tokio::sync::Barrier;

use support::{bank, EMAIL};

const TASKS: usize = 16;
const AMOUNT: u64 = 125;

async fn run_withdrawals(bank: &support::Bank, tasks: usize) -> Vec<Result<u64, LedgerError>> {
    let barrier = Arc::new(Barrier::new(tasks));
    let mut handles = Vec::with_capacity(tasks);

    for _ in 0..tasks {
        let engine = Arc::clone(&bank.engine);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            engine
                .withdraw(&RequestContext::background(), EMAIL, AMOUNT)
                .await
        }));
    }

    let mut results = Vec::with_capacity(tasks);
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exact_withdrawals_drain_balance() {
    let bank = bank(TASKS as u64 * AMOUNT).await;

    let results = run_withdrawals(&bank, TASKS).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), TASKS);
    assert_eq!(bank.cash().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_withdrawal_too_many_is_rejected() {
    let bank = bank(TASKS as u64 * AMOUNT).await;

    let results = run_withdrawals(&bank, TASKS + 1).await;

    let successes = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(LedgerError::NotEnoughMoney)))
        .count();
    assert_eq!(successes, TASKS);
    assert_eq!(rejected, 1);
    assert_eq!(bank.cash().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_buys_never_overdraw() {
    // Room for exactly five purchases of one EUR at 111 cents.
    let bank = bank(5 * 111 + 50).await;
    let eur = CurrencyCode::eur();
    let barrier = Arc::new(Barrier::new(TASKS));
    let mut handles = Vec::new();

    for _ in 0..TASKS {
        let engine = Arc::clone(&bank.engine);
        let barrier = Arc::clone(&barrier);
        let eur = eur.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            engine
                .buy(&RequestContext::background(), EMAIL, &eur, 1)
                .await
        }));
    }

    let mut bought = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => bought += 1,
            Err(e) => assert_eq!(e, LedgerError::NotEnoughMoney),
        }
    }

    assert_eq!(bought, 5);
    assert_eq!(bank.cash().await, 50);
    assert_eq!(bank.wallet(&eur).await, 5 * 111);
}
