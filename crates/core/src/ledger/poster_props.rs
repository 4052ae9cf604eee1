//! Property-based tests for transfer posting.
//!
//! Random sequences of postings, including ones that must be rejected, never break
//! the ledger invariants: every cached balance equals the sum of its entries, every
//! transfer is a pair summing to zero, and the whole ledger sums to zero.

use proptest::prelude::*;
use rust_decimal::Decimal;

use super::account::{Account, NewAccount};
use super::accounts::AccountBook;
use super::audit::AuditTrail;
use super::error::LedgerError;
use super::memory::InMemoryLedger;
use super::poster::TransferPoster;

/// Credit limits of the accounts every sequence runs against.
const CREDIT_LIMITS: [Option<i64>; 4] = [None, Some(0), Some(2_500), Some(10_000)];

/// Strategy to generate a posting: (source index, destination index, cents).
fn posting() -> impl Strategy<Value = (usize, usize, i64)> {
    (0..CREDIT_LIMITS.len(), 0..CREDIT_LIMITS.len(), -500i64..20_000i64)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

async fn open_accounts(book: &AccountBook<InMemoryLedger>) -> Vec<Account> {
    let mut accounts = Vec::new();
    for limit in CREDIT_LIMITS {
        let account = book
            .open(NewAccount::new().with_credit_limit(limit.map(|cents| Decimal::new(cents, 2))))
            .await
            .unwrap();
        accounts.push(account);
    }
    accounts
}

/// Applies the postings, returning how many were accepted.
async fn apply(
    poster: &TransferPoster<InMemoryLedger>,
    accounts: &mut [Account],
    postings: &[(usize, usize, i64)],
) -> usize {
    let mut accepted = 0;
    for &(from, to, cents) in postings {
        let amount = Decimal::new(cents, 2);
        let mut source = accounts[from].clone();
        let mut destination = accounts[to].clone();
        match poster
            .post(&mut source, &mut destination, amount, None, None)
            .await
        {
            Ok(_) => {
                accepted += 1;
                accounts[from] = source;
                accounts[to] = destination;
            }
            Err(
                LedgerError::InvalidAmount { .. } | LedgerError::InsufficientFunds { .. },
            ) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    accepted
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// *For any* sequence of postings, the ledger stays internally consistent.
    #[test]
    fn prop_postings_preserve_ledger_invariants(
        postings in prop::collection::vec(posting(), 1..25),
    ) {
        runtime().block_on(async {
            let store = InMemoryLedger::new();
            let book = AccountBook::new(store.clone());
            let poster = TransferPoster::new(store.clone());
            let mut accounts = open_accounts(&book).await;

            let accepted = apply(&poster, &mut accounts, &postings).await;

            let report = AuditTrail::new(store.clone()).verify_integrity().await.unwrap();
            prop_assert!(report.is_consistent(), "{report:?}");
            prop_assert_eq!(store.transfer_count().await, accepted);
            prop_assert_eq!(store.total_entries().await, accepted * 2);
            Ok(())
        })?;
    }

    /// *For any* sequence of postings, no balance drops below its credit limit.
    #[test]
    fn prop_credit_limits_are_never_breached(
        postings in prop::collection::vec(posting(), 1..25),
    ) {
        runtime().block_on(async {
            let store = InMemoryLedger::new();
            let book = AccountBook::new(store.clone());
            let poster = TransferPoster::new(store);
            let mut accounts = open_accounts(&book).await;

            apply(&poster, &mut accounts, &postings).await;

            for account in &accounts {
                let stored = book.get(account.id).await.unwrap();
                prop_assert_eq!(&stored, account);
                if let Some(limit) = stored.credit_limit {
                    prop_assert!(stored.balance >= -limit);
                }
            }
            Ok(())
        })?;
    }

    /// *For any* posting, the balances move by exactly the amount and sum to what
    /// they summed to before.
    #[test]
    fn prop_posting_conserves_money(
        funding in 1i64..100_000i64,
        cents in 1i64..100_000i64,
    ) {
        runtime().block_on(async {
            let store = InMemoryLedger::new();
            let book = AccountBook::new(store.clone());
            let poster = TransferPoster::new(store);
            let mut accounts = open_accounts(&book).await;
            let (reserve, rest) = accounts.split_at_mut(1);
            let (source, destination) = rest.split_at_mut(1);
            let (reserve, source, destination) = (&mut reserve[0], &mut source[0], &mut destination[0]);

            poster
                .post(reserve, source, Decimal::new(funding, 2), None, None)
                .await
                .unwrap();
            let before = (source.balance, destination.balance);
            let amount = Decimal::new(cents, 2);

            match poster.post(source, destination, amount, None, None).await {
                Ok(transfer) => {
                    prop_assert_eq!(transfer.amount, amount);
                    prop_assert_eq!(source.balance, before.0 - amount);
                    prop_assert_eq!(destination.balance, before.1 + amount);
                }
                Err(LedgerError::InsufficientFunds { .. }) => {
                    prop_assert!(amount > before.0);
                    prop_assert_eq!((source.balance, destination.balance), before);
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
            prop_assert_eq!(source.balance + destination.balance, before.0 + before.1);
            Ok(())
        })?;
    }
}
