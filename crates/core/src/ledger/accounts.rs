//! Account lifecycle: open, save, refresh and close.
//!
//! Every persist of an account goes through [`save_account`], which uppercases the
//! activation code and replaces the cached balance with the sum of the ledger.

use tally_shared::types::AccountId;
use tracing::info;

use super::account::{Account, AccountStatus, NewAccount, normalize_credit_limit};
use super::error::LedgerError;
use super::store::{LedgerStore, LedgerTx, run_atomically};

/// Recomputes the balance of `account` from the ledger and persists it.
///
/// # Errors
///
/// Returns a storage error if the aggregation or the update fails.
pub async fn save_account<T>(tx: &mut T, account: &mut Account) -> Result<(), LedgerError>
where
    T: LedgerTx + ?Sized,
{
    let sum = tx.sum_amounts_for(account.id).await?;
    account.normalize_for_save(sum);
    tx.update_account(account).await?;
    Ok(())
}

async fn lock_existing<T>(tx: &mut T, id: AccountId) -> Result<Account, LedgerError>
where
    T: LedgerTx + ?Sized,
{
    tx.lock_account(id)
        .await?
        .ok_or(LedgerError::AccountNotFound(id))
}

/// Account lifecycle operations over a ledger store.
#[derive(Debug, Clone)]
pub struct AccountBook<S> {
    store: S,
}

impl<S: LedgerStore> AccountBook<S> {
    /// Creates an account book.
    #[must_use]
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Opens a new account with a zero balance.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAmount` for a bad credit limit, or a storage constraint error
    /// when the name or code is already taken.
    pub async fn open(&self, account: NewAccount) -> Result<Account, LedgerError> {
        let account = account.normalized()?;
        let created = run_atomically(&self.store, move |tx| {
            Box::pin(async move { Ok(tx.insert_account(&account).await?) })
        })
        .await?;

        info!(account = %created.id, label = %created, "Account opened");
        Ok(created)
    }

    /// Loads an account.
    ///
    /// # Errors
    ///
    /// Returns `AccountNotFound` if it does not exist.
    pub async fn get(&self, id: AccountId) -> Result<Account, LedgerError> {
        run_atomically(&self.store, move |tx| {
            Box::pin(async move {
                tx.find_account(id)
                    .await?
                    .ok_or(LedgerError::AccountNotFound(id))
            })
        })
        .await
    }

    /// Persists metadata changes (name, code, credit limit, activation window).
    ///
    /// Status only changes through [`close`](Self::close) and the balance is always
    /// recomputed, so both are taken from storage rather than from `account`.
    ///
    /// # Errors
    ///
    /// Returns `AccountNotFound`, `InvalidAmount` for a bad credit limit, or a storage
    /// constraint error when the name or code is already taken.
    pub async fn save(&self, account: &mut Account) -> Result<(), LedgerError> {
        let mut draft = account.clone();
        draft.credit_limit = normalize_credit_limit(draft.credit_limit)?;

        let saved = run_atomically(&self.store, move |tx| {
            Box::pin(async move {
                let current = lock_existing(tx, draft.id).await?;
                draft.status = current.status;
                save_account(tx, &mut draft).await?;
                Ok(draft)
            })
        })
        .await?;

        *account = saved;
        Ok(())
    }

    /// Recomputes the cached balance from the ledger and persists it.
    ///
    /// # Errors
    ///
    /// Returns `AccountNotFound` or a storage error.
    pub async fn refresh_balance(&self, account: &mut Account) -> Result<(), LedgerError> {
        let id = account.id;
        let refreshed = run_atomically(&self.store, move |tx| {
            Box::pin(async move {
                let mut current = lock_existing(tx, id).await?;
                save_account(tx, &mut current).await?;
                Ok(current)
            })
        })
        .await?;

        *account = refreshed;
        Ok(())
    }

    /// Closes an account that holds no positive funds.
    ///
    /// The balance is recomputed under the account lock before the check, so a
    /// concurrent credit cannot slip in between.
    ///
    /// # Errors
    ///
    /// Returns `AccountNotEmpty` if the balance is positive; the account is left open.
    pub async fn close(&self, account: &mut Account) -> Result<(), LedgerError> {
        let id = account.id;
        let closed = run_atomically(&self.store, move |tx| {
            Box::pin(async move {
                let mut current = lock_existing(tx, id).await?;
                let sum = tx.sum_amounts_for(id).await?;
                current.normalize_for_save(sum);
                current.ensure_closable()?;
                current.status = AccountStatus::Closed;
                tx.update_account(&current).await?;
                Ok(current)
            })
        })
        .await?;

        info!(account = %closed.id, "Account closed");
        *account = closed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::InMemoryLedger;
    use crate::ledger::poster::TransferPoster;
    use crate::ledger::store::StoreError;
    use rust_decimal_macros::dec;

    fn setup() -> (AccountBook<InMemoryLedger>, TransferPoster<InMemoryLedger>) {
        let store = InMemoryLedger::new();
        (AccountBook::new(store.clone()), TransferPoster::new(store))
    }

    #[tokio::test]
    async fn test_open_normalizes_code() {
        let (book, _) = setup();
        let account = book
            .open(NewAccount::new().with_code("gift-001"))
            .await
            .unwrap();
        assert_eq!(account.code.as_deref(), Some("GIFT-001"));
        assert_eq!(account.balance, dec!(0.00));
        assert!(account.is_open());
        assert_eq!(book.get(account.id).await.unwrap(), account);
    }

    #[tokio::test]
    async fn test_open_rejects_duplicate_code_case_insensitively() {
        let (book, _) = setup();
        book.open(NewAccount::new().with_code("abc")).await.unwrap();
        let err = book
            .open(NewAccount::new().with_code("ABC"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Storage(StoreError::Constraint(_))));
    }

    #[tokio::test]
    async fn test_get_missing_account() {
        let (book, _) = setup();
        let err = book.get(AccountId::new(99)).await.unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(id) if id == AccountId::new(99)));
    }

    #[tokio::test]
    async fn test_save_recomputes_balance_and_keeps_status() {
        let (book, poster) = setup();
        let mut source = book
            .open(NewAccount::new().with_credit_limit(None))
            .await
            .unwrap();
        let mut destination = book.open(NewAccount::new()).await.unwrap();
        poster
            .post(&mut source, &mut destination, dec!(4.00), None, None)
            .await
            .unwrap();

        let mut stale = destination.clone();
        stale.balance = dec!(1000.00);
        stale.status = AccountStatus::Closed;
        stale.name = Some("Renamed".to_string());
        stale.code = Some("lower".to_string());
        book.save(&mut stale).await.unwrap();

        assert_eq!(stale.balance, dec!(4.00));
        assert_eq!(stale.status, AccountStatus::Open);
        assert_eq!(stale.code.as_deref(), Some("LOWER"));
        assert_eq!(book.get(stale.id).await.unwrap().name.as_deref(), Some("Renamed"));
    }

    #[tokio::test]
    async fn test_refresh_balance_is_stable() {
        let (book, poster) = setup();
        let mut source = book
            .open(NewAccount::new().with_credit_limit(None))
            .await
            .unwrap();
        let mut destination = book.open(NewAccount::new()).await.unwrap();
        poster
            .post(&mut source, &mut destination, dec!(2.50), None, None)
            .await
            .unwrap();

        let mut copy = source.clone();
        book.refresh_balance(&mut copy).await.unwrap();
        let first = copy.balance;
        book.refresh_balance(&mut copy).await.unwrap();
        assert_eq!(copy.balance, first);
        assert_eq!(first, dec!(-2.50));
    }

    #[tokio::test]
    async fn test_close_zero_balance() {
        let (book, _) = setup();
        let mut account = book.open(NewAccount::new()).await.unwrap();
        book.close(&mut account).await.unwrap();
        assert_eq!(account.status, AccountStatus::Closed);
        assert_eq!(book.get(account.id).await.unwrap().status, AccountStatus::Closed);
    }

    #[tokio::test]
    async fn test_close_with_funds_fails() {
        let (book, poster) = setup();
        let mut source = book
            .open(NewAccount::new().with_credit_limit(None))
            .await
            .unwrap();
        let mut destination = book.open(NewAccount::new()).await.unwrap();
        poster
            .post(&mut source, &mut destination, dec!(5.00), None, None)
            .await
            .unwrap();

        let err = book.close(&mut destination).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::AccountNotEmpty { balance, .. } if balance == dec!(5.00)
        ));
        assert_eq!(destination.status, AccountStatus::Open);
        assert_eq!(
            book.get(destination.id).await.unwrap().status,
            AccountStatus::Open
        );

        // An account in debt may be closed.
        book.close(&mut source).await.unwrap();
        assert_eq!(source.status, AccountStatus::Closed);
    }

    #[tokio::test]
    async fn test_close_checks_ledger_not_stale_copy() {
        let (book, poster) = setup();
        let mut source = book
            .open(NewAccount::new().with_credit_limit(None))
            .await
            .unwrap();
        let mut destination = book.open(NewAccount::new()).await.unwrap();
        let mut stale = destination.clone();
        poster
            .post(&mut source, &mut destination, dec!(1.00), None, None)
            .await
            .unwrap();

        assert_eq!(stale.balance, dec!(0.00));
        assert!(book.close(&mut stale).await.is_err());
    }
}
