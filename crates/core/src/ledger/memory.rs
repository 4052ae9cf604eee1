//! In-memory ledger store.
//!
//! A single async mutex guards the whole ledger for the lifetime of a unit, so units
//! run one at a time. Writes go to a working copy that replaces the shared state only
//! on commit. The same uniqueness and reference constraints as the SQL schema apply.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tally_shared::types::{AccountId, LedgerEntryId, TransferId};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use super::account::{Account, AccountStatus, NewAccount, balance_from_sum};
use super::entry::{LedgerEntry, NewLedgerEntry};
use super::store::{BalanceMismatch, LedgerStore, LedgerTx, StoreError};
use super::transfer::{NewTransfer, Transfer};

/// Where an injected storage failure fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    /// Opening the unit.
    Begin,
    /// Inserting a transfer header.
    InsertTransfer,
    /// Inserting the n-th (zero-based) ledger entry of a unit.
    InsertEntry(usize),
    /// Updating an account row.
    UpdateAccount,
    /// Committing the unit.
    Commit,
}

#[derive(Debug, Clone, Default)]
struct LedgerState {
    accounts: BTreeMap<AccountId, Account>,
    transfers: BTreeMap<TransferId, Transfer>,
    entries: Vec<LedgerEntry>,
    last_account_id: i64,
    last_transfer_id: i64,
    last_entry_id: i64,
}

impl LedgerState {
    fn check_unique(
        &self,
        account_id: Option<AccountId>,
        name: Option<&str>,
        code: Option<&str>,
    ) -> Result<(), StoreError> {
        for other in self.accounts.values() {
            if Some(other.id) == account_id {
                continue;
            }
            if let Some(name) = name
                && other.name.as_deref() == Some(name)
            {
                return Err(StoreError::constraint(format!(
                    "duplicate account name: {name}"
                )));
            }
            if let Some(code) = code
                && other.code.as_deref() == Some(code)
            {
                return Err(StoreError::constraint(format!(
                    "duplicate account code: {code}"
                )));
            }
        }
        Ok(())
    }

    fn entries_of(&self, account_id: AccountId) -> impl Iterator<Item = &LedgerEntry> {
        self.entries
            .iter()
            .filter(move |entry| entry.account_id == account_id)
    }
}

/// Ledger store that keeps everything in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
    fail_point: Arc<std::sync::Mutex<Option<FailPoint>>>,
}

impl InMemoryLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next operation reaching `point` fail with a transient error.
    ///
    /// The failure fires once.
    pub fn fail_on(&self, point: FailPoint) {
        *self
            .fail_point
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(point);
    }

    /// Number of committed accounts.
    pub async fn account_count(&self) -> usize {
        self.state.lock().await.accounts.len()
    }

    /// Number of committed transfers.
    pub async fn transfer_count(&self) -> usize {
        self.state.lock().await.transfers.len()
    }

    /// Number of committed ledger entries.
    pub async fn total_entries(&self) -> usize {
        self.state.lock().await.entries.len()
    }
}

fn trip(slot: &std::sync::Mutex<Option<FailPoint>>, point: FailPoint) -> Result<(), StoreError> {
    let mut armed = slot.lock().unwrap_or_else(PoisonError::into_inner);
    if *armed == Some(point) {
        *armed = None;
        debug!(?point, "Injected storage failure");
        return Err(StoreError::transient(format!("injected failure at {point:?}")));
    }
    Ok(())
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        trip(&self.fail_point, FailPoint::Begin)?;
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = (*guard).clone();
        Ok(InMemoryTx {
            guard,
            working,
            fail_point: Arc::clone(&self.fail_point),
            entries_inserted: 0,
        })
    }
}

/// A unit of work over [`InMemoryLedger`].
pub struct InMemoryTx {
    guard: OwnedMutexGuard<LedgerState>,
    working: LedgerState,
    fail_point: Arc<std::sync::Mutex<Option<FailPoint>>>,
    entries_inserted: usize,
}

impl std::fmt::Debug for InMemoryTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTx")
            .field("entries_inserted", &self.entries_inserted)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LedgerTx for InMemoryTx {
    async fn insert_account(&mut self, account: &NewAccount) -> Result<Account, StoreError> {
        let state = &mut self.working;
        state.check_unique(None, account.name.as_deref(), account.code.as_deref())?;

        state.last_account_id += 1;
        let created = Account {
            id: AccountId::new(state.last_account_id),
            name: account.name.clone(),
            code: account.code.clone(),
            status: AccountStatus::Open,
            credit_limit: account.credit_limit,
            balance: balance_from_sum(None),
            start_date: account.start_date,
            end_date: account.end_date,
            created_at: Utc::now(),
        };
        state.accounts.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_account(&mut self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.working.accounts.get(&id).cloned())
    }

    async fn lock_account(&mut self, id: AccountId) -> Result<Option<Account>, StoreError> {
        // The unit already holds the ledger-wide lock.
        Ok(self.working.accounts.get(&id).cloned())
    }

    async fn update_account(&mut self, account: &Account) -> Result<(), StoreError> {
        trip(&self.fail_point, FailPoint::UpdateAccount)?;
        let state = &mut self.working;
        if !state.accounts.contains_key(&account.id) {
            return Err(StoreError::not_found(format!("account {}", account.id)));
        }
        state.check_unique(
            Some(account.id),
            account.name.as_deref(),
            account.code.as_deref(),
        )?;
        state.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn insert_transfer(&mut self, transfer: &NewTransfer) -> Result<Transfer, StoreError> {
        trip(&self.fail_point, FailPoint::InsertTransfer)?;
        let state = &mut self.working;
        if transfer.amount <= Decimal::ZERO {
            return Err(StoreError::constraint("transfer amount must be positive"));
        }
        if transfer.source_id == transfer.destination_id {
            return Err(StoreError::constraint(
                "transfer source and destination must differ",
            ));
        }
        for id in [transfer.source_id, transfer.destination_id] {
            if !state.accounts.contains_key(&id) {
                return Err(StoreError::constraint(format!(
                    "transfer references missing account {id}"
                )));
            }
        }

        state.last_transfer_id += 1;
        let created = Transfer {
            id: TransferId::new(state.last_transfer_id),
            source_id: transfer.source_id,
            destination_id: transfer.destination_id,
            amount: transfer.amount,
            description: transfer.description.clone(),
            authorizer_id: transfer.authorizer_id,
            authorizer_name: transfer.authorizer_name.clone(),
            created_at: Utc::now(),
            entries: Vec::new(),
        };
        state.transfers.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_transfer(&mut self, id: TransferId) -> Result<Option<Transfer>, StoreError> {
        Ok(self.working.transfers.get(&id).cloned())
    }

    async fn insert_entry(&mut self, entry: &NewLedgerEntry) -> Result<LedgerEntry, StoreError> {
        trip(
            &self.fail_point,
            FailPoint::InsertEntry(self.entries_inserted),
        )?;
        let state = &mut self.working;
        if !state.transfers.contains_key(&entry.transfer_id) {
            return Err(StoreError::constraint(format!(
                "entry references missing transfer {}",
                entry.transfer_id
            )));
        }
        if !state.accounts.contains_key(&entry.account_id) {
            return Err(StoreError::constraint(format!(
                "entry references missing account {}",
                entry.account_id
            )));
        }
        if state
            .entries
            .iter()
            .any(|e| e.transfer_id == entry.transfer_id && e.account_id == entry.account_id)
        {
            return Err(StoreError::constraint(format!(
                "duplicate entry for transfer {} and account {}",
                entry.transfer_id, entry.account_id
            )));
        }

        state.last_entry_id += 1;
        let created = LedgerEntry {
            id: LedgerEntryId::new(state.last_entry_id),
            transfer_id: entry.transfer_id,
            account_id: entry.account_id,
            amount: entry.amount,
            created_at: Utc::now(),
        };
        state.entries.push(created.clone());
        self.entries_inserted += 1;
        Ok(created)
    }

    async fn entries_for_transfer(
        &mut self,
        id: TransferId,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        Ok(self
            .working
            .entries
            .iter()
            .filter(|entry| entry.transfer_id == id)
            .cloned()
            .collect())
    }

    async fn entries_for_account(&mut self, id: AccountId) -> Result<Vec<LedgerEntry>, StoreError> {
        Ok(self.working.entries_of(id).cloned().collect())
    }

    async fn count_entries_for(&mut self, id: AccountId) -> Result<u64, StoreError> {
        Ok(self.working.entries_of(id).count() as u64)
    }

    async fn sum_amounts_for(&mut self, id: AccountId) -> Result<Option<Decimal>, StoreError> {
        Ok(self
            .working
            .entries_of(id)
            .map(|entry| entry.amount)
            .reduce(|acc, amount| acc + amount))
    }

    async fn ledger_total(&mut self) -> Result<Decimal, StoreError> {
        Ok(self.working.entries.iter().map(|entry| entry.amount).sum())
    }

    async fn unbalanced_transfers(&mut self) -> Result<Vec<TransferId>, StoreError> {
        let state = &self.working;
        Ok(state
            .transfers
            .keys()
            .copied()
            .filter(|id| {
                let (count, sum) = state
                    .entries
                    .iter()
                    .filter(|entry| entry.transfer_id == *id)
                    .fold((0_usize, Decimal::ZERO), |(count, sum), entry| {
                        (count + 1, sum + entry.amount)
                    });
                count != 2 || !sum.is_zero()
            })
            .collect())
    }

    async fn balance_mismatches(&mut self) -> Result<Vec<BalanceMismatch>, StoreError> {
        let state = &self.working;
        Ok(state
            .accounts
            .values()
            .filter_map(|account| {
                let sum = state
                    .entries_of(account.id)
                    .map(|entry| entry.amount)
                    .reduce(|acc, amount| acc + amount);
                let ledger = balance_from_sum(sum);
                (account.balance != ledger).then(|| BalanceMismatch {
                    account_id: account.id,
                    cached: account.balance,
                    ledger,
                })
            })
            .collect())
    }

    async fn commit(self) -> Result<(), StoreError> {
        trip(&self.fail_point, FailPoint::Commit)?;
        let Self {
            mut guard, working, ..
        } = self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn open_pair(store: &InMemoryLedger) -> (Account, Account) {
        let mut tx = store.begin().await.unwrap();
        let a = tx.insert_account(&NewAccount::new()).await.unwrap();
        let b = tx.insert_account(&NewAccount::new()).await.unwrap();
        tx.commit().await.unwrap();
        (a, b)
    }

    #[tokio::test]
    async fn test_ids_are_sequential() {
        let store = InMemoryLedger::new();
        let (a, b) = open_pair(&store).await;
        assert_eq!(a.id, AccountId::new(1));
        assert_eq!(b.id, AccountId::new(2));
        assert_eq!(a.balance, dec!(0.00));
        assert_eq!(a.status, AccountStatus::Open);
    }

    #[tokio::test]
    async fn test_unique_name_and_code() {
        let store = InMemoryLedger::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_account(&NewAccount::new().with_name("Wallet").with_code("ABC"))
            .await
            .unwrap();
        let name = tx.insert_account(&NewAccount::new().with_name("Wallet")).await;
        assert!(matches!(name, Err(StoreError::Constraint(_))));
        let code = tx.insert_account(&NewAccount::new().with_code("ABC")).await;
        assert!(matches!(code, Err(StoreError::Constraint(_))));
        // Anonymous accounts never collide.
        tx.insert_account(&NewAccount::new()).await.unwrap();
        tx.insert_account(&NewAccount::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_entry_constraints() {
        let store = InMemoryLedger::new();
        let (a, b) = open_pair(&store).await;
        let mut tx = store.begin().await.unwrap();

        let transfer = tx
            .insert_transfer(&NewTransfer::new(a.id, b.id, dec!(1.00)))
            .await
            .unwrap();
        let [debit, _] = NewLedgerEntry::pair(transfer.id, a.id, b.id, dec!(1.00));
        tx.insert_entry(&debit).await.unwrap();
        assert!(matches!(
            tx.insert_entry(&debit).await,
            Err(StoreError::Constraint(_))
        ));

        let self_transfer = tx
            .insert_transfer(&NewTransfer::new(a.id, a.id, dec!(1.00)))
            .await;
        assert!(matches!(self_transfer, Err(StoreError::Constraint(_))));

        let zero = tx
            .insert_transfer(&NewTransfer::new(a.id, b.id, dec!(0)))
            .await;
        assert!(matches!(zero, Err(StoreError::Constraint(_))));
    }

    #[tokio::test]
    async fn test_rollback_discards_working_copy() {
        let store = InMemoryLedger::new();
        let (a, b) = open_pair(&store).await;
        let mut tx = store.begin().await.unwrap();
        tx.insert_transfer(&NewTransfer::new(a.id, b.id, dec!(1.00)))
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.transfer_count().await, 0);
    }

    #[tokio::test]
    async fn test_dropped_unit_rolls_back() {
        let store = InMemoryLedger::new();
        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_account(&NewAccount::new()).await.unwrap();
        }
        assert_eq!(store.account_count().await, 0);
    }

    #[tokio::test]
    async fn test_fail_point_fires_once() {
        let store = InMemoryLedger::new();
        store.fail_on(FailPoint::Begin);
        assert!(matches!(store.begin().await, Err(StoreError::Transient(_))));
        assert!(store.begin().await.is_ok());
    }

    #[tokio::test]
    async fn test_sum_amounts_for_empty_account_is_none() {
        let store = InMemoryLedger::new();
        let (a, _) = open_pair(&store).await;
        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.sum_amounts_for(a.id).await.unwrap(), None);
        assert_eq!(tx.count_entries_for(a.id).await.unwrap(), 0);
    }
}
