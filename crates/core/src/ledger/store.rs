//! Storage seam for the ledger.
//!
//! The ledger never talks to a database directly. Every operation runs inside an
//! atomic unit obtained from a [`LedgerStore`]; the unit either commits all of its
//! writes or none of them. Dropping a unit without committing rolls it back.
//!
//! Transfers and ledger entries have no delete operation.

use async_trait::async_trait;
use futures::future::BoxFuture;
use rust_decimal::Decimal;
use tally_shared::types::{AccountId, TransferId};
use thiserror::Error;
use tracing::warn;

use super::account::{Account, NewAccount};
use super::entry::{LedgerEntry, NewLedgerEntry};
use super::error::LedgerError;
use super::transfer::{NewTransfer, Transfer};

/// Storage operation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A record the operation depends on does not exist.
    #[error("record not found: {0}")]
    NotFound(String),

    /// A uniqueness, foreign-key or check constraint was violated.
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// Timeout, lock timeout, deadlock, serialization failure or lost connection.
    #[error("transient storage failure: {0}")]
    Transient(String),

    /// Any other backend failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Create a not found error.
    #[must_use]
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a constraint error.
    #[must_use]
    pub fn constraint(msg: impl Into<String>) -> Self {
        Self::Constraint(msg.into())
    }

    /// Create a transient error.
    #[must_use]
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Create a backend error.
    #[must_use]
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Returns true if retrying the whole unit from scratch may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// An account whose cached balance disagrees with its ledger entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceMismatch {
    /// The account.
    pub account_id: AccountId,
    /// Balance stored on the account row.
    pub cached: Decimal,
    /// Sum of the account's ledger entries.
    pub ledger: Decimal,
}

/// Opens atomic units of work against a ledger backend.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// The unit-of-work handle.
    type Tx: LedgerTx;

    /// Opens a new atomic unit.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}

/// One atomic unit of work.
#[async_trait]
pub trait LedgerTx: Send {
    /// Inserts an account with a zero balance and `Open` status.
    async fn insert_account(&mut self, account: &NewAccount) -> Result<Account, StoreError>;

    /// Reads an account without locking it.
    async fn find_account(&mut self, id: AccountId) -> Result<Option<Account>, StoreError>;

    /// Reads an account and locks it until the unit ends.
    async fn lock_account(&mut self, id: AccountId) -> Result<Option<Account>, StoreError>;

    /// Writes every mutable column of an existing account.
    async fn update_account(&mut self, account: &Account) -> Result<(), StoreError>;

    /// Inserts a transfer header. The returned transfer has no entries yet.
    async fn insert_transfer(&mut self, transfer: &NewTransfer) -> Result<Transfer, StoreError>;

    /// Reads a transfer header (entries are not loaded).
    async fn find_transfer(&mut self, id: TransferId) -> Result<Option<Transfer>, StoreError>;

    /// Inserts one ledger entry.
    async fn insert_entry(&mut self, entry: &NewLedgerEntry) -> Result<LedgerEntry, StoreError>;

    /// Entries of a transfer, in insertion order.
    async fn entries_for_transfer(&mut self, id: TransferId)
    -> Result<Vec<LedgerEntry>, StoreError>;

    /// Entries of an account, in insertion order.
    async fn entries_for_account(&mut self, id: AccountId) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Number of entries recorded against an account.
    async fn count_entries_for(&mut self, id: AccountId) -> Result<u64, StoreError>;

    /// Sum of an account's entry amounts; `None` when the account has no entries.
    async fn sum_amounts_for(&mut self, id: AccountId) -> Result<Option<Decimal>, StoreError>;

    /// Sum of every entry in the ledger.
    async fn ledger_total(&mut self) -> Result<Decimal, StoreError>;

    /// Transfers that do not own exactly two entries summing to zero.
    async fn unbalanced_transfers(&mut self) -> Result<Vec<TransferId>, StoreError>;

    /// Accounts whose cached balance differs from their entries.
    async fn balance_mismatches(&mut self) -> Result<Vec<BalanceMismatch>, StoreError>;

    /// Makes every write of the unit visible.
    async fn commit(self) -> Result<(), StoreError>;

    /// Discards every write of the unit.
    async fn rollback(self) -> Result<(), StoreError>;
}

/// Runs `work` inside one atomic unit: commit on `Ok`, roll back on `Err`.
///
/// `work` must own everything it captures; it only borrows the unit.
///
/// # Errors
///
/// Returns the error produced by `work`, or a storage error from begin/commit.
pub async fn run_atomically<S, T, F>(store: &S, work: F) -> Result<T, LedgerError>
where
    S: LedgerStore + ?Sized,
    T: Send,
    F: for<'t> FnOnce(&'t mut S::Tx) -> BoxFuture<'t, Result<T, LedgerError>> + Send,
{
    let mut tx = store.begin().await?;
    match work(&mut tx).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Rollback failed after aborted unit of work");
            }
            Err(err)
        }
    }
}
