//! Read access to transfers and ledger entries for audit and reporting.

use rust_decimal::Decimal;
use tally_shared::types::{AccountId, TransferId};
use tracing::{error, info, warn};

use super::entry::LedgerEntry;
use super::error::LedgerError;
use super::store::{BalanceMismatch, LedgerStore, LedgerTx, run_atomically};
use super::transfer::Transfer;

/// Result of checking the ledger invariants against storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Sum of every entry in the ledger; zero when consistent.
    pub ledger_total: Decimal,
    /// Transfers without exactly two entries summing to zero.
    pub unbalanced_transfers: Vec<TransferId>,
    /// Accounts whose cached balance differs from their entries.
    pub balance_mismatches: Vec<BalanceMismatch>,
}

impl IntegrityReport {
    /// Returns true if no invariant is violated.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.ledger_total.is_zero()
            && self.unbalanced_transfers.is_empty()
            && self.balance_mismatches.is_empty()
    }
}

/// Read-only view over posted transfers.
#[derive(Debug, Clone)]
pub struct AuditTrail<S> {
    store: S,
}

impl<S: LedgerStore> AuditTrail<S> {
    /// Creates an audit trail over `store`.
    #[must_use]
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Loads a transfer with its entries.
    ///
    /// # Errors
    ///
    /// Returns `TransferNotFound` if it does not exist.
    pub async fn transfer(&self, id: TransferId) -> Result<Transfer, LedgerError> {
        run_atomically(&self.store, move |tx| {
            Box::pin(async move {
                let mut transfer = tx
                    .find_transfer(id)
                    .await?
                    .ok_or(LedgerError::TransferNotFound(id))?;
                transfer.entries = tx.entries_for_transfer(id).await?;
                Ok(transfer)
            })
        })
        .await
    }

    /// Entries recorded against an account, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn entries_for_account(&self, id: AccountId) -> Result<Vec<LedgerEntry>, LedgerError> {
        run_atomically(&self.store, move |tx| {
            Box::pin(async move { Ok(tx.entries_for_account(id).await?) })
        })
        .await
    }

    /// Number of entries recorded against an account.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn entry_count(&self, id: AccountId) -> Result<u64, LedgerError> {
        run_atomically(&self.store, move |tx| {
            Box::pin(async move { Ok(tx.count_entries_for(id).await?) })
        })
        .await
    }

    /// Transfers are append-only.
    ///
    /// # Errors
    ///
    /// Always returns a terminal error; the transfer is left intact.
    #[allow(clippy::unused_self)]
    pub fn delete_transfer(&self, transfer: &Transfer) -> Result<(), LedgerError> {
        let result = transfer.delete();
        if let Err(ref err) = result {
            error!(transfer = %transfer.reference(), error = %err, "Refused to delete transfer");
        }
        result.map_err(LedgerError::from)
    }

    /// Ledger entries are append-only.
    ///
    /// # Errors
    ///
    /// Always returns a terminal error; the entry is left intact.
    #[allow(clippy::unused_self)]
    pub fn delete_entry(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let result = entry.delete();
        if let Err(ref err) = result {
            error!(entry = %entry.id, error = %err, "Refused to delete ledger entry");
        }
        result.map_err(LedgerError::from)
    }

    /// Checks the global, per-transfer and per-account ledger invariants.
    ///
    /// # Errors
    ///
    /// Returns a storage error; a violated invariant is reported, not raised.
    pub async fn verify_integrity(&self) -> Result<IntegrityReport, LedgerError> {
        let report = run_atomically(&self.store, |tx| {
            Box::pin(async move {
                Ok(IntegrityReport {
                    ledger_total: tx.ledger_total().await?,
                    unbalanced_transfers: tx.unbalanced_transfers().await?,
                    balance_mismatches: tx.balance_mismatches().await?,
                })
            })
        })
        .await?;

        if report.is_consistent() {
            info!("Ledger integrity verified");
        } else {
            warn!(
                ledger_total = %report.ledger_total,
                unbalanced_transfers = report.unbalanced_transfers.len(),
                balance_mismatches = report.balance_mismatches.len(),
                "Ledger integrity violated"
            );
        }
        Ok(report)
    }
}
