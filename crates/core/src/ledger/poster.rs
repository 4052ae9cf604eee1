//! Transfer posting.
//!
//! A posting validates a proposed transfer against the committed state of both
//! accounts, then writes the transfer, its debit and credit entries, and both
//! recomputed balances inside one atomic unit.
//!
//! Both account rows are locked in ascending id order before validation, which makes
//! the funds check and the writes atomic with respect to any other posting touching
//! the same accounts, and keeps two opposite postings from deadlocking.

use rust_decimal::Decimal;
use tally_shared::types::AccountId;
use tally_shared::types::money;
use tracing::{debug, info, warn};

use super::account::Account;
use super::accounts::save_account;
use super::entry::NewLedgerEntry;
use super::error::{LedgerError, Side};
use super::store::{LedgerStore, LedgerTx, run_atomically};
use super::transfer::{NewTransfer, Transfer, UserRef};

/// Checks that an amount can be posted: strictly positive and within ledger scale.
///
/// # Errors
///
/// Returns `InvalidAmount` otherwise. Amounts are never rounded.
pub fn verify_amount(amount: Decimal) -> Result<(), LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::invalid_amount(format!(
            "amount must be positive, got {amount}"
        )));
    }
    if !money::fits_ledger_scale(amount) {
        return Err(LedgerError::invalid_amount(format!(
            "{amount} has more than two decimal places or exceeds the ledger maximum"
        )));
    }
    Ok(())
}

/// Checks that a transfer moves value between two different accounts.
///
/// # Errors
///
/// Returns `InvalidAmount` when both sides are the same account.
pub fn verify_parties(source: AccountId, destination: AccountId) -> Result<(), LedgerError> {
    if source == destination {
        return Err(LedgerError::invalid_amount(
            "source and destination must be different accounts",
        ));
    }
    Ok(())
}

/// Business rules of a posting, checked in order: amount, source open, destination
/// open, source funds.
///
/// # Errors
///
/// Returns the first rule that fails.
pub fn verify_transfer(
    source: &Account,
    destination: &Account,
    amount: Decimal,
) -> Result<(), LedgerError> {
    verify_amount(amount)?;
    verify_parties(source.id, destination.id)?;

    if !source.is_open() {
        return Err(LedgerError::ClosedAccount {
            side: Side::Source,
            account: source.id,
        });
    }
    if !destination.is_open() {
        return Err(LedgerError::ClosedAccount {
            side: Side::Destination,
            account: destination.id,
        });
    }
    if !source.is_debit_permitted(amount) {
        return Err(LedgerError::InsufficientFunds {
            account: source.id,
            amount,
        });
    }
    Ok(())
}

/// Result of a posting: the transfer with both entries, and both accounts as persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    /// The transfer, with its debit and credit entries.
    pub transfer: Transfer,
    /// Source account after the posting.
    pub source: Account,
    /// Destination account after the posting.
    pub destination: Account,
}

/// Locks two accounts in ascending id order and returns them as (source, destination).
async fn lock_pair<T>(
    tx: &mut T,
    source: AccountId,
    destination: AccountId,
) -> Result<(Account, Account), LedgerError>
where
    T: LedgerTx + ?Sized,
{
    let swapped = destination < source;
    let (first, second) = if swapped {
        (destination, source)
    } else {
        (source, destination)
    };

    let first = tx
        .lock_account(first)
        .await?
        .ok_or(LedgerError::AccountNotFound(first))?;
    let second = tx
        .lock_account(second)
        .await?
        .ok_or(LedgerError::AccountNotFound(second))?;

    Ok(if swapped {
        (second, first)
    } else {
        (first, second)
    })
}

/// Posts a transfer inside a unit the caller already opened.
///
/// Nothing is committed here; the caller decides. Use this to combine a posting with
/// other writes that must succeed or fail together.
///
/// # Errors
///
/// Returns a business-rule error before any write, or a storage error from any write.
pub async fn post_within<T>(tx: &mut T, mut request: NewTransfer) -> Result<Posting, LedgerError>
where
    T: LedgerTx + ?Sized,
{
    verify_amount(request.amount)?;
    verify_parties(request.source_id, request.destination_id)?;
    request.amount = money::to_ledger_scale(request.amount);

    let (mut source, mut destination) =
        lock_pair(tx, request.source_id, request.destination_id).await?;
    verify_transfer(&source, &destination, request.amount)?;

    let mut transfer = tx.insert_transfer(&request).await?;
    for entry in NewLedgerEntry::pair(transfer.id, source.id, destination.id, transfer.amount) {
        let entry = tx.insert_entry(&entry).await?;
        transfer.entries.push(entry);
    }

    save_account(tx, &mut source).await?;
    save_account(tx, &mut destination).await?;

    Ok(Posting {
        transfer,
        source,
        destination,
    })
}

/// Posts transfers between accounts.
#[derive(Debug, Clone)]
pub struct TransferPoster<S> {
    store: S,
}

impl<S: LedgerStore> TransferPoster<S> {
    /// Creates a poster over `store`.
    #[must_use]
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Moves `amount` from `source` to `destination`.
    ///
    /// Validation uses the committed state of both accounts, not the values passed
    /// in. On success both arguments are replaced with their persisted state and the
    /// transfer is returned with its two entries. On failure nothing is written and
    /// the arguments are left untouched.
    ///
    /// # Errors
    ///
    /// - `InvalidAmount` if the amount is not positive, has more than two decimal
    ///   places, or both sides are the same account
    /// - `ClosedAccount` if either side is closed
    /// - `InsufficientFunds` if the debit would breach the source credit limit
    /// - `AccountNotFound` if either account does not exist
    /// - `Storage` if the backend failed; nothing was committed
    pub async fn post(
        &self,
        source: &mut Account,
        destination: &mut Account,
        amount: Decimal,
        authorizer: Option<&UserRef>,
        description: Option<&str>,
    ) -> Result<Transfer, LedgerError> {
        let checked = verify_amount(amount).and_then(|()| verify_parties(source.id, destination.id));
        if let Err(err) = checked {
            debug!(
                source = %source.id,
                destination = %destination.id,
                amount = %amount,
                error = %err,
                "Transfer rejected"
            );
            return Err(err);
        }

        let request = NewTransfer::new(source.id, destination.id, amount)
            .authorized_by(authorizer)
            .with_description(description);

        match run_atomically(&self.store, move |tx| Box::pin(post_within(tx, request))).await {
            Ok(posting) => {
                info!(
                    transfer = %posting.transfer.reference(),
                    source = %posting.source.id,
                    destination = %posting.destination.id,
                    amount = %posting.transfer.amount,
                    "Transfer posted"
                );
                *source = posting.source;
                *destination = posting.destination;
                Ok(posting.transfer)
            }
            Err(err @ LedgerError::Storage(_)) => {
                warn!(
                    source = %source.id,
                    destination = %destination.id,
                    amount = %amount,
                    error = %err,
                    retryable = err.is_retryable(),
                    "Transfer aborted by storage failure"
                );
                Err(err)
            }
            Err(err) => {
                debug!(
                    source = %source.id,
                    destination = %destination.id,
                    amount = %amount,
                    error = %err,
                    "Transfer rejected"
                );
                Err(err)
            }
        }
    }
}
