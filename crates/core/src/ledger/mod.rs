//! Double-entry stored-value ledger.
//!
//! This module implements the ledger core:
//! - Accounts with a credit limit and a cached balance
//! - Transfers and their balancing pair of ledger entries
//! - Transfer posting as one atomic unit
//! - Account lifecycle (open, save, close)
//! - Audit reads and integrity checks
//! - The storage seam and an in-memory store

pub mod account;
pub mod accounts;
pub mod audit;
pub mod entry;
pub mod error;
pub mod memory;
pub mod poster;
pub mod store;
pub mod transfer;

#[cfg(test)]
mod poster_props;

pub use account::{Account, AccountStatus, NewAccount};
pub use accounts::AccountBook;
pub use audit::{AuditTrail, IntegrityReport};
pub use entry::{LedgerEntry, NewLedgerEntry};
pub use error::{ImmutableRecord, LedgerError, Side, TerminalOperationError};
pub use memory::{FailPoint, InMemoryLedger};
pub use poster::{Posting, TransferPoster, post_within, verify_transfer};
pub use store::{BalanceMismatch, LedgerStore, LedgerTx, StoreError, run_atomically};
pub use transfer::{NewTransfer, Transfer, UserRef};
