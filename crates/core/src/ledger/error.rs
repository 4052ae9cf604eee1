//! Ledger error types.
//!
//! Business-rule violations are detected before any write and reported as typed
//! failures. Storage failures abort the atomic unit and are reported separately so
//! callers can tell "rejected" from "not yet known". Deleting immutable records is a
//! programming error with its own type.

use rust_decimal::Decimal;
use tally_shared::AppError;
use tally_shared::types::{AccountId, LedgerEntryId, TransferId};
use thiserror::Error;

use super::store::StoreError;

/// Which party of a transfer an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The account being debited.
    Source,
    /// The account being credited.
    Destination,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source => write!(f, "Source"),
            Self::Destination => write!(f, "Destination"),
        }
    }
}

/// An append-only record that somebody attempted to delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmutableRecord {
    /// A transfer.
    Transfer(TransferId),
    /// A ledger entry.
    LedgerEntry(LedgerEntryId),
}

impl std::fmt::Display for ImmutableRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transfer(id) => write!(f, "Transfer {:08}", id.into_inner()),
            Self::LedgerEntry(id) => write!(f, "Ledger entry {id}"),
        }
    }
}

/// Raised on any attempt to delete a transfer or ledger entry.
///
/// This is never a business outcome: callers must not catch and retry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{record} cannot be deleted: ledger records are immutable")]
pub struct TerminalOperationError {
    /// The record the caller tried to delete.
    pub record: ImmutableRecord,
}

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    // ========== Validation Errors ==========
    /// Transfer amount is not a positive ledger amount, or the transfer has no
    /// second party.
    #[error("Invalid amount: {reason}")]
    InvalidAmount {
        /// Why the request was rejected.
        reason: String,
    },

    // ========== Account Errors ==========
    /// One side of the transfer is closed.
    #[error("{side} account {account} has been closed")]
    ClosedAccount {
        /// Which side is closed.
        side: Side,
        /// The closed account.
        account: AccountId,
    },

    /// The debit would take the source below its credit limit.
    #[error("Unable to debit {amount:.2} from account #{account}")]
    InsufficientFunds {
        /// The source account.
        account: AccountId,
        /// The requested amount.
        amount: Decimal,
    },

    /// An account holding funds cannot be closed.
    #[error("Account #{account} cannot be closed with a balance of {balance:.2}")]
    AccountNotEmpty {
        /// The account.
        account: AccountId,
        /// Its balance at the time of the attempt.
        balance: Decimal,
    },

    /// Account not found.
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Transfer not found.
    #[error("Transfer not found: {0}")]
    TransferNotFound(TransferId),

    // ========== Programming Errors ==========
    /// Delete attempted on an append-only record.
    #[error(transparent)]
    Terminal(#[from] TerminalOperationError),

    // ========== Infrastructure Errors ==========
    /// The storage backend failed; nothing was committed.
    #[error("Storage failure: {0}")]
    Storage(#[from] StoreError),
}

impl LedgerError {
    /// Create an invalid amount error.
    #[must_use]
    pub fn invalid_amount(reason: impl Into<String>) -> Self {
        Self::InvalidAmount {
            reason: reason.into(),
        }
    }

    /// Returns a stable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidAmount { .. } => "INVALID_AMOUNT",
            Self::ClosedAccount { .. } => "CLOSED_ACCOUNT",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::AccountNotEmpty { .. } => "ACCOUNT_NOT_EMPTY",
            Self::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            Self::TransferNotFound(_) => "TRANSFER_NOT_FOUND",
            Self::Terminal(_) => "TERMINAL_OPERATION",
            Self::Storage(_) => "STORAGE_FAILURE",
        }
    }

    /// Returns true if the whole operation may be retried from validation.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(err) if err.is_transient())
    }

    /// Returns true for programming errors that must never be recovered from.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        let message = err.to_string();
        match err {
            LedgerError::InvalidAmount { .. } => Self::Validation(message),
            LedgerError::ClosedAccount { .. }
            | LedgerError::InsufficientFunds { .. }
            | LedgerError::AccountNotEmpty { .. } => Self::BusinessRule(message),
            LedgerError::AccountNotFound(_) | LedgerError::TransferNotFound(_) => {
                Self::NotFound(message)
            }
            LedgerError::Terminal(_) => Self::Internal(message),
            LedgerError::Storage(StoreError::Constraint(_)) => Self::Conflict(message),
            LedgerError::Storage(StoreError::NotFound(_)) => Self::NotFound(message),
            LedgerError::Storage(StoreError::Transient(_)) => Self::Database(message),
            LedgerError::Storage(StoreError::Backend(_)) => Self::Internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_insufficient_funds_message() {
        let err = LedgerError::InsufficientFunds {
            account: AccountId::new(12),
            amount: dec!(10.01),
        };
        assert_eq!(err.to_string(), "Unable to debit 10.01 from account #12");
        assert_eq!(err.error_code(), "INSUFFICIENT_FUNDS");
    }

    #[test]
    fn test_closed_account_names_the_side() {
        let err = LedgerError::ClosedAccount {
            side: Side::Destination,
            account: AccountId::new(3),
        };
        assert_eq!(err.to_string(), "Destination account 3 has been closed");
    }

    #[test]
    fn test_terminal_error_message() {
        let err = TerminalOperationError {
            record: ImmutableRecord::Transfer(TransferId::new(42)),
        };
        assert_eq!(
            err.to_string(),
            "Transfer 00000042 cannot be deleted: ledger records are immutable"
        );
        let err = LedgerError::from(err);
        assert!(err.is_terminal());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_only_transient_storage_failures_are_retryable() {
        assert!(LedgerError::Storage(StoreError::transient("lock timeout")).is_retryable());
        assert!(!LedgerError::Storage(StoreError::constraint("duplicate code")).is_retryable());
        assert!(!LedgerError::invalid_amount("zero").is_retryable());
    }

    #[test]
    fn test_app_error_translation() {
        let app: AppError = LedgerError::invalid_amount("zero").into();
        assert_eq!(app.error_code(), "VALIDATION_ERROR");

        let app: AppError = LedgerError::AccountNotEmpty {
            account: AccountId::new(1),
            balance: dec!(5.00),
        }
        .into();
        assert_eq!(app.error_code(), "BUSINESS_RULE_VIOLATION");

        let app: AppError = LedgerError::Storage(StoreError::transient("timeout")).into();
        assert!(app.is_retryable());

        let ledger = LedgerError::Storage(StoreError::backend("syntax error"));
        assert!(!ledger.is_retryable());
        let app: AppError = ledger.into();
        assert!(!app.is_retryable());
        assert_eq!(app.error_code(), "INTERNAL_ERROR");

        let app: AppError = LedgerError::Storage(StoreError::constraint("unique")).into();
        assert_eq!(app.error_code(), "CONFLICT");

        let app: AppError = LedgerError::from(TerminalOperationError {
            record: ImmutableRecord::LedgerEntry(LedgerEntryId::new(1)),
        })
        .into();
        assert_eq!(app.error_code(), "INTERNAL_ERROR");
    }
}
