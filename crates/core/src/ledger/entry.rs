//! Ledger entries: one signed movement of funds against one account.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_shared::types::{AccountId, LedgerEntryId, TransferId};

use super::error::{ImmutableRecord, TerminalOperationError};
use super::transfer::reference_for;

/// Input for one ledger entry row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLedgerEntry {
    /// Owning transfer.
    pub transfer_id: TransferId,
    /// Account the funds move against.
    pub account_id: AccountId,
    /// Signed amount: negative debits, positive credits.
    pub amount: Decimal,
}

impl NewLedgerEntry {
    /// Builds the debit and credit entries of one transfer, in that order.
    #[must_use]
    pub fn pair(
        transfer_id: TransferId,
        source: AccountId,
        destination: AccountId,
        amount: Decimal,
    ) -> [Self; 2] {
        [
            Self {
                transfer_id,
                account_id: source,
                amount: -amount,
            },
            Self {
                transfer_id,
                account_id: destination,
                amount,
            },
        ]
    }
}

/// An immutable, persisted ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique identifier.
    pub id: LedgerEntryId,
    /// Owning transfer.
    pub transfer_id: TransferId,
    /// Account the funds moved against.
    pub account_id: AccountId,
    /// Signed amount.
    pub amount: Decimal,
    /// When the entry was written.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Returns true if this entry takes funds out of its account.
    #[must_use]
    pub fn is_debit(&self) -> bool {
        self.amount.is_sign_negative() && !self.amount.is_zero()
    }

    /// Returns true if this entry adds funds to its account.
    #[must_use]
    pub fn is_credit(&self) -> bool {
        self.amount.is_sign_positive() && !self.amount.is_zero()
    }

    /// Ledger entries cannot be deleted.
    ///
    /// # Errors
    ///
    /// Always.
    pub fn delete(&self) -> Result<(), TerminalOperationError> {
        Err(TerminalOperationError {
            record: ImmutableRecord::LedgerEntry(self.id),
        })
    }
}

impl std::fmt::Display for LedgerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Ref: {}, amount: {:.2}",
            reference_for(self.transfer_id),
            self.amount
        )
    }
}

/// Returns true if the amounts sum to exactly zero.
#[must_use]
pub fn entries_balance(entries: &[LedgerEntry]) -> bool {
    entries
        .iter()
        .map(|entry| entry.amount)
        .sum::<Decimal>()
        .is_zero()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn entry(id: i64, amount: Decimal) -> LedgerEntry {
        LedgerEntry {
            id: LedgerEntryId::new(id),
            transfer_id: TransferId::new(42),
            account_id: AccountId::new(id),
            amount,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_pair_is_debit_then_credit() {
        let [debit, credit] = NewLedgerEntry::pair(
            TransferId::new(1),
            AccountId::new(10),
            AccountId::new(20),
            dec!(7.25),
        );
        assert_eq!(debit.account_id, AccountId::new(10));
        assert_eq!(debit.amount, dec!(-7.25));
        assert_eq!(credit.account_id, AccountId::new(20));
        assert_eq!(credit.amount, dec!(7.25));
        assert!((debit.amount + credit.amount).is_zero());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            entry(1, dec!(-10)).to_string(),
            "Ref: 00000042, amount: -10.00"
        );
    }

    #[test]
    fn test_debit_credit_flags() {
        assert!(entry(1, dec!(-1.00)).is_debit());
        assert!(!entry(1, dec!(-1.00)).is_credit());
        assert!(entry(2, dec!(1.00)).is_credit());
    }

    #[test]
    fn test_entries_balance() {
        assert!(entries_balance(&[entry(1, dec!(-3.50)), entry(2, dec!(3.50))]));
        assert!(!entries_balance(&[entry(1, dec!(-3.50)), entry(2, dec!(3.49))]));
        assert!(entries_balance(&[]));
    }

    #[test]
    fn test_delete_is_terminal() {
        let entry = entry(9, dec!(1.00));
        let err = entry.delete().unwrap_err();
        assert_eq!(err.record, ImmutableRecord::LedgerEntry(LedgerEntryId::new(9)));
    }
}
