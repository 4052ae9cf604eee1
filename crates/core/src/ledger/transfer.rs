//! Transfers: the audit record of one value movement between two accounts.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_shared::types::{AccountId, TransferId, UserId};

use super::entry::LedgerEntry;
use super::error::{ImmutableRecord, TerminalOperationError};

/// Human-readable transfer reference: the id zero-padded to eight digits.
#[must_use]
pub fn reference_for(id: TransferId) -> String {
    format!("{:08}", id.into_inner())
}

/// Reference to the user who authorized a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    /// User identifier in the identity system.
    pub id: UserId,
    /// Login name.
    pub username: String,
}

impl UserRef {
    /// Creates a user reference.
    #[must_use]
    pub fn new(id: UserId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
        }
    }

    /// Name recorded on transfers this user authorizes.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.username
    }
}

/// Input for a transfer header row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransfer {
    /// Debited account.
    pub source_id: AccountId,
    /// Credited account.
    pub destination_id: AccountId,
    /// Positive amount moved.
    pub amount: Decimal,
    /// Free-form description.
    pub description: Option<String>,
    /// Authorizing user, if any.
    pub authorizer_id: Option<UserId>,
    /// Authorizer display name at the time of posting.
    pub authorizer_name: Option<String>,
}

impl NewTransfer {
    /// Creates a transfer input without authorizer or description.
    #[must_use]
    pub fn new(source_id: AccountId, destination_id: AccountId, amount: Decimal) -> Self {
        Self {
            source_id,
            destination_id,
            amount,
            description: None,
            authorizer_id: None,
            authorizer_name: None,
        }
    }

    /// Records the authorizer and snapshots their display name.
    #[must_use]
    pub fn authorized_by(mut self, authorizer: Option<&UserRef>) -> Self {
        self.authorizer_id = authorizer.map(|user| user.id);
        self.authorizer_name = authorizer.map(|user| user.display_name().to_string());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: Option<&str>) -> Self {
        self.description = description.map(str::to_string);
        self
    }
}

/// An immutable, persisted transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// Unique identifier.
    pub id: TransferId,
    /// Debited account.
    pub source_id: AccountId,
    /// Credited account.
    pub destination_id: AccountId,
    /// Positive amount moved.
    pub amount: Decimal,
    /// Free-form description.
    pub description: Option<String>,
    /// Authorizing user; cleared if the user is later removed.
    pub authorizer_id: Option<UserId>,
    /// Authorizer display name, fixed at creation.
    pub authorizer_name: Option<String>,
    /// When the transfer was posted.
    pub created_at: DateTime<Utc>,
    /// The debit and credit entries, when loaded.
    #[serde(default)]
    pub entries: Vec<LedgerEntry>,
}

impl Transfer {
    /// Zero-padded reference used for display and lookup.
    #[must_use]
    pub fn reference(&self) -> String {
        reference_for(self.id)
    }

    /// Authorizer name as it was when the transfer was posted.
    #[must_use]
    pub fn authorizer_display_name(&self) -> Option<&str> {
        self.authorizer_name.as_deref()
    }

    /// The entry against the source account, when loaded.
    #[must_use]
    pub fn debit_entry(&self) -> Option<&LedgerEntry> {
        self.entries
            .iter()
            .find(|entry| entry.account_id == self.source_id)
    }

    /// The entry against the destination account, when loaded.
    #[must_use]
    pub fn credit_entry(&self) -> Option<&LedgerEntry> {
        self.entries
            .iter()
            .find(|entry| entry.account_id == self.destination_id)
    }

    /// Transfers cannot be deleted.
    ///
    /// # Errors
    ///
    /// Always.
    pub fn delete(&self) -> Result<(), TerminalOperationError> {
        Err(TerminalOperationError {
            record: ImmutableRecord::Transfer(self.id),
        })
    }
}

impl std::fmt::Display for Transfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reference())
    }
}
