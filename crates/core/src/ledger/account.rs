//! Stored-value accounts.
//!
//! An account's `balance` is a cache of the sum of its ledger entries. It is
//! recomputed every time the account is persisted and never adjusted incrementally.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_shared::config::LedgerConfig;
use tally_shared::types::AccountId;
use tally_shared::types::money;

use super::error::LedgerError;

/// Account lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountStatus {
    /// Account may send and receive transfers.
    Open,
    /// Account is retired; no transfer may touch it.
    Closed,
}

impl AccountStatus {
    /// Persisted representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::Closed => "Closed",
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Open" => Ok(Self::Open),
            "Closed" => Ok(Self::Closed),
            _ => Err(format!("Unknown account status: {s}")),
        }
    }
}

/// Activation codes are case-insensitive and stored uppercase.
#[must_use]
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Checks a credit limit and brings it to ledger scale.
///
/// # Errors
///
/// Returns `InvalidAmount` for a negative limit or one that does not fit the ledger scale.
pub fn normalize_credit_limit(limit: Option<Decimal>) -> Result<Option<Decimal>, LedgerError> {
    match limit {
        Some(limit) if limit < Decimal::ZERO => {
            Err(LedgerError::invalid_amount("credit limit cannot be negative"))
        }
        Some(limit) if !money::fits_ledger_scale(limit) => Err(LedgerError::invalid_amount(
            format!("credit limit {limit} does not fit the ledger scale"),
        )),
        Some(limit) => Ok(Some(money::to_ledger_scale(limit))),
        None => Ok(None),
    }
}

/// Balance implied by the ledger: the sum of entries, or zero when there are none.
#[must_use]
pub fn balance_from_sum(sum: Option<Decimal>) -> Decimal {
    money::to_ledger_scale(sum.unwrap_or(Decimal::ZERO))
}

/// A stored-value account (gift card, store credit, wallet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique identifier.
    pub id: AccountId,
    /// Optional unique name.
    pub name: Option<String>,
    /// Optional unique activation code, entered at checkout instead of a login.
    pub code: Option<String>,
    /// Lifecycle status.
    pub status: AccountStatus,
    /// How far the balance may go below zero; `None` means no limit.
    pub credit_limit: Option<Decimal>,
    /// Cached sum of this account's ledger entries.
    pub balance: Decimal,
    /// First day the account is active (inclusive).
    pub start_date: Option<NaiveDate>,
    /// Day the account stops being active (exclusive).
    pub end_date: Option<NaiveDate>,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Returns true if `today` falls within `[start_date, end_date)`.
    ///
    /// Either bound may be open. The window is informational: postings do not check it.
    #[must_use]
    pub fn is_active(&self, today: NaiveDate) -> bool {
        match (self.start_date, self.end_date) {
            (None, None) => true,
            (Some(start), None) => today >= start,
            (None, Some(end)) => today < end,
            (Some(start), Some(end)) => start <= today && today < end,
        }
    }

    /// Returns true if the activation window ended before `today`.
    #[must_use]
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.end_date.is_some_and(|end| end < today)
    }

    /// Returns true if the account can take part in transfers.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == AccountStatus::Open
    }

    /// Returns true if debits are bounded by a credit limit.
    #[must_use]
    pub fn has_credit_limit(&self) -> bool {
        self.credit_limit.is_some()
    }

    /// Funds that may still be debited; `None` when unlimited.
    #[must_use]
    pub fn available_funds(&self) -> Option<Decimal> {
        self.credit_limit.map(|limit| self.balance + limit)
    }

    /// Returns true if debiting `amount` keeps the balance at or above `-credit_limit`.
    #[must_use]
    pub fn is_debit_permitted(&self, amount: Decimal) -> bool {
        self.available_funds()
            .is_none_or(|available| amount <= available)
    }

    /// Checks that the account holds no positive funds.
    ///
    /// Accounts at zero or in debt may be closed.
    ///
    /// # Errors
    ///
    /// Returns `AccountNotEmpty` when the balance is positive.
    pub fn ensure_closable(&self) -> Result<(), LedgerError> {
        if self.balance > Decimal::ZERO {
            return Err(LedgerError::AccountNotEmpty {
                account: self.id,
                balance: self.balance,
            });
        }
        Ok(())
    }

    /// Prepares the account for persistence: uppercases the code and replaces the
    /// cached balance with the ledger sum.
    pub fn normalize_for_save(&mut self, ledger_sum: Option<Decimal>) {
        if let Some(code) = self.code.as_deref() {
            self.code = Some(normalize_code(code));
        }
        self.balance = balance_from_sum(ledger_sum);
    }

    /// Human-readable label.
    #[must_use]
    pub fn label(&self) -> String {
        match (&self.name, &self.code) {
            (Some(name), _) => name.clone(),
            (None, Some(code)) => format!("Code account - {code}"),
            (None, None) => "Anonymous account".to_string(),
        }
    }
}

impl std::fmt::Display for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

/// Input for creating an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    /// Optional unique name.
    pub name: Option<String>,
    /// Optional unique activation code.
    pub code: Option<String>,
    /// Credit limit; `None` means unlimited.
    pub credit_limit: Option<Decimal>,
    /// First active day.
    pub start_date: Option<NaiveDate>,
    /// First inactive day.
    pub end_date: Option<NaiveDate>,
}

impl Default for NewAccount {
    fn default() -> Self {
        Self::new()
    }
}

impl NewAccount {
    /// An anonymous account that cannot go below zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: None,
            code: None,
            credit_limit: Some(money::zero()),
            start_date: None,
            end_date: None,
        }
    }

    /// An anonymous account using the configured default credit limit.
    #[must_use]
    pub fn from_config(config: &LedgerConfig) -> Self {
        Self {
            credit_limit: config.credit_limit_for_new_accounts(),
            ..Self::new()
        }
    }

    /// Sets the name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the activation code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Sets the credit limit (`None` for unlimited).
    #[must_use]
    pub fn with_credit_limit(mut self, credit_limit: Option<Decimal>) -> Self {
        self.credit_limit = credit_limit;
        self
    }

    /// Sets the activation window.
    #[must_use]
    pub fn with_activation_window(
        mut self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Self {
        self.start_date = start_date;
        self.end_date = end_date;
        self
    }

    /// Validates the input and returns the form that gets persisted.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAmount` if the credit limit is negative or too precise.
    pub fn normalized(&self) -> Result<Self, LedgerError> {
        let credit_limit = normalize_credit_limit(self.credit_limit)?;

        Ok(Self {
            name: self.name.clone(),
            code: self.code.as_deref().map(normalize_code),
            credit_limit,
            start_date: self.start_date,
            end_date: self.end_date,
        })
    }
}
