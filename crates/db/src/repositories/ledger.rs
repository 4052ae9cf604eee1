//! PostgreSQL implementation of the ledger storage seam.
//!
//! Every unit of work is one database transaction. Account rows are locked with
//! `SELECT ... FOR UPDATE`; balances are aggregated with `SUM` in the database.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ActiveValue::Unchanged, ColumnTrait, ConnectionTrait,
    DatabaseConnection, DatabaseTransaction, DbBackend, DbErr, EntityTrait, FromQueryResult,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, RuntimeErr, SqlErr, Statement,
    TransactionTrait,
};
use tally_core::ledger::account::{Account, AccountStatus, NewAccount};
use tally_core::ledger::entry::{LedgerEntry, NewLedgerEntry};
use tally_core::ledger::store::{BalanceMismatch, LedgerStore, LedgerTx, StoreError};
use tally_core::ledger::transfer::{NewTransfer, Transfer};
use tally_shared::config::DatabaseConfig;
use tally_shared::types::money;
use tally_shared::types::{AccountId, LedgerEntryId, TransferId, UserId};
use tracing::debug;

use crate::entities::{accounts, ledger_entries, transfers};

/// Ledger store backed by a PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct SeaOrmLedgerStore {
    db: DatabaseConnection,
    lock_timeout_ms: u64,
}

impl SeaOrmLedgerStore {
    /// Creates a store that waits for row locks indefinitely.
    #[must_use]
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            lock_timeout_ms: 0,
        }
    }

    /// Creates a store using the configured lock timeout.
    #[must_use]
    pub fn from_config(db: DatabaseConnection, config: &DatabaseConfig) -> Self {
        Self::new(db).with_lock_timeout(config.lock_timeout_ms)
    }

    /// Fails a unit with a transient error once it waits this long for a row lock.
    #[must_use]
    pub fn with_lock_timeout(mut self, lock_timeout_ms: u64) -> Self {
        self.lock_timeout_ms = lock_timeout_ms;
        self
    }

    /// The underlying connection.
    #[must_use]
    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[async_trait]
impl LedgerStore for SeaOrmLedgerStore {
    type Tx = SeaOrmLedgerTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let txn = self.db.begin().await.map_err(store_error)?;
        if self.lock_timeout_ms > 0 {
            txn.execute_unprepared(&format!(
                "SET LOCAL lock_timeout = '{}ms'",
                self.lock_timeout_ms
            ))
            .await
            .map_err(store_error)?;
        }
        Ok(SeaOrmLedgerTx { txn })
    }
}

/// One database transaction. Dropping it without committing rolls it back.
pub struct SeaOrmLedgerTx {
    txn: DatabaseTransaction,
}

impl std::fmt::Debug for SeaOrmLedgerTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeaOrmLedgerTx").finish_non_exhaustive()
    }
}

#[derive(Debug, FromQueryResult)]
struct AmountTotal {
    total: Option<Decimal>,
}

#[derive(Debug, FromQueryResult)]
struct TransferIdRow {
    id: i64,
}

#[derive(Debug, FromQueryResult)]
struct MismatchRow {
    account_id: i64,
    cached: Decimal,
    ledger: Decimal,
}

const LEDGER_TOTAL_SQL: &str = "SELECT SUM(amount) AS total FROM ledger_entries";

const UNBALANCED_TRANSFERS_SQL: &str = r"
SELECT t.id
FROM transfers t
LEFT JOIN ledger_entries e ON e.transfer_id = t.id
GROUP BY t.id
HAVING COUNT(e.id) <> 2 OR COALESCE(SUM(e.amount), 0) <> 0
ORDER BY t.id
";

const BALANCE_MISMATCHES_SQL: &str = r"
SELECT a.id AS account_id, a.balance AS cached, COALESCE(SUM(e.amount), 0) AS ledger
FROM accounts a
LEFT JOIN ledger_entries e ON e.account_id = a.id
GROUP BY a.id, a.balance
HAVING a.balance <> COALESCE(SUM(e.amount), 0)
ORDER BY a.id
";

#[async_trait]
impl LedgerTx for SeaOrmLedgerTx {
    async fn insert_account(&mut self, account: &NewAccount) -> Result<Account, StoreError> {
        let model = accounts::ActiveModel {
            name: Set(account.name.clone()),
            code: Set(account.code.clone()),
            status: Set(AccountStatus::Open.as_str().to_string()),
            credit_limit: Set(account.credit_limit),
            balance: Set(money::zero()),
            start_date: Set(account.start_date),
            end_date: Set(account.end_date),
            ..Default::default()
        }
        .insert(&self.txn)
        .await
        .map_err(store_error)?;

        account_from_model(model)
    }

    async fn find_account(&mut self, id: AccountId) -> Result<Option<Account>, StoreError> {
        accounts::Entity::find_by_id(id.into_inner())
            .one(&self.txn)
            .await
            .map_err(store_error)?
            .map(account_from_model)
            .transpose()
    }

    async fn lock_account(&mut self, id: AccountId) -> Result<Option<Account>, StoreError> {
        accounts::Entity::find_by_id(id.into_inner())
            .lock_exclusive()
            .one(&self.txn)
            .await
            .map_err(store_error)?
            .map(account_from_model)
            .transpose()
    }

    async fn update_account(&mut self, account: &Account) -> Result<(), StoreError> {
        accounts::ActiveModel {
            id: Unchanged(account.id.into_inner()),
            name: Set(account.name.clone()),
            code: Set(account.code.clone()),
            status: Set(account.status.as_str().to_string()),
            credit_limit: Set(account.credit_limit),
            balance: Set(account.balance),
            start_date: Set(account.start_date),
            end_date: Set(account.end_date),
            ..Default::default()
        }
        .update(&self.txn)
        .await
        .map_err(store_error)?;
        Ok(())
    }

    async fn insert_transfer(&mut self, transfer: &NewTransfer) -> Result<Transfer, StoreError> {
        let model = transfers::ActiveModel {
            source_id: Set(transfer.source_id.into_inner()),
            destination_id: Set(transfer.destination_id.into_inner()),
            amount: Set(transfer.amount),
            description: Set(transfer.description.clone()),
            authorizer_id: Set(transfer.authorizer_id.map(UserId::into_inner)),
            authorizer_name: Set(transfer.authorizer_name.clone()),
            ..Default::default()
        }
        .insert(&self.txn)
        .await
        .map_err(store_error)?;

        Ok(transfer_from_model(model))
    }

    async fn find_transfer(&mut self, id: TransferId) -> Result<Option<Transfer>, StoreError> {
        Ok(transfers::Entity::find_by_id(id.into_inner())
            .one(&self.txn)
            .await
            .map_err(store_error)?
            .map(transfer_from_model))
    }

    async fn insert_entry(&mut self, entry: &NewLedgerEntry) -> Result<LedgerEntry, StoreError> {
        let model = ledger_entries::ActiveModel {
            transfer_id: Set(entry.transfer_id.into_inner()),
            account_id: Set(entry.account_id.into_inner()),
            amount: Set(entry.amount),
            ..Default::default()
        }
        .insert(&self.txn)
        .await
        .map_err(store_error)?;

        Ok(entry_from_model(model))
    }

    async fn entries_for_transfer(
        &mut self,
        id: TransferId,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let models = ledger_entries::Entity::find()
            .filter(ledger_entries::Column::TransferId.eq(id.into_inner()))
            .order_by_asc(ledger_entries::Column::Id)
            .all(&self.txn)
            .await
            .map_err(store_error)?;
        Ok(models.into_iter().map(entry_from_model).collect())
    }

    async fn entries_for_account(&mut self, id: AccountId) -> Result<Vec<LedgerEntry>, StoreError> {
        let models = ledger_entries::Entity::find()
            .filter(ledger_entries::Column::AccountId.eq(id.into_inner()))
            .order_by_asc(ledger_entries::Column::Id)
            .all(&self.txn)
            .await
            .map_err(store_error)?;
        Ok(models.into_iter().map(entry_from_model).collect())
    }

    async fn count_entries_for(&mut self, id: AccountId) -> Result<u64, StoreError> {
        ledger_entries::Entity::find()
            .filter(ledger_entries::Column::AccountId.eq(id.into_inner()))
            .count(&self.txn)
            .await
            .map_err(store_error)
    }

    async fn sum_amounts_for(&mut self, id: AccountId) -> Result<Option<Decimal>, StoreError> {
        let row = ledger_entries::Entity::find()
            .select_only()
            .column_as(Expr::col(ledger_entries::Column::Amount).sum(), "total")
            .filter(ledger_entries::Column::AccountId.eq(id.into_inner()))
            .into_model::<AmountTotal>()
            .one(&self.txn)
            .await
            .map_err(store_error)?;
        Ok(row.and_then(|row| row.total))
    }

    async fn ledger_total(&mut self) -> Result<Decimal, StoreError> {
        let row = AmountTotal::find_by_statement(Statement::from_string(
            DbBackend::Postgres,
            LEDGER_TOTAL_SQL,
        ))
        .one(&self.txn)
        .await
        .map_err(store_error)?;
        Ok(money::to_ledger_scale(
            row.and_then(|row| row.total).unwrap_or(Decimal::ZERO),
        ))
    }

    async fn unbalanced_transfers(&mut self) -> Result<Vec<TransferId>, StoreError> {
        let rows = TransferIdRow::find_by_statement(Statement::from_string(
            DbBackend::Postgres,
            UNBALANCED_TRANSFERS_SQL,
        ))
        .all(&self.txn)
        .await
        .map_err(store_error)?;
        Ok(rows.into_iter().map(|row| TransferId::new(row.id)).collect())
    }

    async fn balance_mismatches(&mut self) -> Result<Vec<BalanceMismatch>, StoreError> {
        let rows = MismatchRow::find_by_statement(Statement::from_string(
            DbBackend::Postgres,
            BALANCE_MISMATCHES_SQL,
        ))
        .all(&self.txn)
        .await
        .map_err(store_error)?;
        Ok(rows
            .into_iter()
            .map(|row| BalanceMismatch {
                account_id: AccountId::new(row.account_id),
                cached: row.cached,
                ledger: money::to_ledger_scale(row.ledger),
            })
            .collect())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.txn.commit().await.map_err(store_error)
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.txn.rollback().await.map_err(store_error)
    }
}

fn account_from_model(model: accounts::Model) -> Result<Account, StoreError> {
    let status = model
        .status
        .parse::<AccountStatus>()
        .map_err(StoreError::backend)?;
    Ok(Account {
        id: AccountId::new(model.id),
        name: model.name,
        code: model.code,
        status,
        credit_limit: model.credit_limit,
        balance: model.balance,
        start_date: model.start_date,
        end_date: model.end_date,
        created_at: model.created_at.with_timezone(&Utc),
    })
}

fn transfer_from_model(model: transfers::Model) -> Transfer {
    Transfer {
        id: TransferId::new(model.id),
        source_id: AccountId::new(model.source_id),
        destination_id: AccountId::new(model.destination_id),
        amount: model.amount,
        description: model.description,
        authorizer_id: model.authorizer_id.map(UserId::from_uuid),
        authorizer_name: model.authorizer_name,
        created_at: model.created_at.with_timezone(&Utc),
        entries: Vec::new(),
    }
}

fn entry_from_model(model: ledger_entries::Model) -> LedgerEntry {
    LedgerEntry {
        id: LedgerEntryId::new(model.id),
        transfer_id: TransferId::new(model.transfer_id),
        account_id: AccountId::new(model.account_id),
        amount: model.amount,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

/// Classifies a database error for the ledger.
pub(crate) fn store_error(err: DbErr) -> StoreError {
    let message = err.to_string();
    let classified = match &err {
        DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => StoreError::transient(message),
        DbErr::RecordNotFound(_) | DbErr::RecordNotUpdated => StoreError::not_found(message),
        DbErr::Exec(RuntimeErr::SqlxError(source)) | DbErr::Query(RuntimeErr::SqlxError(source)) => {
            match source {
                sqlx::Error::Database(db_err) => match db_err.code() {
                    Some(code) => classify_sqlstate(&code, message),
                    None => StoreError::backend(message),
                },
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                    StoreError::transient(message)
                }
                _ => StoreError::backend(message),
            }
        }
        _ => match err.sql_err() {
            Some(
                SqlErr::UniqueConstraintViolation(_) | SqlErr::ForeignKeyConstraintViolation(_),
            ) => StoreError::constraint(message),
            _ => StoreError::backend(message),
        },
    };
    debug!(error = %classified, "Database error");
    classified
}

/// Maps a PostgreSQL SQLSTATE onto a storage error kind.
fn classify_sqlstate(code: &str, message: String) -> StoreError {
    match code {
        // lock_not_available, deadlock_detected, serialization_failure, query_canceled
        "55P03" | "40P01" | "40001" | "57014" => StoreError::transient(message),
        // connection_exception class
        code if code.starts_with("08") => StoreError::transient(message),
        // integrity_constraint_violation class, and exceptions raised by ledger triggers
        code if code.starts_with("23") || code == "P0001" => StoreError::constraint(message),
        _ => StoreError::backend(message),
    }
}
