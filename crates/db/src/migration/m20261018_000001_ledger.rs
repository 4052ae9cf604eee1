//! Ledger schema migration.
//!
//! Creates the accounts, transfers and ledger entries tables, their constraints,
//! and the triggers that keep transfers and entries append-only and balanced.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();

        // ============================================================
        // PART 1: TABLES
        // ============================================================
        db.execute_unprepared(ACCOUNTS_SQL).await?;
        db.execute_unprepared(TRANSFERS_SQL).await?;
        db.execute_unprepared(LEDGER_ENTRIES_SQL).await?;

        // ============================================================
        // PART 2: TRIGGERS
        // ============================================================
        db.execute_unprepared(IMMUTABILITY_TRIGGERS_SQL).await?;
        db.execute_unprepared(BALANCE_TRIGGERS_SQL).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(DROP_ALL_SQL).await?;
        Ok(())
    }
}

// ============================================================
// SQL CONSTANTS
// ============================================================

const ACCOUNTS_SQL: &str = r"
CREATE TABLE accounts (
    id BIGSERIAL PRIMARY KEY,
    name VARCHAR(255) UNIQUE,
    code VARCHAR(128) UNIQUE,
    status VARCHAR(16) NOT NULL DEFAULT 'Open',
    credit_limit NUMERIC(12, 2),
    balance NUMERIC(12, 2) NOT NULL DEFAULT 0,
    start_date DATE,
    end_date DATE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

    CONSTRAINT chk_account_status CHECK (status IN ('Open', 'Closed')),
    CONSTRAINT chk_account_credit_limit CHECK (credit_limit IS NULL OR credit_limit >= 0),
    CONSTRAINT chk_account_code_upper CHECK (code IS NULL OR code = UPPER(code))
);

CREATE INDEX idx_accounts_end_date ON accounts(end_date) WHERE end_date IS NOT NULL;
";

const TRANSFERS_SQL: &str = r"
CREATE TABLE transfers (
    id BIGSERIAL PRIMARY KEY,
    source_id BIGINT NOT NULL REFERENCES accounts(id),
    destination_id BIGINT NOT NULL REFERENCES accounts(id),
    amount NUMERIC(12, 2) NOT NULL,
    description TEXT,
    -- Identity lives elsewhere; the id may outlive the user, the name never changes
    authorizer_id UUID,
    authorizer_name VARCHAR(255),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

    CONSTRAINT chk_transfer_amount_positive CHECK (amount > 0),
    CONSTRAINT chk_transfer_distinct_parties CHECK (source_id <> destination_id)
);

CREATE INDEX idx_transfers_source ON transfers(source_id);
CREATE INDEX idx_transfers_destination ON transfers(destination_id);
";

const LEDGER_ENTRIES_SQL: &str = r"
CREATE TABLE ledger_entries (
    id BIGSERIAL PRIMARY KEY,
    transfer_id BIGINT NOT NULL REFERENCES transfers(id),
    account_id BIGINT NOT NULL REFERENCES accounts(id),
    amount NUMERIC(12, 2) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

    CONSTRAINT uq_ledger_entry_transfer_account UNIQUE (transfer_id, account_id),
    CONSTRAINT chk_ledger_entry_nonzero CHECK (amount <> 0)
);

CREATE INDEX idx_ledger_entries_account ON ledger_entries(account_id);
";

const IMMUTABILITY_TRIGGERS_SQL: &str = r"
-- ============================================================
-- FUNCTION: prevent_ledger_mutation
-- Transfers and ledger entries are append-only
-- ============================================================
CREATE OR REPLACE FUNCTION prevent_ledger_mutation()
RETURNS TRIGGER AS $$
BEGIN
    RAISE EXCEPTION 'Rows in % are immutable: % refused', TG_TABLE_NAME, TG_OP;
END;
$$ LANGUAGE plpgsql;

CREATE TRIGGER trg_transfers_immutable
BEFORE UPDATE OR DELETE ON transfers
FOR EACH ROW
EXECUTE FUNCTION prevent_ledger_mutation();

CREATE TRIGGER trg_ledger_entries_immutable
BEFORE UPDATE OR DELETE ON ledger_entries
FOR EACH ROW
EXECUTE FUNCTION prevent_ledger_mutation();
";

const BALANCE_TRIGGERS_SQL: &str = r"
-- ============================================================
-- FUNCTION: check_transfer_balance
-- At commit, every transfer owns exactly two entries summing to zero
-- ============================================================
CREATE OR REPLACE FUNCTION check_transfer_balance()
RETURNS TRIGGER AS $$
DECLARE
    target_id BIGINT;
    entry_count INTEGER;
    entry_total NUMERIC(14, 2);
BEGIN
    IF TG_TABLE_NAME = 'transfers' THEN
        target_id := NEW.id;
    ELSE
        target_id := NEW.transfer_id;
    END IF;

    SELECT COUNT(*), COALESCE(SUM(amount), 0)
    INTO entry_count, entry_total
    FROM ledger_entries
    WHERE transfer_id = target_id;

    IF entry_count <> 2 OR entry_total <> 0 THEN
        RAISE EXCEPTION 'Transfer % is not balanced. Entries: %, total: %',
            target_id, entry_count, entry_total;
    END IF;

    RETURN NEW;
END;
$$ LANGUAGE plpgsql;

CREATE CONSTRAINT TRIGGER trg_transfer_balanced
AFTER INSERT ON transfers
DEFERRABLE INITIALLY DEFERRED
FOR EACH ROW
EXECUTE FUNCTION check_transfer_balance();

CREATE CONSTRAINT TRIGGER trg_ledger_entry_balanced
AFTER INSERT ON ledger_entries
DEFERRABLE INITIALLY DEFERRED
FOR EACH ROW
EXECUTE FUNCTION check_transfer_balance();
";

const DROP_ALL_SQL: &str = r"
DROP TRIGGER IF EXISTS trg_ledger_entry_balanced ON ledger_entries;
DROP TRIGGER IF EXISTS trg_transfer_balanced ON transfers;
DROP TRIGGER IF EXISTS trg_ledger_entries_immutable ON ledger_entries;
DROP TRIGGER IF EXISTS trg_transfers_immutable ON transfers;
DROP FUNCTION IF EXISTS check_transfer_balance();
DROP FUNCTION IF EXISTS prevent_ledger_mutation();
DROP TABLE IF EXISTS ledger_entries;
DROP TABLE IF EXISTS transfers;
DROP TABLE IF EXISTS accounts;
";
