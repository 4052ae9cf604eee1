//! `SeaORM` entities for the ledger tables.

pub mod accounts;
pub mod ledger_entries;
pub mod transfers;
