//! Ledger core for Tally.
//!
//! This crate contains the double-entry ledger for stored value (gift cards, store
//! credit, wallets) with ZERO web or database dependencies. Persistence is injected
//! through the traits in [`ledger::store`].
//!
//! # Modules
//!
//! - `ledger` - Accounts, transfers, ledger entries and the transfer-posting protocol

pub mod ledger;
