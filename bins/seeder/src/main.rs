//! Database seeder for Tally development and testing.
//!
//! Seeds an issuance reserve, a handful of gift cards and wallets, and demo
//! transfers between them. Every transfer goes through the real poster, so the
//! seeded ledger satisfies the same invariants as production data.
//!
//! Usage: cargo run --bin seeder

use anyhow::Context;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use tally_core::ledger::account::normalize_code;
use tally_core::ledger::{
    Account, AccountBook, AuditTrail, LedgerError, LedgerStore, NewAccount, Transfer,
    TransferPoster,
};
use tally_db::SeaOrmLedgerStore;
use tally_db::entities::accounts;
use tally_shared::AppConfig;
use tally_shared::config::LoggingConfig;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Code of the account every seeded card is funded from.
const RESERVE_CODE: &str = "SEED-RESERVE";

/// Gift cards: (code, opening balance in cents).
const GIFT_CARDS: [(&str, i64); 3] = [
    ("SEED-GIFT-0001", 5_000),
    ("SEED-GIFT-0002", 2_500),
    ("SEED-GIFT-0003", 10_000),
];

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let registry = tracing_subscriber::registry().with(filter);
    if logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;
    init_tracing(&config.logging);

    let db = tally_db::connect(&config.database)
        .await
        .context("Failed to connect to database")?;
    let store = SeaOrmLedgerStore::from_config(db, &config.database);
    let book = AccountBook::new(store.clone());
    let poster = TransferPoster::new(store.clone());
    let audit = AuditTrail::new(store.clone());

    info!("Seeding issuance reserve");
    let mut reserve = find_or_open(
        &store,
        &book,
        NewAccount::new()
            .with_name("Seed issuance reserve")
            .with_code(RESERVE_CODE)
            .with_credit_limit(None),
    )
    .await?;

    info!("Seeding gift cards");
    let today = Utc::now().date_naive();
    let mut cards = Vec::with_capacity(GIFT_CARDS.len());
    for (code, cents) in GIFT_CARDS {
        let mut card = find_or_open(
            &store,
            &book,
            NewAccount::from_config(&config.ledger)
                .with_code(code)
                .with_activation_window(Some(today), Some(today + Duration::days(365))),
        )
        .await?;

        if card.balance.is_zero() {
            poster
                .post(
                    &mut reserve,
                    &mut card,
                    Decimal::new(cents, 2),
                    None,
                    Some("Seed card issuance"),
                )
                .await?;
        } else {
            info!(account = %card.id, "Gift card already funded, skipping");
        }
        cards.push(card);
    }

    info!("Seeding wallet");
    let mut wallet = find_or_open(
        &store,
        &book,
        NewAccount::from_config(&config.ledger).with_name("Seed wallet"),
    )
    .await?;

    if let Some(card) = cards.first_mut() {
        match redeem_once(&audit, &poster, card, &mut wallet, Decimal::new(1_250, 2)).await {
            Ok(Some(transfer)) => info!(transfer = %transfer, "Demo redemption posted"),
            Ok(None) => info!(account = %wallet.id, "Wallet already funded, skipping"),
            Err(err @ LedgerError::InsufficientFunds { .. }) => {
                warn!(error = %err, "Demo redemption skipped");
            }
            Err(err) => return Err(err.into()),
        }
    }

    let report = audit.verify_integrity().await?;
    anyhow::ensure!(report.is_consistent(), "Seeded ledger is inconsistent: {report:?}");

    cards.push(wallet);
    cards.insert(0, reserve);
    println!("{}", serde_json::to_string_pretty(&cards)?);
    info!("Seeding complete");
    Ok(())
}

/// Returns the account with the same code or name, opening it if there is none.
async fn find_or_open(
    store: &SeaOrmLedgerStore,
    book: &AccountBook<SeaOrmLedgerStore>,
    account: NewAccount,
) -> anyhow::Result<Account> {
    let existing = match lookup_key(&account) {
        Some((column, value)) => {
            accounts::Entity::find()
                .filter(column.eq(value))
                .one(store.connection())
                .await?
        }
        None => None,
    };

    match existing {
        Some(model) => {
            info!(account = model.id, "Account already exists, skipping");
            Ok(book.get(model.id.into()).await?)
        }
        None => Ok(book.open(account).await?),
    }
}

/// Column and stored value identifying an existing seeded account.
fn lookup_key(account: &NewAccount) -> Option<(accounts::Column, String)> {
    match (&account.code, &account.name) {
        (Some(code), _) => Some((accounts::Column::Code, normalize_code(code))),
        (None, Some(name)) => Some((accounts::Column::Name, name.clone())),
        (None, None) => None,
    }
}

/// Posts the demo redemption unless `wallet` already has ledger entries.
async fn redeem_once<S: LedgerStore>(
    audit: &AuditTrail<S>,
    poster: &TransferPoster<S>,
    card: &mut Account,
    wallet: &mut Account,
    amount: Decimal,
) -> Result<Option<Transfer>, LedgerError> {
    if audit.entry_count(wallet.id).await? > 0 {
        return Ok(None);
    }
    poster
        .post(card, wallet, amount, None, Some("Seed redemption into wallet"))
        .await
        .map(Some)
}
