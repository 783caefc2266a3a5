use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use account_service::{AccountService, AccountStore, BalanceResponder, NewAccount, PostgresAccountRepository};
use common::bus::MessageBus;
use common::db::{init_db_pool, run_migrations};
use common::decimal::dec;
use common::error::Error;
use common::InMemoryBus;
use dotenv::dotenv;
use common::model::ledger::PendingDelta;
use ledger_service::{
    CoordinatorConfig, DeliveryMode, LedgerCoordinator, LedgerRepository, PostgresLedgerRepository,
    Settlement,
};
use tokio::test;

// PostgreSQL integration tests for the ledger service
// These tests require a running PostgreSQL database
// Run with: cargo test --test ledger_postgres_tests -- --ignored

fn unique_email(prefix: &str) -> String {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    format!("{}-{}@test", prefix, nanos)
}

struct Setup {
    accounts: Arc<AccountService>,
    ledger: Arc<PostgresLedgerRepository>,
    coordinator: LedgerCoordinator,
}

async fn setup(delivery: DeliveryMode) -> Setup {
    dotenv().ok();

    let database_url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set to run PostgreSQL tests");
    let pool = init_db_pool(&database_url, 5).await.expect("Failed to connect to test database");
    run_migrations(&pool).await.expect("Failed to run migrations");

    let repo = Arc::new(PostgresAccountRepository::from_pool(pool.clone()));
    let accounts = Arc::new(AccountService::with_store(AccountStore::new(repo, true, 16)));

    let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::new());
    Arc::new(BalanceResponder::new(accounts.clone()))
        .spawn(bus.clone())
        .await
        .unwrap();

    let ledger = Arc::new(PostgresLedgerRepository::from_pool(pool));
    let coordinator = LedgerCoordinator::new(
        ledger.clone(),
        bus,
        CoordinatorConfig::default().with_delivery(delivery),
    );

    Setup { accounts, ledger, coordinator }
}

async fn open(accounts: &AccountService, prefix: &str, balance: rust_decimal::Decimal) -> common::model::account::Account {
    accounts
        .create_account(NewAccount { id: None, email: unique_email(prefix), balance })
        .await
        .unwrap()
}

#[test]
#[ignore = "Requires test database"]
async fn test_postgres_transfer_writes_mirrored_rows() {
    let s = setup(DeliveryMode::Synchronous).await;
    let alice = open(&s.accounts, "alice", dec!(100)).await;
    let bob = open(&s.accounts, "bob", dec!(0)).await;

    s.coordinator.transfer(&alice.email, &bob.email, dec!(35.5)).await.unwrap();

    assert_eq!(s.accounts.get_balance(&alice.email).await.unwrap(), dec!(64.5));
    assert_eq!(s.accounts.get_balance(&bob.email).await.unwrap(), dec!(35.5));

    let debit = s.ledger.entries_for_account(&alice.id).await.unwrap();
    let credit = s.ledger.entries_for_account(&bob.id).await.unwrap();
    assert_eq!(debit.len(), 1);
    assert!(debit[0].mirrors(&credit[0]));
}

#[test]
#[ignore = "Requires test database"]
async fn test_postgres_insufficient_funds_rolls_back() {
    let s = setup(DeliveryMode::Synchronous).await;
    let alice = open(&s.accounts, "alice", dec!(10)).await;
    let bob = open(&s.accounts, "bob", dec!(0)).await;

    let result = s.coordinator.transfer(&alice.email, &bob.email, dec!(11)).await;
    assert!(matches!(result, Err(Error::InsufficientFunds(_))));
    assert!(s.ledger.entries_for_account(&alice.id).await.unwrap().is_empty());
}

#[test]
#[ignore = "Requires test database"]
async fn test_postgres_outbox_credit() {
    let s = setup(DeliveryMode::Outbox).await;
    let alice = open(&s.accounts, "alice", dec!(1)).await;

    let receipt = s.coordinator.credit(&alice.email, dec!(2)).await.unwrap();

    assert_eq!(receipt.settlement, Settlement::Applied { balance: dec!(3) });
    let pending = s.ledger.pending_deltas(1000).await.unwrap();
    assert!(pending.iter().all(|d| d.id != receipt.entry.id));
}

#[test]
#[ignore = "Requires test database"]
async fn test_postgres_outstanding_debits_and_parking() {
    let s = setup(DeliveryMode::Outbox).await;
    let alice = open(&s.accounts, "alice", dec!(10)).await;
    let bob = open(&s.accounts, "bob", dec!(0)).await;

    let mut tx = s.ledger.begin().await.unwrap();
    let (debit, _) = s.ledger.append_transfer_pair(&mut tx, &alice.id, &bob.id, dec!(4.25)).await.unwrap();
    s.ledger.enqueue_delta(&mut tx, &PendingDelta::for_entry(&debit, alice.email.clone())).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(s.ledger.outstanding_debits(&alice.email).await.unwrap(), dec!(4.25));
    assert_eq!(s.ledger.outstanding_debits(&bob.email).await.unwrap(), dec!(0));

    s.ledger.park(debit.id, "Validation error: refused").await.unwrap();
    assert_eq!(s.ledger.outstanding_debits(&alice.email).await.unwrap(), dec!(0));
    let pending = s.ledger.pending_deltas(1000).await.unwrap();
    assert!(pending.iter().all(|d| d.id != debit.id));
}
