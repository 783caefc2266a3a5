use account_service::{AccountService, NewAccount, PostgresAccountRepository, AccountStore};
use common::db::{init_db_pool, run_migrations};
use common::decimal::dec;
use common::error::Error;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::test;

use dotenv::dotenv;

// PostgreSQL integration tests for account service
// These tests require a running PostgreSQL database
// Run with: cargo test --test account_postgres_tests -- --ignored

// Emails are unique per run so tests can share one database
fn unique_email(prefix: &str) -> String {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    format!("{}-{}@test", prefix, nanos)
}

async fn create_test_service() -> AccountService {
    dotenv().ok(); // Load .env.test if it exists

    let database_url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set to run PostgreSQL tests");

    let pool = init_db_pool(&database_url, 5).await.expect("Failed to connect to test database");
    run_migrations(&pool).await.expect("Failed to run migrations");

    let repo = Arc::new(PostgresAccountRepository::from_pool(pool));
    AccountService::with_store(AccountStore::new(repo, true, 16))
}

#[test]
#[ignore = "Requires test database"]
async fn test_postgres_account_creation() {
    let service = create_test_service().await;
    let email = unique_email("create");

    let account = service
        .create_account(NewAccount { id: None, email: email.clone(), balance: dec!(100) })
        .await
        .unwrap();

    let retrieved = service.get_account(&email).await.unwrap();
    assert_eq!(retrieved.id, account.id);
    assert_eq!(retrieved.balance, dec!(100));
}

#[test]
#[ignore = "Requires test database"]
async fn test_postgres_duplicate_email() {
    let service = create_test_service().await;
    let email = unique_email("dup");

    service
        .create_account(NewAccount { id: None, email: email.clone(), balance: dec!(1) })
        .await
        .unwrap();
    let result = service
        .create_account(NewAccount { id: None, email: email.clone(), balance: dec!(2) })
        .await;

    assert!(matches!(result, Err(Error::AlreadyExists(_))));
}

#[test]
#[ignore = "Requires test database"]
async fn test_postgres_balance_operations() {
    let service = create_test_service().await;
    let email = unique_email("balance");
    service
        .create_account(NewAccount { id: None, email: email.clone(), balance: dec!(100) })
        .await
        .unwrap();

    let account = service.update_balance(&email, dec!(-30.25)).await.unwrap();
    assert_eq!(account.balance, dec!(69.75));

    let key = format!("key-{}", email);
    let once = service.update_balance_once(&email, dec!(10), &key).await.unwrap();
    let again = service.update_balance_once(&email, dec!(10), &key).await.unwrap();
    assert_eq!(once.balance, dec!(79.75));
    assert_eq!(again.balance, dec!(79.75));
}
