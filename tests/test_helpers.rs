// File: tests/test_helpers.rs
#![allow(dead_code)]

use std::sync::Arc;

use account_service::{
    AccountRepository, AccountService, AccountStore, BalanceResponder, InMemoryAccountRepository,
};
use api_gateway::{account_router, ledger_router, AccountState, LedgerState};
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use common::bus::MessageBus;
use common::decimal::Amount;
use common::InMemoryBus;
use ledger_service::{
    CoordinatorConfig, DeliveryMode, InMemoryLedgerRepository, LedgerCoordinator, LedgerRepository, RetryPolicy,
};
use serde_json::Value;
use tower::ServiceExt;

/// Both services, the bus between them and their HTTP routers, all in one process
pub struct Platform {
    pub account_service: Arc<AccountService>,
    pub coordinator: Arc<LedgerCoordinator>,
    pub ledger: Arc<dyn LedgerRepository>,
    pub accounts_api: Router,
    pub ledger_api: Router,
}

impl Platform {
    /// Wire the platform over the given repositories
    pub async fn start(
        account_repo: Arc<dyn AccountRepository>,
        ledger: Arc<dyn LedgerRepository>,
        delivery: DeliveryMode,
    ) -> Self {
        let account_service = Arc::new(AccountService::with_store(AccountStore::new(account_repo, true, 16)));

        let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::new());
        Arc::new(BalanceResponder::new(account_service.clone()))
            .spawn(bus.clone())
            .await
            .expect("Failed to start balance responder");

        let config = CoordinatorConfig {
            retry: RetryPolicy::immediate(),
            ..CoordinatorConfig::default().with_delivery(delivery)
        };
        let coordinator = Arc::new(LedgerCoordinator::new(ledger.clone(), bus, config));

        Self {
            accounts_api: account_router(Arc::new(AccountState { account_service: account_service.clone() })),
            ledger_api: ledger_router(Arc::new(LedgerState { coordinator: coordinator.clone() })),
            account_service,
            coordinator,
            ledger,
        }
    }

    /// Wire the platform over in-memory repositories
    pub async fn in_memory(delivery: DeliveryMode) -> Self {
        Self::start(
            Arc::new(InMemoryAccountRepository::new()),
            Arc::new(InMemoryLedgerRepository::new()),
            delivery,
        )
        .await
    }
}

/// Send one request through a router and decode the JSON reply
pub async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(value) => Body::from(value.to_string()),
            None => Body::empty(),
        })
        .unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

/// Read an amount that may be encoded as a JSON string or number
pub fn amount(value: &Value) -> Amount {
    match value {
        Value::String(s) => s.parse().unwrap(),
        other => other.to_string().parse().unwrap(),
    }
}

// Database test utilities
#[cfg(feature = "db_tests")]
use sqlx::{postgres::PgPoolOptions, PgPool};

#[cfg(feature = "db_tests")]
lazy_static::lazy_static! {
    static ref DB_INITIALIZATION: tokio::sync::OnceCell<()> = tokio::sync::OnceCell::new();
}

#[cfg(feature = "db_tests")]
pub struct DbTestContext {
    pub pool: PgPool,
}

#[cfg(feature = "db_tests")]
impl DbTestContext {
    // Create a new test database context
    pub async fn new() -> Self {
        dotenv::dotenv().ok();

        let db_url = std::env::var("TEST_DATABASE_URL")
            .expect("TEST_DATABASE_URL must be set for database tests");

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .expect("Failed to connect to test database");

        // Schema is migrated once per test run
        DB_INITIALIZATION
            .get_or_init(|| async {
                common::db::run_migrations(&pool)
                    .await
                    .expect("Failed to run database migrations");
            })
            .await;

        Self { pool }
    }

    // Clean up test data, children before parents
    pub async fn cleanup(&self) {
        for table in ["balance_outbox", "applied_deltas", "transactions", "users"] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&self.pool)
                .await
                .unwrap_or_else(|e| panic!("Failed to clean up {} table: {}", table, e));
        }
    }
}
