// Database persistence tests for the whole platform
// Run with: TEST_DATABASE_URL=... cargo test --features db_tests --test db_tests -- --test-threads=1

#[cfg(feature = "db_tests")]
mod test_helpers;

#[cfg(feature = "db_tests")]
mod db_persistence_tests {
    use std::sync::Arc;

    use account_service::PostgresAccountRepository;
    use axum::http::StatusCode;
    use common::decimal::dec;
    use ledger_service::{DeliveryMode, PostgresLedgerRepository};
    use rust_decimal::Decimal;
    use serde_json::json;
    use sqlx::Row;

    use crate::test_helpers::{amount, send, DbTestContext, Platform};

    async fn platform(ctx: &DbTestContext, delivery: DeliveryMode) -> Platform {
        Platform::start(
            Arc::new(PostgresAccountRepository::from_pool(ctx.pool.clone())),
            Arc::new(PostgresLedgerRepository::from_pool(ctx.pool.clone())),
            delivery,
        )
        .await
    }

    async fn open_account(platform: &Platform, email: &str, balance: &str) {
        let (status, _) = send(
            &platform.accounts_api,
            "POST",
            "/users",
            Some(json!({ "email": email, "balance": balance })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    async fn stored_balance(ctx: &DbTestContext, email: &str) -> Decimal {
        sqlx::query("SELECT balance FROM users WHERE email = $1")
            .bind(email)
            .fetch_one(&ctx.pool)
            .await
            .expect("Failed to read balance")
            .get("balance")
    }

    #[tokio::test]
    async fn test_credit_and_rejected_transfer_persist() {
        let ctx = DbTestContext::new().await;
        ctx.cleanup().await;
        let platform = platform(&ctx, DeliveryMode::Synchronous).await;

        open_account(&platform, "alice@x", "100").await;
        open_account(&platform, "bob@x", "0").await;

        let (status, body) = send(
            &platform.ledger_api,
            "POST",
            "/transactions/add",
            Some(json!({ "email": "alice@x", "amount": "50" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(amount(&body["updated_balance"]), dec!(150));

        let (status, _) = send(
            &platform.ledger_api,
            "POST",
            "/transactions/transfer",
            Some(json!({ "from_email": "alice@x", "to_email": "bob@x", "amount": "200" })),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        assert_eq!(stored_balance(&ctx, "alice@x").await, dec!(150));
        assert_eq!(stored_balance(&ctx, "bob@x").await, dec!(0));

        let rows: i64 = sqlx::query("SELECT COUNT(*) AS n FROM transactions")
            .fetch_one(&ctx.pool)
            .await
            .unwrap()
            .get("n");
        assert_eq!(rows, 1);

        // Synchronous requests are not keyed, so nothing is remembered
        let applied: i64 = sqlx::query("SELECT COUNT(*) AS n FROM applied_deltas")
            .fetch_one(&ctx.pool)
            .await
            .unwrap()
            .get("n");
        assert_eq!(applied, 0);

        ctx.cleanup().await;
    }

    #[tokio::test]
    async fn test_outbox_transfer_marks_deltas_delivered() {
        let ctx = DbTestContext::new().await;
        ctx.cleanup().await;
        let platform = platform(&ctx, DeliveryMode::Outbox).await;

        open_account(&platform, "alice@x", "30").await;
        open_account(&platform, "bob@x", "0").await;

        let (status, _) = send(
            &platform.ledger_api,
            "POST",
            "/transactions/transfer",
            Some(json!({ "from_email": "alice@x", "to_email": "bob@x", "amount": "30" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        assert_eq!(stored_balance(&ctx, "alice@x").await, dec!(0));
        assert_eq!(stored_balance(&ctx, "bob@x").await, dec!(30));

        let undelivered: i64 = sqlx::query("SELECT COUNT(*) AS n FROM balance_outbox WHERE delivered_at IS NULL")
            .fetch_one(&ctx.pool)
            .await
            .unwrap()
            .get("n");
        assert_eq!(undelivered, 0);

        let applied: i64 = sqlx::query("SELECT COUNT(*) AS n FROM applied_deltas")
            .fetch_one(&ctx.pool)
            .await
            .unwrap()
            .get("n");
        assert_eq!(applied, 2);

        ctx.cleanup().await;
    }
}
