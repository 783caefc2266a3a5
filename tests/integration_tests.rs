// File: tests/integration_tests.rs

mod test_helpers;

use common::decimal::dec;
use ledger_service::DeliveryMode;
use serde_json::json;
use test_helpers::{amount, send, Platform};
use axum::http::StatusCode;

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

async fn balance_of(platform: &Platform, email: &str) -> rust_decimal::Decimal {
    let (status, body) = send(&platform.accounts_api, "GET", &format!("/balance?email={}", email), None).await;
    assert_eq!(status, StatusCode::OK);
    amount(&body["balance"])
}

#[tokio::test]
async fn test_credit_then_rejected_transfer() {
    let platform = Platform::in_memory(DeliveryMode::Synchronous).await;
    open_account(&platform, "alice@x", "100").await;
    open_account(&platform, "bob@x", "0").await;

    let (status, body) = send(
        &platform.ledger_api,
        "POST",
        "/transactions/add",
        Some(json!({ "email": "alice@x", "amount": 50.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(amount(&body["updated_balance"]), dec!(150));

    let (status, body) = send(
        &platform.ledger_api,
        "POST",
        "/transactions/transfer",
        Some(json!({ "from_email": "alice@x", "to_email": "bob@x", "amount": 200.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "insufficient_funds");

    assert_eq!(balance_of(&platform, "alice@x").await, dec!(150));
    assert_eq!(balance_of(&platform, "bob@x").await, dec!(0));

    let (status, user) = send(&platform.accounts_api, "GET", "/users?email=alice@x", None).await;
    assert_eq!(status, StatusCode::OK);
    let user_id = user["id"].as_str().unwrap().to_string();

    let entries = platform.ledger.entries_for_account(&user_id).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].amount, dec!(50));
}

#[tokio::test]
async fn test_transfer_moves_money_and_records_both_legs() {
    let platform = Platform::in_memory(DeliveryMode::Synchronous).await;
    open_account(&platform, "alice@x", "100").await;
    open_account(&platform, "bob@x", "0").await;

    let (status, body) = send(
        &platform.ledger_api,
        "POST",
        "/transactions/transfer",
        Some(json!({ "from_user_id": "alice@x", "to_user_id": "bob@x", "amount_to_transfer": "40" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(amount(&body["from_balance"]), dec!(60));

    assert_eq!(balance_of(&platform, "alice@x").await, dec!(60));
    assert_eq!(balance_of(&platform, "bob@x").await, dec!(40));

    let alice = platform.account_service.get_account("alice@x").await.unwrap();
    let bob = platform.account_service.get_account("bob@x").await.unwrap();
    let sent = platform.ledger.entries_for_account(&alice.id).await.unwrap();
    let received = platform.ledger.entries_for_account(&bob.id).await.unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(received.len(), 1);
    assert_eq!(sent[0].amount, dec!(-40));
    assert_eq!(received[0].amount, dec!(40));
}

#[tokio::test]
async fn test_outbox_mode_settles_through_the_bus() {
    let platform = Platform::in_memory(DeliveryMode::Outbox).await;
    open_account(&platform, "alice@x", "10").await;
    open_account(&platform, "bob@x", "0").await;

    let (status, body) = send(
        &platform.ledger_api,
        "POST",
        "/transactions/transfer",
        Some(json!({ "from_email": "alice@x", "to_email": "bob@x", "amount": "10" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");

    assert_eq!(balance_of(&platform, "alice@x").await, dec!(0));
    assert_eq!(balance_of(&platform, "bob@x").await, dec!(10));
    assert!(platform.ledger.pending_deltas(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_direct_balance_update_bypasses_ledger() {
    let platform = Platform::in_memory(DeliveryMode::Synchronous).await;
    open_account(&platform, "alice@x", "5").await;

    let (status, body) = send(
        &platform.accounts_api,
        "PUT",
        "/users/balance",
        Some(json!({ "email": "alice@x", "amount": "-7.25" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(amount(&body["balance"]), dec!(-2.25));

    let alice = platform.account_service.get_account("alice@x").await.unwrap();
    assert!(platform.ledger.entries_for_account(&alice.id).await.unwrap().is_empty());
}
