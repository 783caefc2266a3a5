//! Transaction API handlers
//!
//! Credits and transfers go through the ledger coordinator. A 200 means the
//! balance change has been applied; a 202 means the ledger rows are committed
//! and the balance change is waiting in the outbox.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::decimal::Amount;
use ledger_service::Settlement;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ApiError;
use crate::LedgerState;

/// Credit request
#[derive(Debug, Deserialize, ToSchema)]
pub struct AddMoneyRequest {
    /// Account email
    #[serde(alias = "user_id")]
    pub email: String,
    /// Signed amount to credit
    pub amount: Amount,
}

/// Credit applied
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AddMoneyResponse {
    /// Balance after the credit
    pub updated_balance: Amount,
}

/// Transfer request
#[derive(Debug, Deserialize, ToSchema)]
pub struct TransferRequest {
    /// Sender email
    #[serde(alias = "from_user_id")]
    pub from_email: String,
    /// Recipient email
    #[serde(alias = "to_user_id")]
    pub to_email: String,
    /// Amount to move
    #[serde(alias = "amount_to_transfer")]
    pub amount: Amount,
}

/// Transfer applied
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TransferResponse {
    /// Always `completed`
    pub status: String,
    /// Sender balance after the transfer
    pub from_balance: Amount,
}

/// Ledger rows committed, balance change not yet confirmed
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PendingResponse {
    /// Always `pending`
    pub status: String,
    /// IDs of the committed ledger entries
    pub transaction_ids: Vec<Uuid>,
}

fn pending(transaction_ids: Vec<Uuid>) -> Response {
    let body = PendingResponse {
        status: "pending".to_string(),
        transaction_ids,
    };
    (StatusCode::ACCEPTED, Json(body)).into_response()
}

/// Credit an account
#[utoipa::path(
    post,
    path = "/transactions/add",
    request_body = AddMoneyRequest,
    responses(
        (status = 200, description = "Credit applied", body = AddMoneyResponse),
        (status = 202, description = "Credit recorded, balance update pending", body = PendingResponse),
        (status = 400, description = "Bad request"),
        (status = 404, description = "Account not found"),
        (status = 500, description = "Credit failed and was rolled back")
    ),
    tag = "transactions"
)]
pub async fn add_money(
    State(state): State<Arc<LedgerState>>,
    payload: Result<Json<AddMoneyRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;

    let receipt = state.coordinator.credit(&request.email, request.amount).await?;

    Ok(match receipt.settlement {
        Settlement::Applied { balance } => {
            Json(AddMoneyResponse { updated_balance: balance }).into_response()
        }
        Settlement::Pending => pending(vec![receipt.entry.id]),
    })
}

/// Transfer between two accounts
#[utoipa::path(
    post,
    path = "/transactions/transfer",
    request_body = TransferRequest,
    responses(
        (status = 200, description = "Transfer applied", body = TransferResponse),
        (status = 202, description = "Transfer recorded, balance updates pending", body = PendingResponse),
        (status = 400, description = "Bad request"),
        (status = 404, description = "Account not found"),
        (status = 500, description = "Transfer failed, including insufficient funds")
    ),
    tag = "transactions"
)]
pub async fn transfer_money(
    State(state): State<Arc<LedgerState>>,
    payload: Result<Json<TransferRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;

    let receipt = state.coordinator
        .transfer(&request.from_email, &request.to_email, request.amount)
        .await?;

    Ok(match receipt.settlement {
        Settlement::Applied { balance } => Json(TransferResponse {
            status: "completed".to_string(),
            from_balance: balance,
        })
        .into_response(),
        Settlement::Pending => pending(vec![receipt.debit.id, receipt.credit.id]),
    })
}
