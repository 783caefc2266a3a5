//! User API handlers
//!
//! Handles endpoints of the account service:
//! - Create a user
//! - Look a user up by email
//! - Apply a balance delta
//! - Read a balance

use std::sync::Arc;

use account_service::NewAccount;
use axum::{
    extract::{rejection::{JsonRejection, QueryRejection}, Query, State},
    http::StatusCode,
    Json,
};
use common::decimal::Amount;
use common::model::account::Account;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::AccountState;

/// Create user request
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateUserRequest {
    /// Optional caller-chosen ID; generated when absent
    #[serde(default)]
    pub id: Option<String>,
    /// Unique email
    pub email: String,
    /// Opening balance
    #[serde(default)]
    pub balance: Amount,
}

/// Email query parameter
#[derive(Debug, Deserialize)]
pub struct EmailQuery {
    /// Account email
    pub email: String,
}

/// Balance update request
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateBalanceRequest {
    /// Account email
    pub email: String,
    /// Signed delta to apply
    pub amount: Amount,
}

/// Balance of one account
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    /// Account email
    pub email: String,
    /// Current balance
    pub balance: Amount,
}

/// Create a new user
#[utoipa::path(
    post,
    path = "/users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created", body = Account),
        (status = 400, description = "Bad request"),
        (status = 409, description = "Email already registered"),
        (status = 500, description = "Internal server error")
    ),
    tag = "users"
)]
pub async fn create_user(
    State(state): State<Arc<AccountState>>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Account>), ApiError> {
    let Json(request) = payload?;

    let account = state.account_service
        .create_account(NewAccount {
            id: request.id,
            email: request.email,
            balance: request.balance,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(account)))
}

/// Get a user by email
#[utoipa::path(
    get,
    path = "/users",
    params(
        ("email" = String, Query, description = "Account email")
    ),
    responses(
        (status = 200, description = "User found", body = Account),
        (status = 404, description = "User not found"),
        (status = 500, description = "Internal server error")
    ),
    tag = "users"
)]
pub async fn get_user(
    State(state): State<Arc<AccountState>>,
    query: Result<Query<EmailQuery>, QueryRejection>,
) -> Result<Json<Account>, ApiError> {
    let Query(query) = query?;
    let account = state.account_service.get_account(&query.email).await?;
    Ok(Json(account))
}

/// Add a signed amount to a user's balance
#[utoipa::path(
    put,
    path = "/users/balance",
    request_body = UpdateBalanceRequest,
    responses(
        (status = 200, description = "Balance updated", body = BalanceResponse),
        (status = 400, description = "Bad request"),
        (status = 404, description = "User not found"),
        (status = 500, description = "Internal server error")
    ),
    tag = "users"
)]
pub async fn update_balance(
    State(state): State<Arc<AccountState>>,
    payload: Result<Json<UpdateBalanceRequest>, JsonRejection>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let Json(request) = payload?;

    let account = state.account_service
        .update_balance(&request.email, request.amount)
        .await?;

    Ok(Json(BalanceResponse {
        email: account.email,
        balance: account.balance,
    }))
}

/// Get a user's balance
#[utoipa::path(
    get,
    path = "/balance",
    params(
        ("email" = String, Query, description = "Account email")
    ),
    responses(
        (status = 200, description = "Current balance", body = BalanceResponse),
        (status = 404, description = "User not found"),
        (status = 500, description = "Internal server error")
    ),
    tag = "users"
)]
pub async fn get_balance(
    State(state): State<Arc<AccountState>>,
    query: Result<Query<EmailQuery>, QueryRejection>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let Query(query) = query?;
    let balance = state.account_service.get_balance(&query.email).await?;

    Ok(Json(BalanceResponse {
        email: query.email,
        balance,
    }))
}
