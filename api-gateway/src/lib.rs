//! HTTP surfaces of the wallet platform
//!
//! Two routers: the account API (users and balances) and the ledger API
//! (credits and transfers). Each serves its own OpenAPI document under
//! `/swagger-ui`.

pub mod api;
pub mod config;
pub mod error;

use std::sync::Arc;

use account_service::AccountService;
use axum::{
    routing::{get, post, put},
    Router,
};
use ledger_service::LedgerCoordinator;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::transactions::{add_money, transfer_money};
use crate::api::users::{create_user, get_balance, get_user, update_balance};

pub use config::GatewayConfig;
pub use error::{ApiError, ErrorResponse};

/// State shared by the account API handlers
pub struct AccountState {
    /// Account service
    pub account_service: Arc<AccountService>,
}

/// State shared by the ledger API handlers
pub struct LedgerState {
    /// Ledger coordinator
    pub coordinator: Arc<LedgerCoordinator>,
}

/// Account API documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        api::users::create_user,
        api::users::get_user,
        api::users::update_balance,
        api::users::get_balance,
    ),
    components(
        schemas(
            api::users::CreateUserRequest,
            api::users::UpdateBalanceRequest,
            api::users::BalanceResponse,
            common::model::account::Account,
        )
    ),
    tags(
        (name = "users", description = "User and balance endpoints")
    ),
    info(
        title = "Wallet Platform Account API",
        version = "1.0.0",
        description = "Create users and read or adjust their balances"
    )
)]
pub struct AccountApiDoc;

/// Ledger API documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        api::transactions::add_money,
        api::transactions::transfer_money,
    ),
    components(
        schemas(
            api::transactions::AddMoneyRequest,
            api::transactions::AddMoneyResponse,
            api::transactions::TransferRequest,
            api::transactions::TransferResponse,
            api::transactions::PendingResponse,
        )
    ),
    tags(
        (name = "transactions", description = "Credit and transfer endpoints")
    ),
    info(
        title = "Wallet Platform Ledger API",
        version = "1.0.0",
        description = "Credit accounts and transfer between them; every movement is recorded in the ledger"
    )
)]
pub struct LedgerApiDoc;

/// Routes of the account API
pub fn account_router(state: Arc<AccountState>) -> Router {
    Router::new()
        .route("/users", post(create_user).get(get_user))
        .route("/users/balance", put(update_balance))
        .route("/balance", get(get_balance))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", AccountApiDoc::openapi()))
        .with_state(state)
}

/// Routes of the ledger API
pub fn ledger_router(state: Arc<LedgerState>) -> Router {
    Router::new()
        .route("/transactions/add", post(add_money))
        .route("/transactions/transfer", post(transfer_money))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", LedgerApiDoc::openapi()))
        .with_state(state)
}

/// Add CORS and request tracing at `log_level`
pub fn with_http_layers(router: Router, log_level: Level) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    router
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(log_level))
                .on_request(DefaultOnRequest::new().level(log_level))
                .on_response(DefaultOnResponse::new().level(log_level)),
        )
}
