//! Ledger service: append-only record of credits and transfers
//!
//! Writes ledger rows in a local transaction and keeps the account service's
//! balances in step with them over the message bus.

pub mod client;
pub mod config;
pub mod coordinator;
pub mod outbox;
pub mod repository;
pub mod retry;

pub use client::AccountClient;
pub use config::{CoordinatorConfig, DeliveryMode, LedgerServiceConfig, OutboxConfig};
pub use coordinator::{
    CreditReceipt, LedgerCoordinator, RepositoryType, Settlement, TransferReceipt, TransferState,
};
pub use outbox::{DrainReport, OutboxDelivery, OutboxWorker};
pub use repository::{InMemoryLedgerRepository, LedgerRepository, PostgresLedgerRepository};
pub use retry::RetryPolicy;
