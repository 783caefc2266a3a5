//! Account service: authoritative user balances
//!
//! Owns the `users` table, a read-through cache in front of it and the bus
//! responder other services use to apply balance deltas.

pub mod config;
pub mod lock;
pub mod repository;
pub mod responder;
pub mod service;
pub mod store;

pub use config::AccountServiceConfig;
pub use repository::{AccountRepository, InMemoryAccountRepository, PostgresAccountRepository};
pub use responder::BalanceResponder;
pub use service::{AccountService, NewAccount, RepositoryType};
pub use store::AccountStore;
