//! Common types and utilities for the wallet platform
//!
//! This library contains shared types, utilities, and abstractions used by
//! both the account service and the ledger service. It provides a unified
//! approach to error handling, database transactions, the request/reply bus
//! and the domain models that cross the service boundary.

pub mod error;
pub mod model;
pub mod decimal;
pub mod db;
pub mod bus;

/// Re-export important types
pub use error::{Error, Result, ErrorExt};
pub use decimal::*;

// Re-export database types
pub use db::transaction::{DBTransaction, TransactionManager};

// Re-export bus types
pub use bus::{MessageBus, Message, IncomingRequest, Subscription, InMemoryBus};

// Re-export utoipa for use in model ToSchema derives
#[cfg(feature = "utoipa")]
pub use utoipa;
