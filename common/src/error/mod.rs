//! Error types for the wallet platform
//!
//! This module provides a unified error handling system for both services.
//! The variants follow the failure taxonomy of the balance-consistency
//! protocol so that a failure keeps its kind while it crosses a store, the
//! coordinator and the HTTP layer.

use std::fmt::Display;
use thiserror::Error;

/// SQLSTATE raised by Postgres on a unique constraint violation
const UNIQUE_VIOLATION: &str = "23505";

/// Wallet platform error type
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed request body or bus payload
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Unknown email or account
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Duplicate email on account creation
    #[error("Account already exists: {0}")]
    AlreadyExists(String),

    /// Transfer exceeds the sender balance
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    /// No bus reply within the caller's bound
    #[error("Upstream timeout: {0}")]
    UpstreamTimeout(String),

    /// Nobody is subscribed to the requested subject
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The responder answered with an error reply
    #[error("Upstream rejected request: {0}")]
    UpstreamRejected(String),

    /// The responder answered with something that is not a reply envelope
    #[error("Malformed reply: {0}")]
    MalformedReply(String),

    /// Durable store failure that did not come from sqlx directly
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Database migration error
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the failure came from the durable store
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            Error::PersistenceFailure(_) | Error::Database(_) | Error::Migration(_)
        )
    }

    /// Whether the failure came from the bus exchange rather than the caller's input
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Error::UpstreamTimeout(_)
                | Error::UpstreamUnavailable(_)
                | Error::UpstreamRejected(_)
                | Error::MalformedReply(_)
        )
    }

    /// Whether retrying the same request could succeed later
    pub fn is_retryable(&self) -> bool {
        self.is_persistence()
            || matches!(self, Error::UpstreamTimeout(_) | Error::UpstreamUnavailable(_))
    }

    /// Map a sqlx error raised by an insert into the accounts table,
    /// turning the email uniqueness violation into `AlreadyExists`
    pub fn from_insert(err: sqlx::Error, email: &str) -> Self {
        let unique_violation = err
            .as_database_error()
            .and_then(|dbe| dbe.code())
            .map(|code| code == UNIQUE_VIOLATION)
            .unwrap_or(false);

        if unique_violation {
            Error::AlreadyExists(email.to_string())
        } else {
            Error::Database(err)
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait to add context to error results
pub trait ErrorExt<T> {
    /// Add context information to an error
    fn with_context<C, F>(self, context_fn: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Display;
}

impl<T> ErrorExt<T> for Result<T> {
    fn with_context<C, F>(self, context_fn: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Display,
    {
        self.map_err(|e| {
            let context = context_fn().to_string();
            match e {
                Error::ValidationError(msg) => Error::ValidationError(format!("{}: {}", context, msg)),
                Error::AccountNotFound(msg) => Error::AccountNotFound(format!("{}: {}", context, msg)),
                Error::AlreadyExists(msg) => Error::AlreadyExists(format!("{}: {}", context, msg)),
                Error::InsufficientFunds(msg) => Error::InsufficientFunds(format!("{}: {}", context, msg)),
                Error::UpstreamTimeout(msg) => Error::UpstreamTimeout(format!("{}: {}", context, msg)),
                Error::UpstreamUnavailable(msg) => Error::UpstreamUnavailable(format!("{}: {}", context, msg)),
                Error::UpstreamRejected(msg) => Error::UpstreamRejected(format!("{}: {}", context, msg)),
                Error::MalformedReply(msg) => Error::MalformedReply(format!("{}: {}", context, msg)),
                Error::PersistenceFailure(msg) => Error::PersistenceFailure(format!("{}: {}", context, msg)),
                Error::ConfigurationError(msg) => Error::ConfigurationError(format!("{}: {}", context, msg)),
                Error::Internal(msg) => Error::Internal(format!("{}: {}", context, msg)),
                Error::Database(e) => Error::Database(e),
                Error::Migration(e) => Error::Migration(e),
                Error::Serialization(e) => Error::Serialization(e),
            }
        })
    }
}
