//! Bus client for the account service

use std::sync::Arc;
use std::time::Duration;

use common::bus::{
    BusReply, DeltaRequest, LookupRequest, MessageBus, SUBJECT_LOOKUP, SUBJECT_UPDATE_BALANCE,
};
use common::decimal::Amount;
use common::error::{Error, Result};
use common::model::account::Account;
use tracing::debug;

/// Request/reply client for the account service subjects
#[derive(Clone)]
pub struct AccountClient {
    bus: Arc<dyn MessageBus>,
    timeout: Duration,
}

impl AccountClient {
    /// Create a client with a bound on every request
    pub fn new(bus: Arc<dyn MessageBus>, timeout: Duration) -> Self {
        Self { bus, timeout }
    }

    /// Bound on every request
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Ask the account service to add `amount` to the balance of `email`.
    ///
    /// With an idempotency key the responder applies the delta at most once
    /// no matter how often the request is repeated.
    pub async fn apply_delta(&self, email: &str, amount: Amount, idempotency_key: Option<&str>) -> Result<Account> {
        debug!("Requesting delta {} for {}", amount, email);

        let message = DeltaRequest::new(email, amount).to_message(idempotency_key);
        let reply = self.bus.request(SUBJECT_UPDATE_BALANCE, message, self.timeout).await?;

        BusReply::decode(&reply)?
            .into_result()
            .map_err(|e| not_found_as(e, email))
    }

    /// Resolve an email into the account's current state
    pub async fn lookup(&self, email: &str) -> Result<Account> {
        debug!("Looking up account {}", email);

        let message = LookupRequest::new(email).to_message();
        let reply = self.bus.request(SUBJECT_LOOKUP, message, self.timeout).await?;

        BusReply::decode(&reply)?
            .into_result()
            .map_err(|e| not_found_as(e, email))
    }
}

/// Error replies carry the responder's full message; a missing account is
/// reported by its email instead
fn not_found_as(err: Error, email: &str) -> Error {
    match err {
        Error::AccountNotFound(_) => Error::AccountNotFound(email.to_string()),
        other => other,
    }
}
