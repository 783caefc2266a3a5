//! Bus responder: applies balance deltas and answers account lookups
//!
//! Every request is handled on its own task. Replies always use the
//! [`BusReply`] envelope; a request that fails validation or hits a storage
//! error leaves balances untouched.

use std::sync::Arc;

use common::bus::{
    BusReply, DeltaRequest, IncomingRequest, LookupRequest, Message, MessageBus, Subscription,
    HEADER_IDEMPOTENCY_KEY, SUBJECT_LOOKUP, SUBJECT_UPDATE_BALANCE,
};
use common::error::{Error, Result};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::service::AccountService;

/// Bus responder for the account service
pub struct BalanceResponder {
    service: Arc<AccountService>,
}

impl BalanceResponder {
    /// Create a responder over the account service
    pub fn new(service: Arc<AccountService>) -> Self {
        Self { service }
    }

    /// Subscribe to both account subjects and serve them until the bus closes
    pub async fn spawn(self: Arc<Self>, bus: Arc<dyn MessageBus>) -> Result<Vec<JoinHandle<()>>> {
        let updates = bus.subscribe(SUBJECT_UPDATE_BALANCE).await?;
        let lookups = bus.subscribe(SUBJECT_LOOKUP).await?;

        info!("Account responder listening on {} and {}", SUBJECT_UPDATE_BALANCE, SUBJECT_LOOKUP);
        Ok(vec![
            tokio::spawn(self.clone().serve(updates)),
            tokio::spawn(self.serve(lookups)),
        ])
    }

    /// Serve one subscription, one task per request
    async fn serve(self: Arc<Self>, mut subscription: Subscription) {
        while let Some(request) = subscription.next().await {
            let responder = self.clone();
            tokio::spawn(async move { responder.dispatch(request).await });
        }
        debug!("Subscription on {} closed", subscription.subject());
    }

    async fn dispatch(&self, request: IncomingRequest) {
        let subject = request.subject.clone();
        let reply = match request.subject.as_str() {
            SUBJECT_UPDATE_BALANCE => self.handle_update_balance(&request.message).await,
            SUBJECT_LOOKUP => self.handle_lookup(&request.message).await,
            other => BusReply::from_error(&Error::ValidationError(format!("unknown subject {}", other))),
        };

        match reply.to_message() {
            Ok(message) => {
                if !request.respond(message) {
                    warn!("Requester on {} gave up before the reply was sent", subject);
                }
            }
            Err(e) => error!("Failed to encode reply: {}", e),
        }
    }

    /// Apply a `"<email>:<amount>"` delta and reply with the account after it
    pub async fn handle_update_balance(&self, message: &Message) -> BusReply {
        let request = match message.payload_str().and_then(DeltaRequest::parse) {
            Ok(request) => request,
            Err(e) => {
                warn!("Rejected balance update: {}", e);
                return BusReply::from_error(&e);
            }
        };

        let result = match message.header(HEADER_IDEMPOTENCY_KEY) {
            Some(key) => self.service.update_balance_once(&request.email, request.amount, key).await,
            None => self.service.update_balance(&request.email, request.amount).await,
        };

        BusReply::from_result(&result)
    }

    /// Resolve an email into its current account state
    pub async fn handle_lookup(&self, message: &Message) -> BusReply {
        let result = match message.payload_str().and_then(LookupRequest::parse) {
            Ok(request) => self.service.get_account(&request.email).await,
            Err(e) => Err(e),
        };

        BusReply::from_result(&result)
    }
}
