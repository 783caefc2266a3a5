//! Request/reply message bus between the ledger service and the account service
//!
//! The bus is publish/subscribe underneath but both services use it in
//! request/reply mode: the caller blocks on a single reply with a bounded
//! wait. A reply that arrives after the caller gave up is dropped; the
//! responder's side effects are not cancelled.

mod in_memory;
pub mod protocol;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};

pub use in_memory::InMemoryBus;
pub use protocol::{BusReply, DeltaRequest, LookupRequest, ReplyErrorKind};

/// Subject used to apply a balance delta
pub const SUBJECT_UPDATE_BALANCE: &str = "user.update_balance";

/// Subject used to resolve an email into an account snapshot
pub const SUBJECT_LOOKUP: &str = "user.lookup";

/// Header carrying the idempotency key of a delta request
pub const HEADER_IDEMPOTENCY_KEY: &str = "Idempotency-Key";

/// Default bound on a request/reply exchange
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A bus message: opaque payload plus string headers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Message headers
    pub headers: HashMap<String, String>,
    /// Raw payload
    pub payload: Vec<u8>,
}

impl Message {
    /// Create a message with the given payload and no headers
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            headers: HashMap::new(),
            payload: payload.into(),
        }
    }

    /// Add a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Look up a header value
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Payload as UTF-8 text
    pub fn payload_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.payload)
            .map_err(|e| Error::ValidationError(format!("payload is not valid UTF-8: {}", e)))
    }
}

/// A request delivered to a subscriber, holding the channel its reply goes back on
#[derive(Debug)]
pub struct IncomingRequest {
    /// Subject the request was sent to
    pub subject: String,
    /// Request message
    pub message: Message,
    reply_to: oneshot::Sender<Message>,
}

impl IncomingRequest {
    pub(crate) fn new(subject: String, message: Message, reply_to: oneshot::Sender<Message>) -> Self {
        Self { subject, message, reply_to }
    }

    /// Send the reply. Returns `false` when the requester has already given up.
    pub fn respond(self, reply: Message) -> bool {
        self.reply_to.send(reply).is_ok()
    }
}

/// A subscription to one subject
#[derive(Debug)]
pub struct Subscription {
    subject: String,
    receiver: mpsc::Receiver<IncomingRequest>,
}

impl Subscription {
    pub(crate) fn new(subject: String, receiver: mpsc::Receiver<IncomingRequest>) -> Self {
        Self { subject, receiver }
    }

    /// Subject this subscription listens on
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Wait for the next request; `None` once the bus is gone
    pub async fn next(&mut self) -> Option<IncomingRequest> {
        self.receiver.recv().await
    }
}

/// Request/reply bus abstraction
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Subscribe to a subject. Several subscribers on one subject share the
    /// requests between them (queue-group semantics).
    async fn subscribe(&self, subject: &str) -> Result<Subscription>;

    /// Send a request and wait up to `timeout` for its reply
    async fn request(&self, subject: &str, message: Message, timeout: Duration) -> Result<Message>;
}
