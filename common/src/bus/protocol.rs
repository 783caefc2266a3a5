//! Wire format of the balance subjects
//!
//! Requests keep the textual `"<email>:<amount>"` form. Replies are a tagged
//! JSON envelope for both outcomes, so a caller can tell a missing account
//! from a storage outage without parsing free text.

use serde::{Deserialize, Serialize};

use super::Message;
use crate::decimal::{parse_amount, Amount};
use crate::error::{Error, Result};
use crate::model::account::Account;

/// Apply-delta request: `"<email>:<amount>"`
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaRequest {
    /// Target account email
    pub email: String,
    /// Signed delta
    pub amount: Amount,
}

impl DeltaRequest {
    /// Create a new delta request
    pub fn new(email: impl Into<String>, amount: Amount) -> Self {
        Self { email: email.into(), amount }
    }

    /// Encode as the colon-delimited payload
    pub fn encode(&self) -> String {
        format!("{}:{}", self.email, self.amount)
    }

    /// Parse a colon-delimited payload. Exactly one separator is allowed and
    /// the amount must be a decimal number.
    pub fn parse(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.split(':').collect();
        if parts.len() != 2 {
            return Err(Error::ValidationError("invalid request format".to_string()));
        }

        let email = parts[0].trim();
        if email.is_empty() {
            return Err(Error::ValidationError("missing email".to_string()));
        }

        let amount = parse_amount(parts[1])
            .map_err(|_| Error::ValidationError("invalid amount".to_string()))?;

        Ok(Self::new(email, amount))
    }

    /// Build the bus message, attaching the idempotency key when given
    pub fn to_message(&self, idempotency_key: Option<&str>) -> Message {
        let message = Message::new(self.encode());
        match idempotency_key {
            Some(key) => message.with_header(super::HEADER_IDEMPOTENCY_KEY, key),
            None => message,
        }
    }
}

/// Lookup request: the bare email
#[derive(Debug, Clone, PartialEq)]
pub struct LookupRequest {
    /// Email to resolve
    pub email: String,
}

impl LookupRequest {
    /// Create a new lookup request
    pub fn new(email: impl Into<String>) -> Self {
        Self { email: email.into() }
    }

    /// Parse a lookup payload
    pub fn parse(raw: &str) -> Result<Self> {
        let email = raw.trim();
        if email.is_empty() || email.contains(':') {
            return Err(Error::ValidationError("invalid lookup request".to_string()));
        }
        Ok(Self::new(email))
    }

    /// Build the bus message
    pub fn to_message(&self) -> Message {
        Message::new(self.email.clone())
    }
}

/// Error kinds carried by an error reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyErrorKind {
    /// Malformed request; retrying it unchanged will fail again
    Validation,
    /// Unknown account
    NotFound,
    /// Storage failure on the responder; may succeed on retry
    Persistence,
    /// Anything else
    Internal,
}

/// Reply envelope for both balance subjects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BusReply {
    /// Request applied; carries the account state after it
    Ok {
        /// Account snapshot
        account: Account,
    },
    /// Request failed; nothing was mutated
    Error {
        /// Error kind
        kind: ReplyErrorKind,
        /// Human-readable message
        message: String,
    },
}

impl BusReply {
    /// Build the reply for an operation outcome
    pub fn from_result(result: &Result<Account>) -> Self {
        match result {
            Ok(account) => BusReply::Ok { account: account.clone() },
            Err(err) => BusReply::from_error(err),
        }
    }

    /// Build an error reply, classifying the error
    pub fn from_error(err: &Error) -> Self {
        let kind = match err {
            Error::ValidationError(_) => ReplyErrorKind::Validation,
            Error::AccountNotFound(_) => ReplyErrorKind::NotFound,
            e if e.is_persistence() => ReplyErrorKind::Persistence,
            _ => ReplyErrorKind::Internal,
        };
        BusReply::Error { kind, message: err.to_string() }
    }

    /// Encode as a bus message
    pub fn to_message(&self) -> Result<Message> {
        Ok(Message::new(serde_json::to_vec(self)?))
    }

    /// Decode a reply message
    pub fn decode(message: &Message) -> Result<Self> {
        serde_json::from_slice(&message.payload).map_err(|e| {
            let preview = String::from_utf8_lossy(&message.payload);
            Error::MalformedReply(format!("{} (payload: {:.80})", e, preview))
        })
    }

    /// Turn the reply back into the caller's error taxonomy
    pub fn into_result(self) -> Result<Account> {
        match self {
            BusReply::Ok { account } => Ok(account),
            BusReply::Error { kind, message } => Err(match kind {
                ReplyErrorKind::Validation => Error::ValidationError(message),
                ReplyErrorKind::NotFound => Error::AccountNotFound(message),
                ReplyErrorKind::Persistence => Error::PersistenceFailure(message),
                ReplyErrorKind::Internal => Error::UpstreamRejected(message),
            }),
        }
    }
}
