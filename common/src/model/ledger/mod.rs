//! Ledger models: immutable movement rows and pending balance deltas

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Amount;
use crate::error::{Error, Result};
#[cfg(feature = "utoipa")]
use crate::utoipa::ToSchema;

/// Kind of ledger movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Single-leg credit (any signed amount)
    Credit,
    /// One leg of a transfer pair
    Transfer,
}

impl EntryKind {
    /// Column value used by the transactions table
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Credit => "credit",
            EntryKind::Transfer => "transfer",
        }
    }

    /// Parse the column value used by the transactions table
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "credit" => Ok(EntryKind::Credit),
            "transfer" => Ok(EntryKind::Transfer),
            other => Err(Error::Internal(format!("Unknown ledger entry kind: {}", other))),
        }
    }
}

/// One immutable row recording a signed balance movement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(ToSchema))]
pub struct LedgerEntry {
    /// Generated entry ID
    pub id: Uuid,
    /// Account the delta applies to
    pub account_id: String,
    /// Signed delta (positive = credit leg, negative = debit leg)
    pub amount: Amount,
    /// Movement kind
    pub kind: EntryKind,
    /// Other side of a transfer leg
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterparty_account_id: Option<String>,
    /// Time the entry was written
    pub timestamp: DateTime<Utc>,
}

impl LedgerEntry {
    /// Build a credit entry
    pub fn credit(account_id: impl Into<String>, amount: Amount) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id: account_id.into(),
            amount,
            kind: EntryKind::Credit,
            counterparty_account_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Build the mirrored pair of a transfer: (debit leg on sender, credit leg on recipient)
    pub fn transfer_pair(from_id: &str, to_id: &str, amount: Amount) -> (Self, Self) {
        let timestamp = Utc::now();
        let debit = Self {
            id: Uuid::new_v4(),
            account_id: from_id.to_string(),
            amount: -amount,
            kind: EntryKind::Transfer,
            counterparty_account_id: Some(to_id.to_string()),
            timestamp,
        };
        let credit = Self {
            id: Uuid::new_v4(),
            account_id: to_id.to_string(),
            amount,
            kind: EntryKind::Transfer,
            counterparty_account_id: Some(from_id.to_string()),
            timestamp,
        };
        (debit, credit)
    }

    /// Whether two entries are the mirrored legs of one transfer
    pub fn mirrors(&self, other: &LedgerEntry) -> bool {
        self.kind == EntryKind::Transfer
            && other.kind == EntryKind::Transfer
            && self.amount == -other.amount
            && self.counterparty_account_id.as_deref() == Some(other.account_id.as_str())
            && other.counterparty_account_id.as_deref() == Some(self.account_id.as_str())
    }
}

/// A balance delta recorded in the outbox, waiting for delivery to the
/// account service
///
/// The ID is the ledger entry ID it was derived from and doubles as the
/// idempotency key on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDelta {
    /// Ledger entry ID / idempotency key
    pub id: Uuid,
    /// Email the delta is addressed to
    pub email: String,
    /// Signed delta
    pub amount: Amount,
    /// Failed delivery attempts so far
    pub attempts: u32,
    /// Last delivery error, if any
    pub last_error: Option<String>,
    /// When the delta was recorded
    pub created_at: DateTime<Utc>,
    /// Earliest time the next attempt may run
    pub next_attempt_at: DateTime<Utc>,
    /// When delivery was confirmed
    pub delivered_at: Option<DateTime<Utc>>,
    /// When retries stopped after repeated rejections
    pub parked_at: Option<DateTime<Utc>>,
}

impl PendingDelta {
    /// Record the delta of a ledger entry for the account with `email`
    pub fn for_entry(entry: &LedgerEntry, email: impl Into<String>) -> Self {
        Self {
            id: entry.id,
            email: email.into(),
            amount: entry.amount,
            attempts: 0,
            last_error: None,
            created_at: entry.timestamp,
            next_attempt_at: entry.timestamp,
            delivered_at: None,
            parked_at: None,
        }
    }

    /// Idempotency key sent with the bus request
    pub fn idempotency_key(&self) -> String {
        self.id.to_string()
    }

    /// Whether delivery has been confirmed
    pub fn is_delivered(&self) -> bool {
        self.delivered_at.is_some()
    }

    /// Whether retries have stopped
    pub fn is_parked(&self) -> bool {
        self.parked_at.is_some()
    }

    /// Still waiting for delivery: neither delivered nor parked
    pub fn is_outstanding(&self) -> bool {
        !self.is_delivered() && !self.is_parked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::dec;

    #[test]
    fn test_transfer_pair_is_mirrored() {
        let (debit, credit) = LedgerEntry::transfer_pair("a", "b", dec!(25));

        assert_eq!(debit.amount, dec!(-25));
        assert_eq!(credit.amount, dec!(25));
        assert_eq!(debit.timestamp, credit.timestamp);
        assert_ne!(debit.id, credit.id);
        assert!(debit.mirrors(&credit));
        assert!(credit.mirrors(&debit));
    }

    #[test]
    fn test_credit_is_not_a_mirror() {
        let a = LedgerEntry::credit("a", dec!(10));
        let b = LedgerEntry::credit("b", dec!(-10));
        assert!(!a.mirrors(&b));
        assert_eq!(a.counterparty_account_id, None);
    }

    #[test]
    fn test_entry_kind_column_values() {
        assert_eq!(EntryKind::parse(EntryKind::Credit.as_str()).unwrap(), EntryKind::Credit);
        assert_eq!(EntryKind::parse("transfer").unwrap(), EntryKind::Transfer);
        assert!(EntryKind::parse("debit").is_err());
    }
}
