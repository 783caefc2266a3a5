use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;
use rust_decimal::Decimal;

use crate::error::Result;
use crate::model::account::Account;
use crate::model::ledger::{EntryKind, LedgerEntry, PendingDelta};

/// Database model for the users table
#[derive(Debug, Clone, FromRow)]
pub struct DbAccount {
    pub id: String,
    pub email: String,
    pub balance: Decimal,
}

impl From<DbAccount> for Account {
    fn from(row: DbAccount) -> Self {
        Account {
            id: row.id,
            email: row.email,
            balance: row.balance,
        }
    }
}

/// Database model for the transactions table
#[derive(Debug, Clone, FromRow)]
pub struct DbLedgerEntry {
    pub id: Uuid,
    pub user_id: String,
    pub amount: Decimal,
    #[sqlx(rename = "type")]
    pub kind: String,
    pub to_user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TryFrom<DbLedgerEntry> for LedgerEntry {
    type Error = crate::error::Error;

    fn try_from(row: DbLedgerEntry) -> Result<Self> {
        Ok(LedgerEntry {
            id: row.id,
            account_id: row.user_id,
            amount: row.amount,
            kind: EntryKind::parse(&row.kind)?,
            counterparty_account_id: row.to_user_id,
            timestamp: row.timestamp,
        })
    }
}

/// Database model for the balance_outbox table
#[derive(Debug, Clone, FromRow)]
pub struct DbPendingDelta {
    pub id: Uuid,
    pub email: String,
    pub amount: Decimal,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub next_attempt_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub parked_at: Option<DateTime<Utc>>,
}

impl From<DbPendingDelta> for PendingDelta {
    fn from(row: DbPendingDelta) -> Self {
        PendingDelta {
            id: row.id,
            email: row.email,
            amount: row.amount,
            attempts: row.attempts.max(0) as u32,
            last_error: row.last_error,
            created_at: row.created_at,
            next_attempt_at: row.next_attempt_at,
            delivered_at: row.delivered_at,
            parked_at: row.parked_at,
        }
    }
}
