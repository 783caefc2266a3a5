//! Append-only ledger storage and the balance outbox

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::db::models::{DbLedgerEntry, DbPendingDelta};
use common::db::{
    DBTransaction, InMemoryTransactionManager, PgTransactionManager, TransactionManager,
};
use common::decimal::Amount;
use common::error::{Error, Result};
use common::model::ledger::{LedgerEntry, PendingDelta};
use dashmap::DashMap;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{debug, info};
use uuid::Uuid;

/// Ledger repository trait
///
/// Writes go through a caller-supplied transaction and never commit or roll
/// it back; reads and outbox bookkeeping run on their own.
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Open a local transaction for ledger writes
    async fn begin(&self) -> Result<DBTransaction>;

    /// Append one credit row
    async fn append_credit(&self, tx: &mut DBTransaction, account_id: &str, amount: Amount) -> Result<LedgerEntry>;

    /// Append both legs of a transfer: (debit on sender, credit on recipient)
    async fn append_transfer_pair(
        &self,
        tx: &mut DBTransaction,
        from_id: &str,
        to_id: &str,
        amount: Amount,
    ) -> Result<(LedgerEntry, LedgerEntry)>;

    /// Record a delta for later delivery, in the same transaction as its entry
    async fn enqueue_delta(&self, tx: &mut DBTransaction, delta: &PendingDelta) -> Result<()>;

    /// All committed entries of an account, oldest first
    async fn entries_for_account(&self, account_id: &str) -> Result<Vec<LedgerEntry>>;

    /// Outstanding deltas whose next attempt is due, oldest first
    async fn pending_deltas(&self, limit: usize) -> Result<Vec<PendingDelta>>;

    /// Total of the committed debits addressed to `email` that are still
    /// outstanding, as a non-negative amount
    async fn outstanding_debits(&self, email: &str) -> Result<Amount>;

    /// Mark a delta delivered
    async fn mark_delivered(&self, id: Uuid) -> Result<()>;

    /// Record a failed delivery attempt and when to try again
    async fn record_failed_attempt(&self, id: Uuid, error: &str, next_attempt_at: DateTime<Utc>) -> Result<()>;

    /// Record a final failed attempt and stop retrying the delta
    async fn park(&self, id: Uuid, error: &str) -> Result<()>;
}

/// In-memory ledger repository
///
/// Writes are staged on the [`InMemoryTransaction`](common::db::InMemoryTransaction)
/// and become visible only when it commits.
pub struct InMemoryLedgerRepository {
    entries: Arc<DashMap<Uuid, LedgerEntry>>,
    outbox: Arc<DashMap<Uuid, PendingDelta>>,
    transaction_manager: InMemoryTransactionManager,
    fail_writes: AtomicBool,
}

impl InMemoryLedgerRepository {
    /// Create a new in-memory ledger repository
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            outbox: Arc::new(DashMap::new()),
            transaction_manager: InMemoryTransactionManager::new(),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Simulate an unavailable store: while set, all writes fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of committed ledger entries
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Snapshot of one outbox row, delivered or not
    pub fn outbox_entry(&self, id: Uuid) -> Option<PendingDelta> {
        self.outbox.get(&id).map(|d| d.clone())
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::PersistenceFailure("ledger store is unavailable".to_string()));
        }
        Ok(())
    }

    fn stage_entry(&self, tx: &mut DBTransaction, entry: LedgerEntry) -> Result<()> {
        let entries = self.entries.clone();
        tx.in_memory()?.stage(move || {
            entries.insert(entry.id, entry);
        });
        Ok(())
    }
}

impl Default for InMemoryLedgerRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerRepository for InMemoryLedgerRepository {
    async fn begin(&self) -> Result<DBTransaction> {
        self.transaction_manager.begin_transaction().await
    }

    async fn append_credit(&self, tx: &mut DBTransaction, account_id: &str, amount: Amount) -> Result<LedgerEntry> {
        self.check_writable()?;

        let entry = LedgerEntry::credit(account_id, amount);
        self.stage_entry(tx, entry.clone())?;
        Ok(entry)
    }

    async fn append_transfer_pair(
        &self,
        tx: &mut DBTransaction,
        from_id: &str,
        to_id: &str,
        amount: Amount,
    ) -> Result<(LedgerEntry, LedgerEntry)> {
        self.check_writable()?;

        let (debit, credit) = LedgerEntry::transfer_pair(from_id, to_id, amount);
        self.stage_entry(tx, debit.clone())?;
        self.stage_entry(tx, credit.clone())?;
        Ok((debit, credit))
    }

    async fn enqueue_delta(&self, tx: &mut DBTransaction, delta: &PendingDelta) -> Result<()> {
        self.check_writable()?;

        let outbox = self.outbox.clone();
        let delta = delta.clone();
        tx.in_memory()?.stage(move || {
            outbox.insert(delta.id, delta);
        });
        Ok(())
    }

    async fn entries_for_account(&self, account_id: &str) -> Result<Vec<LedgerEntry>> {
        let mut entries: Vec<LedgerEntry> = self.entries
            .iter()
            .filter(|e| e.account_id == account_id)
            .map(|e| e.clone())
            .collect();
        entries.sort_by_key(|e| e.timestamp);
        Ok(entries)
    }

    async fn pending_deltas(&self, limit: usize) -> Result<Vec<PendingDelta>> {
        let now = Utc::now();
        let mut due: Vec<PendingDelta> = self.outbox
            .iter()
            .filter(|d| d.is_outstanding() && d.next_attempt_at <= now)
            .map(|d| d.clone())
            .collect();
        due.sort_by_key(|d| d.created_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn outstanding_debits(&self, email: &str) -> Result<Amount> {
        Ok(self.outbox
            .iter()
            .filter(|d| d.email == email && d.is_outstanding() && d.amount < Amount::ZERO)
            .map(|d| -d.amount)
            .sum())
    }

    async fn mark_delivered(&self, id: Uuid) -> Result<()> {
        self.check_writable()?;

        let mut delta = self.outbox
            .get_mut(&id)
            .ok_or_else(|| Error::Internal(format!("Unknown outbox entry {}", id)))?;
        delta.delivered_at = Some(Utc::now());
        Ok(())
    }

    async fn record_failed_attempt(&self, id: Uuid, error: &str, next_attempt_at: DateTime<Utc>) -> Result<()> {
        self.check_writable()?;

        let mut delta = self.outbox
            .get_mut(&id)
            .ok_or_else(|| Error::Internal(format!("Unknown outbox entry {}", id)))?;
        delta.attempts += 1;
        delta.last_error = Some(error.to_string());
        delta.next_attempt_at = next_attempt_at;
        Ok(())
    }

    async fn park(&self, id: Uuid, error: &str) -> Result<()> {
        self.check_writable()?;

        let mut delta = self.outbox
            .get_mut(&id)
            .ok_or_else(|| Error::Internal(format!("Unknown outbox entry {}", id)))?;
        delta.attempts += 1;
        delta.last_error = Some(error.to_string());
        delta.parked_at = Some(Utc::now());
        Ok(())
    }
}

/// PostgreSQL ledger repository
pub struct PostgresLedgerRepository {
    /// Database connection pool
    pool: PgPool,
    /// Transaction manager
    transaction_manager: PgTransactionManager,
}

impl PostgresLedgerRepository {
    /// Create a repository over an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            transaction_manager: PgTransactionManager::new(pool.clone()),
            pool,
        }
    }

    /// Create a new PostgreSQL ledger repository
    pub async fn new(database_url: Option<String>) -> Result<Self> {
        let database_url = match database_url {
            Some(url) => url,
            None => std::env::var("DATABASE_URL")
                .map_err(|_| Error::ConfigurationError("DATABASE_URL must be set".to_string()))?,
        };

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await
            .map_err(Error::Database)?;

        info!("Connected to PostgreSQL database");
        Ok(Self::from_pool(pool))
    }

    /// Create a new PostgreSQL ledger repository with configuration
    pub async fn with_config(config: &crate::config::LedgerServiceConfig) -> Result<Self> {
        info!("Connecting to PostgreSQL database with pool size: {}", config.db_pool_size);

        let pool = PgPoolOptions::new()
            .max_connections(config.db_pool_size)
            .connect(&config.database_url)
            .await
            .map_err(Error::Database)?;

        info!("Connected to PostgreSQL database");
        Ok(Self::from_pool(pool))
    }

    async fn insert_entry(&self, tx: &mut DBTransaction, entry: &LedgerEntry) -> Result<()> {
        debug!("Appending {} entry {} for {}", entry.kind.as_str(), entry.id, entry.account_id);

        tx.execute(
            sqlx::query(
                "INSERT INTO transactions (id, user_id, amount, type, to_user_id, timestamp)
                 VALUES ($1, $2, $3, $4, $5, $6)"
            )
            .bind(entry.id)
            .bind(entry.account_id.clone())
            .bind(entry.amount)
            .bind(entry.kind.as_str())
            .bind(entry.counterparty_account_id.clone())
            .bind(entry.timestamp)
        ).await?;

        Ok(())
    }
}

#[async_trait]
impl LedgerRepository for PostgresLedgerRepository {
    async fn begin(&self) -> Result<DBTransaction> {
        self.transaction_manager.begin_transaction().await
    }

    async fn append_credit(&self, tx: &mut DBTransaction, account_id: &str, amount: Amount) -> Result<LedgerEntry> {
        let entry = LedgerEntry::credit(account_id, amount);
        self.insert_entry(tx, &entry).await?;
        Ok(entry)
    }

    async fn append_transfer_pair(
        &self,
        tx: &mut DBTransaction,
        from_id: &str,
        to_id: &str,
        amount: Amount,
    ) -> Result<(LedgerEntry, LedgerEntry)> {
        let (debit, credit) = LedgerEntry::transfer_pair(from_id, to_id, amount);
        self.insert_entry(tx, &debit).await?;
        self.insert_entry(tx, &credit).await?;
        Ok((debit, credit))
    }

    async fn enqueue_delta(&self, tx: &mut DBTransaction, delta: &PendingDelta) -> Result<()> {
        tx.execute(
            sqlx::query(
                "INSERT INTO balance_outbox (id, email, amount, attempts, created_at, next_attempt_at)
                 VALUES ($1, $2, $3, 0, $4, $5)"
            )
            .bind(delta.id)
            .bind(delta.email.clone())
            .bind(delta.amount)
            .bind(delta.created_at)
            .bind(delta.next_attempt_at)
        ).await?;

        Ok(())
    }

    async fn entries_for_account(&self, account_id: &str) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query_as::<_, DbLedgerEntry>(
            "SELECT id, user_id, amount, type, to_user_id, timestamp
             FROM transactions
             WHERE user_id = $1
             ORDER BY timestamp, id"
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LedgerEntry::try_from).collect()
    }

    async fn pending_deltas(&self, limit: usize) -> Result<Vec<PendingDelta>> {
        let rows = sqlx::query_as::<_, DbPendingDelta>(
            "SELECT id, email, amount, attempts, last_error, created_at, next_attempt_at, delivered_at, parked_at
             FROM balance_outbox
             WHERE delivered_at IS NULL AND parked_at IS NULL AND next_attempt_at <= NOW()
             ORDER BY created_at
             LIMIT $1"
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PendingDelta::from).collect())
    }

    async fn outstanding_debits(&self, email: &str) -> Result<Amount> {
        let total = sqlx::query_scalar::<_, Amount>(
            "SELECT COALESCE(SUM(-amount), 0)
             FROM balance_outbox
             WHERE email = $1 AND amount < 0 AND delivered_at IS NULL AND parked_at IS NULL"
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }

    async fn mark_delivered(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE balance_outbox SET delivered_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_failed_attempt(&self, id: Uuid, error: &str, next_attempt_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE balance_outbox
             SET attempts = attempts + 1, last_error = $2, next_attempt_at = $3
             WHERE id = $1"
        )
        .bind(id)
        .bind(error)
        .bind(next_attempt_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn park(&self, id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE balance_outbox
             SET attempts = attempts + 1, last_error = $2, parked_at = NOW()
             WHERE id = $1"
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
