//! Durable storage for accounts

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::db::models::DbAccount;
use common::db::{PgTransactionManager, TransactionManager};
use common::decimal::Amount;
use common::error::{Error, Result};
use common::model::account::Account;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::{debug, info};

/// Account repository trait defining the interface for account data storage
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Insert a new account; fails with `AlreadyExists` when the email is taken
    async fn create_account(&self, account: &Account) -> Result<Account>;

    /// Find an account by email
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>>;

    /// Overwrite the stored balance
    async fn update_balance(&self, email: &str, balance: Amount) -> Result<Account>;

    /// Overwrite the stored balance and record `idempotency_key` as one unit.
    /// Returns `None` without writing when the key was recorded before.
    async fn update_balance_once(
        &self,
        email: &str,
        balance: Amount,
        delta: Amount,
        idempotency_key: &str,
    ) -> Result<Option<Account>>;
}

/// In-memory repository for account data
pub struct InMemoryAccountRepository {
    /// Accounts by email
    pub accounts: DashMap<String, Account>,
    /// Applied idempotency keys and their deltas
    pub applied_deltas: DashMap<String, Amount>,
    /// Make every write fail with a persistence error
    fail_writes: AtomicBool,
}

impl InMemoryAccountRepository {
    /// Create a new in-memory account repository
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
            applied_deltas: DashMap::new(),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Simulate an unavailable store: while set, all writes fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::PersistenceFailure("account store is unavailable".to_string()));
        }
        Ok(())
    }
}

impl Default for InMemoryAccountRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountRepository for InMemoryAccountRepository {
    async fn create_account(&self, account: &Account) -> Result<Account> {
        self.check_writable()?;

        match self.accounts.entry(account.email.clone()) {
            Entry::Occupied(_) => Err(Error::AlreadyExists(account.email.clone())),
            Entry::Vacant(slot) => {
                slot.insert(account.clone());
                Ok(account.clone())
            }
        }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        Ok(self.accounts.get(email).map(|a| a.clone()))
    }

    async fn update_balance(&self, email: &str, balance: Amount) -> Result<Account> {
        self.check_writable()?;

        let mut account = self.accounts
            .get_mut(email)
            .ok_or_else(|| Error::AccountNotFound(email.to_string()))?;
        account.balance = balance;
        Ok(account.clone())
    }

    async fn update_balance_once(
        &self,
        email: &str,
        balance: Amount,
        delta: Amount,
        idempotency_key: &str,
    ) -> Result<Option<Account>> {
        self.check_writable()?;

        if self.applied_deltas.contains_key(idempotency_key) {
            return Ok(None);
        }

        let account = self.update_balance(email, balance).await?;
        self.applied_deltas.insert(idempotency_key.to_string(), delta);
        Ok(Some(account))
    }
}

/// PostgreSQL repository for account data
pub struct PostgresAccountRepository {
    /// Database connection pool
    pool: PgPool,
    /// Transaction manager
    transaction_manager: PgTransactionManager,
}

impl PostgresAccountRepository {
    /// Create a repository over an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            transaction_manager: PgTransactionManager::new(pool.clone()),
            pool,
        }
    }

    /// Create a new PostgreSQL account repository
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

    /// Create a new PostgreSQL account repository with configuration
    pub async fn with_config(config: &crate::config::AccountServiceConfig) -> Result<Self> {
        info!("Connecting to PostgreSQL database with pool size: {}", config.db_pool_size);

        let pool = PgPoolOptions::new()
            .max_connections(config.db_pool_size)
            .connect(&config.database_url)
            .await
            .map_err(Error::Database)?;

        info!("Connected to PostgreSQL database");
        Ok(Self::from_pool(pool))
    }
}

#[async_trait]
impl AccountRepository for PostgresAccountRepository {
    async fn create_account(&self, account: &Account) -> Result<Account> {
        debug!("Creating account in database: {}", account.email);

        sqlx::query("INSERT INTO users (id, email, balance) VALUES ($1, $2, $3)")
            .bind(&account.id)
            .bind(&account.email)
            .bind(account.balance)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::from_insert(e, &account.email))?;

        Ok(account.clone())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        debug!("Getting account from database: {}", email);

        let row = sqlx::query_as::<_, DbAccount>(
            "SELECT id, email, balance FROM users WHERE email = $1"
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Account::from))
    }

    async fn update_balance(&self, email: &str, balance: Amount) -> Result<Account> {
        debug!("Updating balance in database: {} -> {}", email, balance);

        let row = sqlx::query_as::<_, DbAccount>(
            "UPDATE users SET balance = $1, updated_at = NOW()
             WHERE email = $2
             RETURNING id, email, balance"
        )
        .bind(balance)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Account::from)
            .ok_or_else(|| Error::AccountNotFound(email.to_string()))
    }

    async fn update_balance_once(
        &self,
        email: &str,
        balance: Amount,
        delta: Amount,
        idempotency_key: &str,
    ) -> Result<Option<Account>> {
        let mut tx = self.transaction_manager.begin_transaction().await?;

        let recorded = tx.execute(
            sqlx::query(
                "INSERT INTO applied_deltas (idempotency_key, email, amount)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (idempotency_key) DO NOTHING"
            )
            .bind(idempotency_key)
            .bind(email)
            .bind(delta)
        ).await?;

        if recorded == 0 {
            debug!("Delta {} already applied to {}", idempotency_key, email);
            tx.rollback().await?;
            return Ok(None);
        }

        let updated = tx.execute(
            sqlx::query("UPDATE users SET balance = $1, updated_at = NOW() WHERE email = $2")
                .bind(balance)
                .bind(email)
        ).await?;

        if updated == 0 {
            tx.rollback().await?;
            return Err(Error::AccountNotFound(email.to_string()));
        }

        tx.commit().await?;

        self.find_by_email(email).await?
            .map(Some)
            .ok_or_else(|| Error::AccountNotFound(email.to_string()))
    }
}
