//! Account service implementation

use std::sync::Arc;

use common::decimal::{precision, Amount};
use common::error::{Error, Result, ErrorExt};
use common::model::account::Account;
use tracing::info;

use crate::config::{AccountServiceConfig, DEFAULT_LOCK_STRIPES};
use crate::repository::{AccountRepository, InMemoryAccountRepository, PostgresAccountRepository};
use crate::store::AccountStore;

/// Account service for managing user balances
pub struct AccountService {
    /// Balances and cache
    store: AccountStore,
}

/// Repository Type
pub enum RepositoryType {
    /// In-memory repository
    InMemory,
    /// PostgreSQL repository
    Postgres(Option<String>),
}

/// Request to create an account
#[derive(Debug, Clone)]
pub struct NewAccount {
    /// Caller-supplied ID; generated when absent
    pub id: Option<String>,
    /// Unique email
    pub email: String,
    /// Opening balance
    pub balance: Amount,
}

impl AccountService {
    /// Create a new account service backed by memory
    pub fn new() -> Self {
        Self::with_store(AccountStore::new(
            Arc::new(InMemoryAccountRepository::new()),
            true,
            DEFAULT_LOCK_STRIPES,
        ))
    }

    /// Create a service over an existing store
    pub fn with_store(store: AccountStore) -> Self {
        Self { store }
    }

    /// Create a new account service with a specific repository type
    pub async fn with_repository(repo_type: RepositoryType) -> Result<Self> {
        let repo: Arc<dyn AccountRepository> = match repo_type {
            RepositoryType::InMemory => {
                Arc::new(InMemoryAccountRepository::new())
            },
            RepositoryType::Postgres(database_url) => {
                Arc::new(PostgresAccountRepository::new(database_url).await?)
            }
        };

        Ok(Self::with_store(AccountStore::new(repo, true, DEFAULT_LOCK_STRIPES)))
    }

    /// Create a new account service with a configuration
    pub async fn with_config(config: &AccountServiceConfig) -> Result<Self> {
        let repo: Arc<dyn AccountRepository> = Arc::new(
            PostgresAccountRepository::with_config(config).await?
        );

        Ok(Self::with_store(AccountStore::with_config(repo, config)))
    }

    /// The underlying store
    pub fn store(&self) -> &AccountStore {
        &self.store
    }

    /// Create a new account
    pub async fn create_account(&self, request: NewAccount) -> Result<Account> {
        validate_email(&request.email)?;
        let balance = precision::validate_amount(request.balance)?;
        info!("Creating account for {}", request.email);

        let account = match request.id {
            Some(id) if !id.trim().is_empty() => Account::with_id(id, request.email, balance),
            _ => Account::new(request.email, balance),
        };

        self.store.create_account(account).await
    }

    /// Get an account by email
    pub async fn get_account(&self, email: &str) -> Result<Account> {
        self.store.get_account(email).await
    }

    /// Current balance of an account
    pub async fn get_balance(&self, email: &str) -> Result<Amount> {
        Ok(self.store.get_account(email).await?.balance)
    }

    /// Add a signed amount to an account balance
    pub async fn update_balance(&self, email: &str, amount: Amount) -> Result<Account> {
        let amount = precision::validate_amount(amount)?;
        self.store.apply_delta(email, amount).await
            .with_context(|| format!("Failed to update balance of {}", email))
    }

    /// Add a signed amount at most once per idempotency key
    pub async fn update_balance_once(&self, email: &str, amount: Amount, idempotency_key: &str) -> Result<Account> {
        let amount = precision::validate_amount(amount)?;
        self.store.apply_delta_once(email, amount, idempotency_key).await
            .with_context(|| format!("Failed to update balance of {}", email))
    }
}

impl Default for AccountService {
    fn default() -> Self {
        Self::new()
    }
}

/// Emails are the bus addressing key, so they must survive the
/// `"<email>:<amount>"` encoding
fn validate_email(email: &str) -> Result<()> {
    if email.trim().is_empty() {
        return Err(Error::ValidationError("email is required".to_string()));
    }
    if email.contains(':') || email.chars().any(char::is_whitespace) {
        return Err(Error::ValidationError(format!("invalid email: {}", email)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_validation() {
        assert!(validate_email("alice@x").is_ok());
        assert!(validate_email("").is_err());
        assert!(validate_email("a:b@x").is_err());
        assert!(validate_email("a b@x").is_err());
    }
}
