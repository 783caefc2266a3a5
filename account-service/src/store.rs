//! Authoritative account balances: durable repository plus read-through cache
//!
//! The repository is the source of truth. The cache only ever holds copies
//! of what the repository returned, keyed by email. Every cache access goes
//! through the stripe lock of its email: hits take the shared side, cache
//! population and balance changes take the exclusive side. `apply_delta`
//! keeps the exclusive side for its whole read-modify-write, so concurrent
//! deltas against one account never overwrite each other.

use std::sync::Arc;

use common::decimal::Amount;
use common::error::{Error, Result};
use common::model::account::Account;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::config::AccountServiceConfig;
use crate::lock::StripedLock;
use crate::repository::AccountRepository;

/// Account store
pub struct AccountStore {
    repo: Arc<dyn AccountRepository>,
    cache: Option<DashMap<String, Account>>,
    locks: StripedLock,
}

impl AccountStore {
    /// Create a store over `repo`
    pub fn new(repo: Arc<dyn AccountRepository>, cache_enabled: bool, lock_stripes: usize) -> Self {
        Self {
            repo,
            cache: cache_enabled.then(DashMap::new),
            locks: StripedLock::new(lock_stripes),
        }
    }

    /// Create a store configured from the service configuration
    pub fn with_config(repo: Arc<dyn AccountRepository>, config: &AccountServiceConfig) -> Self {
        Self::new(repo, config.cache_enabled, config.lock_stripes)
    }

    /// Whether the read-through cache is enabled
    pub fn cache_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// Cached copy of an account, if any
    pub fn cached(&self, email: &str) -> Option<Account> {
        self.cache.as_ref()?.get(email).map(|a| a.clone())
    }

    /// Persist a new account and cache it
    pub async fn create_account(&self, account: Account) -> Result<Account> {
        let _guard = self.locks.write(&account.email).await;

        let created = self.repo.create_account(&account).await?;
        if let Some(cache) = &self.cache {
            cache.insert(created.email.clone(), created.clone());
        }

        info!("Created account {} for {}", created.id, created.email);
        Ok(created)
    }

    /// Get an account by email, cache first
    pub async fn get_account(&self, email: &str) -> Result<Account> {
        if let Some(cache) = &self.cache {
            let _guard = self.locks.read(email).await;
            if let Some(account) = cache.get(email) {
                debug!("Cache hit for {}", email);
                return Ok(account.clone());
            }
        }

        let account = self.repo.find_by_email(email).await?
            .ok_or_else(|| Error::AccountNotFound(email.to_string()))?;

        match &self.cache {
            Some(cache) => {
                let _guard = self.locks.write(email).await;
                // A writer may have cached a newer balance since our read
                Ok(cache.entry(email.to_string()).or_insert(account).clone())
            }
            None => Ok(account),
        }
    }

    /// Add `delta` to the balance of `email` and return the updated account.
    /// No floor check is applied.
    pub async fn apply_delta(&self, email: &str, delta: Amount) -> Result<Account> {
        let _guard = self.locks.write(email).await;

        let current = self.load_locked(email).await?;
        let updated = current.with_delta(delta);

        let persisted = self.repo.update_balance(email, updated.balance).await;
        self.settle(email, persisted, delta)
    }

    /// Like [`apply_delta`](Self::apply_delta), but applies each
    /// `idempotency_key` at most once; a repeated key returns the current
    /// account untouched.
    pub async fn apply_delta_once(&self, email: &str, delta: Amount, idempotency_key: &str) -> Result<Account> {
        let _guard = self.locks.write(email).await;

        let current = self.load_locked(email).await?;
        let updated = current.with_delta(delta);

        match self.repo.update_balance_once(email, updated.balance, delta, idempotency_key).await {
            Ok(Some(account)) => self.settle(email, Ok(account), delta),
            Ok(None) => {
                info!("Delta {} for {} was already applied", idempotency_key, email);
                Ok(current)
            }
            Err(e) => self.settle(email, Err(e), delta),
        }
    }

    /// Read an account while the caller holds the exclusive stripe lock
    async fn load_locked(&self, email: &str) -> Result<Account> {
        if let Some(account) = self.cached(email) {
            return Ok(account);
        }

        self.repo.find_by_email(email).await?
            .ok_or_else(|| Error::AccountNotFound(email.to_string()))
    }

    /// Reflect a write outcome in the cache
    fn settle(&self, email: &str, persisted: Result<Account>, delta: Amount) -> Result<Account> {
        match persisted {
            Ok(account) => {
                if let Some(cache) = &self.cache {
                    cache.insert(email.to_string(), account.clone());
                }
                info!("Applied delta {} to {}, balance now {}", delta, email, account.balance);
                Ok(account)
            }
            Err(e) => {
                if let Some(cache) = &self.cache {
                    cache.remove(email);
                }
                warn!("Failed to apply delta {} to {}: {}", delta, email, e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryAccountRepository;
    use common::decimal::dec;

    fn store_with(repo: Arc<InMemoryAccountRepository>) -> AccountStore {
        AccountStore::new(repo, true, 4)
    }

    #[tokio::test]
    async fn test_get_populates_cache_from_repository() {
        let repo = Arc::new(InMemoryAccountRepository::new());
        repo.accounts.insert("alice@x".to_string(), Account::with_id("1", "alice@x", dec!(100)));
        let store = store_with(repo);

        assert!(store.cached("alice@x").is_none());
        let account = store.get_account("alice@x").await.unwrap();
        assert_eq!(account.balance, dec!(100));
        assert_eq!(store.cached("alice@x"), Some(account));
    }

    #[tokio::test]
    async fn test_failed_write_evicts_cache_entry() {
        let repo = Arc::new(InMemoryAccountRepository::new());
        let store = store_with(repo.clone());
        store.create_account(Account::new("alice@x", dec!(100))).await.unwrap();
        assert!(store.cached("alice@x").is_some());

        repo.set_fail_writes(true);
        let result = store.apply_delta("alice@x", dec!(5)).await;
        assert!(matches!(result, Err(Error::PersistenceFailure(_))));
        assert!(store.cached("alice@x").is_none());

        repo.set_fail_writes(false);
        assert_eq!(store.get_account("alice@x").await.unwrap().balance, dec!(100));
    }

    #[tokio::test]
    async fn test_cache_disabled_reads_repository() {
        let repo = Arc::new(InMemoryAccountRepository::new());
        let store = AccountStore::new(repo.clone(), false, 1);
        store.create_account(Account::new("alice@x", dec!(1))).await.unwrap();

        repo.accounts.get_mut("alice@x").unwrap().balance = dec!(42);
        assert_eq!(store.get_account("alice@x").await.unwrap().balance, dec!(42));
        assert!(!store.cache_enabled());
    }
}
