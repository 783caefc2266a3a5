//! Transaction handling for database operations
//!
//! This module provides a standardized approach to local transactions for
//! both services. Repositories write through a caller-supplied
//! [`DBTransaction`]; only the caller commits or rolls it back.

use async_trait::async_trait;
use sqlx::{PgPool, Transaction as SqlxTransaction, Postgres};

use crate::error::{Error, Result};

/// Transaction enum that can be either PostgreSQL or in-memory
pub enum DBTransaction {
    /// PostgreSQL transaction
    Postgres(PgTransaction),
    /// In-memory transaction
    InMemory(InMemoryTransaction),
}

/// Transaction interface methods
impl DBTransaction {
    /// Commit the transaction
    pub async fn commit(self) -> Result<()> {
        match self {
            DBTransaction::Postgres(tx) => tx.commit().await,
            DBTransaction::InMemory(tx) => tx.commit().await,
        }
    }

    /// Rollback the transaction
    pub async fn rollback(self) -> Result<()> {
        match self {
            DBTransaction::Postgres(tx) => tx.rollback().await,
            DBTransaction::InMemory(tx) => tx.rollback().await,
        }
    }

    /// Execute a query against the transaction
    pub async fn execute<'a, E>(&mut self, query: E) -> Result<u64>
    where
        E: sqlx::Execute<'a, Postgres> + Send + 'a,
    {
        match self {
            DBTransaction::Postgres(tx) => tx.execute(query).await,
            DBTransaction::InMemory(_) => Err(Error::PersistenceFailure(
                "SQL statements cannot run inside an in-memory transaction".to_string(),
            )),
        }
    }

    /// Access the in-memory staging area, failing for any other backend
    pub fn in_memory(&mut self) -> Result<&mut InMemoryTransaction> {
        match self {
            DBTransaction::InMemory(tx) => Ok(tx),
            DBTransaction::Postgres(_) => Err(Error::PersistenceFailure(
                "expected an in-memory transaction, got a PostgreSQL one".to_string(),
            )),
        }
    }
}

/// A PostgreSQL transaction implementation
pub struct PgTransaction {
    tx: SqlxTransaction<'static, Postgres>,
}

impl PgTransaction {
    /// Create a new PgTransaction
    pub fn new(tx: SqlxTransaction<'static, Postgres>) -> Self {
        Self { tx }
    }

    /// Execute a query within this transaction
    pub async fn execute<'a, E>(&mut self, query: E) -> Result<u64>
    where
        E: sqlx::Execute<'a, Postgres> + Send + 'a,
    {
        use sqlx::Executor;
        self.tx.execute(query).await
            .map(|r| r.rows_affected())
            .map_err(Error::Database)
    }

    /// Commit the transaction
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await.map_err(Error::Database)
    }

    /// Rollback the transaction
    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await.map_err(Error::Database)
    }
}

/// Transaction manager trait for creating and managing transactions
#[async_trait]
pub trait TransactionManager: Send + Sync {
    /// Begin a new transaction
    async fn begin_transaction(&self) -> Result<DBTransaction>;
}

/// A PostgreSQL transaction manager implementation
pub struct PgTransactionManager {
    pool: PgPool,
}

impl PgTransactionManager {
    /// Create a new PgTransactionManager
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionManager for PgTransactionManager {
    async fn begin_transaction(&self) -> Result<DBTransaction> {
        let tx = self.pool.begin().await.map_err(Error::Database)?;
        Ok(DBTransaction::Postgres(PgTransaction::new(tx)))
    }
}

/// A write deferred until the owning in-memory transaction commits
type StagedWrite = Box<dyn FnOnce() + Send>;

/// In-memory transaction
///
/// Writes are staged as closures and applied in order on commit; rollback
/// (or dropping the transaction) discards them, so nothing staged is ever
/// visible before commit.
pub struct InMemoryTransaction {
    staged: Vec<StagedWrite>,
}

impl InMemoryTransaction {
    /// Create a new in-memory transaction
    pub fn new() -> Self {
        Self { staged: Vec::new() }
    }

    /// Stage a write to run on commit
    pub fn stage<F>(&mut self, write: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.staged.push(Box::new(write));
    }

    /// Number of writes waiting for commit
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// Commit the transaction
    pub async fn commit(self) -> Result<()> {
        for write in self.staged {
            write();
        }
        Ok(())
    }

    /// Rollback the transaction
    pub async fn rollback(self) -> Result<()> {
        drop(self.staged);
        Ok(())
    }
}

impl Default for InMemoryTransaction {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory transaction manager for testing
#[derive(Default)]
pub struct InMemoryTransactionManager;

impl InMemoryTransactionManager {
    /// Create a new in-memory transaction manager
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransactionManager for InMemoryTransactionManager {
    async fn begin_transaction(&self) -> Result<DBTransaction> {
        Ok(DBTransaction::InMemory(InMemoryTransaction::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_staged_writes_apply_on_commit() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut tx = InMemoryTransactionManager::new().begin_transaction().await.unwrap();

        for _ in 0..2 {
            let counter = counter.clone();
            tx.in_memory().unwrap().stage(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tx.commit().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rollback_discards_staged_writes() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut tx = InMemoryTransactionManager::new().begin_transaction().await.unwrap();

        let c = counter.clone();
        tx.in_memory().unwrap().stage(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(tx.in_memory().unwrap().staged_len(), 1);

        tx.rollback().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sql_rejected_in_memory() {
        let mut tx = InMemoryTransactionManager::new().begin_transaction().await.unwrap();
        let result = tx.execute(sqlx::query("SELECT 1")).await;
        assert!(matches!(result, Err(Error::PersistenceFailure(_))));
    }
}
